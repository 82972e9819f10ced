//! Zero-copy indexed ruleset loader
//!
//! `IndexedRuleset::new` only parses the header and section directory, which
//! makes it cheap enough to construct per query. `verify` walks every
//! structure in the buffer and must be run once on bytes that arrive from an
//! untrusted source. Every accessor stays bounds-checked either way.

use crate::hash::{crc32_update, pack_ngram, hash_ngram, NGRAM_SIZE};
use crate::types::{ActivationTypes, AnchorType, ElementTypes, RuleOptions, UrlPatternType};
use super::format::*;

/// Error type for ruleset loading and verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RulesetError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u16),
    #[error("CRC32 mismatch: stored={stored}, computed={computed}")]
    Crc32Mismatch { stored: u32, computed: u32 },
    #[error("Missing section: {0:?}")]
    MissingSection(SectionId),
    #[error("Invalid section: {0}")]
    InvalidSection(String),
    #[error("Invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: u32, reason: &'static str },
    #[error("Data too short")]
    DataTooShort,
}

/// Section metadata.
#[derive(Debug, Clone, Copy)]
pub struct SectionInfo {
    pub id: SectionId,
    pub flags: u16,
    pub offset: usize,
    pub length: usize,
}

/// Zero-copy view over an indexed ruleset buffer.
#[derive(Clone, Copy)]
pub struct IndexedRuleset<'a> {
    data: &'a [u8],
    pub version: u16,
    pub flags: u16,
    pub rule_count: u32,
    sections: [Option<SectionInfo>; SectionId::ALL.len()],
}

impl<'a> IndexedRuleset<'a> {
    /// Parse header and section directory.
    pub fn new(data: &'a [u8]) -> Result<Self, RulesetError> {
        if data.len() < HEADER_SIZE {
            return Err(RulesetError::DataTooShort);
        }

        if !validate_magic(data) {
            return Err(RulesetError::InvalidMagic);
        }

        let version = read_u16_le(data, header::VERSION).ok_or(RulesetError::DataTooShort)?;
        if u32::from(version) != INDEXED_RULESET_FORMAT_VERSION {
            return Err(RulesetError::UnsupportedVersion(version));
        }

        let flags = read_u16_le(data, header::FLAGS).ok_or(RulesetError::DataTooShort)?;
        let section_count = read_u32_le(data, header::SECTION_COUNT).ok_or(RulesetError::DataTooShort)? as usize;
        let section_dir_offset =
            read_u32_le(data, header::SECTION_DIR_OFFSET).ok_or(RulesetError::DataTooShort)? as usize;
        let rule_count = read_u32_le(data, header::RULE_COUNT).ok_or(RulesetError::DataTooShort)?;

        let mut sections = [None; SectionId::ALL.len()];
        for i in 0..section_count {
            let entry_offset = section_dir_offset
                .checked_add(i.checked_mul(SECTION_ENTRY_SIZE).ok_or(RulesetError::DataTooShort)?)
                .ok_or(RulesetError::DataTooShort)?;
            if entry_offset.saturating_add(SECTION_ENTRY_SIZE) > data.len() {
                return Err(RulesetError::InvalidSection(format!(
                    "directory entry {} out of bounds",
                    i
                )));
            }

            let id_raw = read_u16_le(data, entry_offset + section_entry::ID).unwrap_or(0);
            let id = match SectionId::try_from(id_raw) {
                Ok(id) => id,
                Err(_) => continue, // Skip unknown sections
            };

            let info = SectionInfo {
                id,
                flags: read_u16_le(data, entry_offset + section_entry::FLAGS).unwrap_or(0),
                offset: read_u32_le(data, entry_offset + section_entry::OFFSET).unwrap_or(0) as usize,
                length: read_u32_le(data, entry_offset + section_entry::LENGTH).unwrap_or(0) as usize,
            };

            if info.offset.saturating_add(info.length) > data.len() {
                return Err(RulesetError::InvalidSection(format!("{:?} out of bounds", id)));
            }

            sections[section_slot(id)] = Some(info);
        }

        Ok(Self { data, version, flags, rule_count, sections })
    }

    /// Full structural validation of an untrusted buffer.
    ///
    /// Checks the CRC when present, every section, every hash table slot,
    /// every posting list entry, and every rule record.
    pub fn verify(data: &'a [u8]) -> Result<Self, RulesetError> {
        let ruleset = Self::new(data)?;

        if ruleset.flags & header_flags::HAS_CRC32 != 0 {
            let stored = read_u32_le(data, header::RULESET_CRC32).ok_or(RulesetError::DataTooShort)?;
            let computed = compute_crc32(data);
            if stored != computed {
                return Err(RulesetError::Crc32Mismatch { stored, computed });
            }
        }

        for id in SectionId::ALL {
            if ruleset.sections[section_slot(id)].is_none() {
                return Err(RulesetError::MissingSection(id));
            }
        }

        let rules = ruleset.rules();
        if rules.count() != ruleset.rule_count as usize {
            return Err(RulesetError::InvalidSection("rule count disagrees with header".into()));
        }
        let rules_section = ruleset.section(SectionId::Rules).unwrap_or(&[]);
        let needed = rules
            .count()
            .checked_mul(RULE_RECORD_SIZE)
            .and_then(|n| n.checked_add(RULES_HEADER_SIZE))
            .ok_or_else(|| RulesetError::InvalidSection("rule count overflow".into()))?;
        if needed > rules_section.len() {
            return Err(RulesetError::InvalidSection("rules table truncated".into()));
        }

        let domains = ruleset.domain_pool();
        let domain_section = ruleset.section(SectionId::DomainPool).unwrap_or(&[]);
        let needed = domains
            .count()
            .checked_mul(DOMAIN_ENTRY_SIZE)
            .and_then(|n| n.checked_add(DOMAIN_POOL_HEADER_SIZE))
            .ok_or_else(|| RulesetError::InvalidSection("domain count overflow".into()))?;
        if needed > domain_section.len() {
            return Err(RulesetError::InvalidSection("domain pool truncated".into()));
        }
        for index in 0..domains.count() {
            if domains.get(index).is_none() {
                return Err(RulesetError::InvalidSection(format!("domain entry {} invalid", index)));
            }
        }

        for rule_id in 0..rules.count() as u32 {
            verify_rule(&ruleset, rule_id)?;
        }

        for id in [SectionId::BlacklistIndex, SectionId::WhitelistIndex] {
            ruleset.pattern_index(id).verify(rules.count())?;
        }

        Ok(ruleset)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn section_count(&self) -> usize {
        self.sections.iter().filter(|s| s.is_some()).count()
    }

    pub fn get_section_info(&self, id: SectionId) -> Option<&SectionInfo> {
        self.sections[section_slot(id)].as_ref()
    }

    pub fn section(&self, id: SectionId) -> Option<&'a [u8]> {
        let info = self.sections[section_slot(id)]?;
        self.data.get(info.offset..info.offset.checked_add(info.length)?)
    }

    /// Get string from string pool.
    pub fn get_string(&self, offset: usize, length: usize) -> Option<&'a [u8]> {
        let section = self.section(SectionId::StrPool)?;
        let pool_len = read_u32_le(section, 0)? as usize;
        let pool_data = section.get(4..4usize.checked_add(pool_len)?)?;
        pool_data.get(offset..offset.checked_add(length)?)
    }

    pub fn rules(&self) -> RulesView<'a> {
        RulesView::new(*self)
    }

    pub fn domain_pool(&self) -> DomainPool<'a> {
        self.section(SectionId::DomainPool)
            .map(|data| DomainPool::new(*self, data))
            .unwrap_or_else(|| DomainPool::empty(*self))
    }

    pub fn blacklist_index(&self) -> UrlPatternIndex<'a> {
        self.pattern_index(SectionId::BlacklistIndex)
    }

    pub fn whitelist_index(&self) -> UrlPatternIndex<'a> {
        self.pattern_index(SectionId::WhitelistIndex)
    }

    fn pattern_index(&self, id: SectionId) -> UrlPatternIndex<'a> {
        self.section(id)
            .map(UrlPatternIndex::new)
            .unwrap_or_else(UrlPatternIndex::empty)
    }
}

fn section_slot(id: SectionId) -> usize {
    id as usize - 1
}

/// CRC32 over the whole buffer except the CRC field itself.
pub fn compute_crc32(data: &[u8]) -> u32 {
    let head = &data[..header::RULESET_CRC32.min(data.len())];
    let tail = data.get(header::RULESET_CRC32 + 4..).unwrap_or(&[]);
    crc32_update(crc32_update(0, head), tail)
}

fn verify_rule(ruleset: &IndexedRuleset<'_>, rule_id: u32) -> Result<(), RulesetError> {
    let invalid = |reason| RulesetError::InvalidRule { rule_id, reason };
    let rule = ruleset.rules().get(rule_id).ok_or_else(|| invalid("record out of bounds"))?;

    let options = rule.raw_options();
    if options & !RuleOptions::all().bits() != 0 {
        return Err(invalid("unknown option bits"));
    }
    rule.pattern_type().ok_or_else(|| invalid("unknown pattern type"))?;
    rule.anchor_left().ok_or_else(|| invalid("unknown left anchor"))?;
    rule.anchor_right().ok_or_else(|| invalid("unknown right anchor"))?;
    if rule.raw_element_types() & !ElementTypes::ALL.bits() != 0 {
        return Err(invalid("unknown element type bits"));
    }
    if rule.raw_activation_types() & !ActivationTypes::ALL.bits() != 0 {
        return Err(invalid("unknown activation type bits"));
    }
    rule.pattern().ok_or_else(|| invalid("pattern out of bounds"))?;

    let (start, count) = rule.domain_range().ok_or_else(|| invalid("domain range missing"))?;
    let end = start.checked_add(count).ok_or_else(|| invalid("domain range overflow"))?;
    if end > ruleset.domain_pool().count() {
        return Err(invalid("domain range out of bounds"));
    }
    Ok(())
}

// =============================================================================
// Rules View
// =============================================================================

/// Zero-copy view into the rules table.
#[derive(Clone, Copy)]
pub struct RulesView<'a> {
    ruleset: IndexedRuleset<'a>,
    data: &'a [u8],
    count: usize,
}

impl<'a> RulesView<'a> {
    fn new(ruleset: IndexedRuleset<'a>) -> Self {
        let data = ruleset.section(SectionId::Rules).unwrap_or(&[]);
        let count = read_u32_le(data, 0).unwrap_or(0) as usize;
        Self { ruleset, data, count }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, rule_id: u32) -> Option<RuleView<'a>> {
        let rule_id = rule_id as usize;
        if rule_id >= self.count {
            return None;
        }
        let offset = RULES_HEADER_SIZE.checked_add(rule_id.checked_mul(RULE_RECORD_SIZE)?)?;
        let record = self.data.get(offset..offset.checked_add(RULE_RECORD_SIZE)?)?;
        Some(RuleView { ruleset: self.ruleset, record })
    }
}

/// Zero-copy view of one rule record.
#[derive(Clone, Copy)]
pub struct RuleView<'a> {
    ruleset: IndexedRuleset<'a>,
    record: &'a [u8],
}

impl<'a> RuleView<'a> {
    fn raw_options(&self) -> u8 {
        read_u8(self.record, rule_record::OPTIONS).unwrap_or(0)
    }

    fn raw_element_types(&self) -> u16 {
        read_u16_le(self.record, rule_record::ELEMENT_TYPES).unwrap_or(0)
    }

    fn raw_activation_types(&self) -> u8 {
        read_u8(self.record, rule_record::ACTIVATION_TYPES).unwrap_or(0)
    }

    pub fn options(&self) -> RuleOptions {
        RuleOptions::from_bits_truncate(self.raw_options())
    }

    pub fn pattern_type(&self) -> Option<UrlPatternType> {
        UrlPatternType::try_from(read_u8(self.record, rule_record::PATTERN_TYPE)?).ok()
    }

    pub fn anchor_left(&self) -> Option<AnchorType> {
        AnchorType::try_from(read_u8(self.record, rule_record::ANCHOR_LEFT)?).ok()
    }

    pub fn anchor_right(&self) -> Option<AnchorType> {
        AnchorType::try_from(read_u8(self.record, rule_record::ANCHOR_RIGHT)?).ok()
    }

    pub fn element_types(&self) -> ElementTypes {
        ElementTypes::from_bits_truncate(self.raw_element_types())
    }

    pub fn activation_types(&self) -> ActivationTypes {
        ActivationTypes::from_bits_truncate(self.raw_activation_types())
    }

    pub fn pattern(&self) -> Option<&'a [u8]> {
        let off = read_u32_le(self.record, rule_record::PATTERN_OFF)? as usize;
        let len = read_u32_le(self.record, rule_record::PATTERN_LEN)? as usize;
        self.ruleset.get_string(off, len)
    }

    fn domain_range(&self) -> Option<(usize, usize)> {
        let start = read_u32_le(self.record, rule_record::DOMAINS_START)? as usize;
        let count = read_u32_le(self.record, rule_record::DOMAINS_COUNT)? as usize;
        Some((start, count))
    }

    pub fn domain_count(&self) -> usize {
        self.domain_range().map_or(0, |(_, count)| count)
    }

    /// Domain conditions, longest first with exclusions first on ties.
    /// Entries that fail to resolve are skipped.
    pub fn domains(&self) -> impl Iterator<Item = DomainEntry<'a>> + 'a {
        let pool = self.ruleset.domain_pool();
        let (start, count) = self.domain_range().unwrap_or((0, 0));
        (start..start.saturating_add(count)).filter_map(move |i| pool.get(i))
    }

    /// Whether the rule lists at least one included domain.
    pub fn has_included_domains(&self) -> bool {
        self.domains().any(|d| !d.exclude)
    }
}

// =============================================================================
// Domain Pool
// =============================================================================

/// One domain condition resolved from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainEntry<'a> {
    pub domain: &'a str,
    pub exclude: bool,
}

#[derive(Clone, Copy)]
pub struct DomainPool<'a> {
    ruleset: IndexedRuleset<'a>,
    data: &'a [u8],
    count: usize,
}

impl<'a> DomainPool<'a> {
    fn new(ruleset: IndexedRuleset<'a>, data: &'a [u8]) -> Self {
        let count = read_u32_le(data, 0).unwrap_or(0) as usize;
        Self { ruleset, data, count }
    }

    fn empty(ruleset: IndexedRuleset<'a>) -> Self {
        Self { ruleset, data: &[], count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, index: usize) -> Option<DomainEntry<'a>> {
        if index >= self.count {
            return None;
        }
        let offset = DOMAIN_POOL_HEADER_SIZE.checked_add(index.checked_mul(DOMAIN_ENTRY_SIZE)?)?;
        let str_off = read_u32_le(self.data, offset + domain_entry::STR_OFF)? as usize;
        let str_len = read_u32_le(self.data, offset + domain_entry::STR_LEN)? as usize;
        let flags = read_u32_le(self.data, offset + domain_entry::FLAGS)?;
        let bytes = self.ruleset.get_string(str_off, str_len)?;
        let domain = std::str::from_utf8(bytes).ok()?;
        Some(DomainEntry { domain, exclude: flags & domain_flags::EXCLUDE != 0 })
    }
}

// =============================================================================
// URL Pattern Index (n-gram hash table + fallback list)
// =============================================================================

/// Zero-copy view into one n-gram index section.
#[derive(Clone, Copy)]
pub struct UrlPatternIndex<'a> {
    data: &'a [u8],
    capacity: usize,
    seed: u32,
    fallback_count: usize,
    postings_bytes: usize,
}

impl<'a> UrlPatternIndex<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            capacity: read_u32_le(data, index_header::CAPACITY).unwrap_or(0) as usize,
            seed: read_u32_le(data, index_header::SEED).unwrap_or(0),
            fallback_count: read_u32_le(data, index_header::FALLBACK_COUNT).unwrap_or(0) as usize,
            postings_bytes: read_u32_le(data, index_header::POSTINGS_BYTES).unwrap_or(0) as usize,
        }
    }

    fn empty() -> Self {
        Self { data: &[], capacity: 0, seed: 0, fallback_count: 0, postings_bytes: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entry_count(&self) -> usize {
        read_u32_le(self.data, index_header::ENTRY_COUNT).unwrap_or(0) as usize
    }

    pub fn rule_count(&self) -> usize {
        read_u32_le(self.data, index_header::RULE_COUNT).unwrap_or(0) as usize
    }

    pub fn fallback_count(&self) -> usize {
        self.fallback_count
    }

    fn slots_offset(&self) -> usize {
        INDEX_HEADER_SIZE
    }

    fn fallback_offset(&self) -> usize {
        self.slots_offset().saturating_add(self.capacity.saturating_mul(NGRAM_SLOT_SIZE))
    }

    fn postings_offset(&self) -> usize {
        self.fallback_offset().saturating_add(self.fallback_count.saturating_mul(4))
    }

    fn postings(&self) -> &'a [u8] {
        let start = self.postings_offset();
        let end = start.saturating_add(self.postings_bytes).min(self.data.len());
        self.data.get(start..end).unwrap_or(&[])
    }

    fn slot(&self, idx: usize) -> Option<(u64, usize, usize)> {
        let offset = self.slots_offset().checked_add(idx.checked_mul(NGRAM_SLOT_SIZE)?)?;
        let lo = read_u32_le(self.data, offset + ngram_slot::NGRAM_LO)? as u64;
        let hi = read_u32_le(self.data, offset + ngram_slot::NGRAM_HI)? as u64;
        let postings_off = read_u32_le(self.data, offset + ngram_slot::POSTINGS_OFF)? as usize;
        let count = read_u32_le(self.data, offset + ngram_slot::RULE_COUNT)? as usize;
        Some(((hi << 32) | lo, postings_off, count))
    }

    /// Look up the posting list for an n-gram.
    pub fn lookup(&self, ngram: u64) -> Option<PostingIter<'a>> {
        if self.capacity == 0 || !self.capacity.is_power_of_two() || ngram == 0 {
            return None;
        }

        let mask = self.capacity - 1;
        let mut idx = (hash_ngram(ngram, self.seed) as usize) & mask;

        for _ in 0..self.capacity {
            let (stored, postings_off, count) = self.slot(idx)?;

            // Empty slot
            if stored == 0 {
                return None;
            }

            if stored == ngram {
                return Some(PostingIter::new(self.postings(), postings_off, count));
            }

            // Linear probing
            idx = (idx + 1) & mask;
        }

        None
    }

    /// Rule ids that could not be indexed by an n-gram.
    pub fn fallback_rules(&self) -> impl Iterator<Item = u32> + 'a {
        let data = self.data;
        let start = self.fallback_offset();
        (0..self.fallback_count).map_while(move |i| read_u32_le(data, start.checked_add(i * 4)?))
    }

    /// Candidate rule ids for a URL: posting lists of all of its n-grams,
    /// then the fallback list. Ids may repeat.
    pub fn candidates<'u>(&self, url: &'u [u8]) -> impl Iterator<Item = u32> + 'u
    where
        'a: 'u,
    {
        let index = *self;
        url.windows(NGRAM_SIZE)
            .filter_map(pack_ngram)
            .filter_map(move |ngram| index.lookup(ngram))
            .flatten()
            .chain(index.fallback_rules())
    }

    fn verify(&self, rule_count: usize) -> Result<(), RulesetError> {
        let invalid = |reason: &str| RulesetError::InvalidSection(format!("pattern index: {}", reason));

        if self.data.len() < INDEX_HEADER_SIZE {
            return Err(invalid("header truncated"));
        }
        if self.capacity != 0 && !self.capacity.is_power_of_two() {
            return Err(invalid("capacity is not a power of two"));
        }
        let end = self
            .capacity
            .checked_mul(NGRAM_SLOT_SIZE)
            .and_then(|n| n.checked_add(INDEX_HEADER_SIZE))
            .and_then(|n| n.checked_add(self.fallback_count.checked_mul(4)?))
            .and_then(|n| n.checked_add(self.postings_bytes))
            .ok_or_else(|| invalid("size overflow"))?;
        if end > self.data.len() {
            return Err(invalid("section truncated"));
        }

        for rule_id in self.fallback_rules() {
            if rule_id as usize >= rule_count {
                return Err(invalid("fallback rule out of range"));
            }
        }

        let postings = self.postings();
        let mut occupied = 0usize;
        for idx in 0..self.capacity {
            let (ngram, postings_off, count) = self.slot(idx).ok_or_else(|| invalid("slot truncated"))?;
            if ngram == 0 {
                continue;
            }
            occupied += 1;
            if postings_off > postings.len() {
                return Err(invalid("posting list out of bounds"));
            }
            let mut iter = PostingIter::new(postings, postings_off, count);
            let mut seen = 0usize;
            for rule_id in iter.by_ref() {
                if rule_id as usize >= rule_count {
                    return Err(invalid("posting rule out of range"));
                }
                seen += 1;
            }
            if seen != count {
                return Err(invalid("posting list truncated"));
            }
        }
        if occupied != self.entry_count() {
            return Err(invalid("slot count disagrees with header"));
        }
        if self.capacity != 0 && occupied >= self.capacity {
            return Err(invalid("table has no empty slot"));
        }
        Ok(())
    }
}

/// Lazily decodes a delta+varint posting list.
pub struct PostingIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: usize,
    prev: u32,
}

impl<'a> PostingIter<'a> {
    fn new(data: &'a [u8], offset: usize, count: usize) -> Self {
        Self { data, pos: offset, remaining: count, prev: 0 }
    }
}

impl Iterator for PostingIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        let Some((delta, read)) = decode_varint(self.data, self.pos) else {
            self.remaining = 0;
            return None;
        };
        self.pos += read;
        self.remaining -= 1;
        self.prev = self.prev.wrapping_add(delta);
        Some(self.prev)
    }
}
