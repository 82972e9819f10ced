//! Indexed ruleset builder
//!
//! Rules are appended one at a time; `finish` lays out the sections and
//! writes the header. Each URL rule is filed under exactly one n-gram of its
//! literal text, the one whose posting list is currently shortest, so a URL
//! query touches as few candidate rules as possible.

use std::collections::HashMap;

use srf_core::hash::{hash_ngram, pack_ngram, NGRAM_SEED, NGRAM_SIZE};
use srf_core::ruleset::{
    align_offset, compute_crc32, domain_flags, encode_posting_list, header, header_flags, index_header,
    ngram_slot, rule_record, section_entry, table_capacity, write_u16_le, write_u32_le, SectionId,
    DOMAIN_ENTRY_SIZE, DOMAIN_POOL_HEADER_SIZE, HEADER_SIZE, INDEXED_RULESET_FORMAT_VERSION, INDEX_HEADER_SIZE,
    NGRAM_SLOT_SIZE, RULES_HEADER_SIZE, RULE_RECORD_SIZE, SECTION_ENTRY_SIZE, SRF_MAGIC,
};
use srf_core::types::{ActivationTypes, ElementTypes, RuleSemantics, UrlPatternType, UrlRule};

// =============================================================================
// Indexer
// =============================================================================

/// Compiles `UrlRule`s into one immutable indexed ruleset buffer.
pub struct RulesetIndexer {
    str_pool: StringPool,
    rules: Vec<u8>,
    rule_count: u32,
    domains: Vec<u8>,
    domain_count: u32,
    blacklist: PatternIndexBuilder,
    whitelist: PatternIndexBuilder,
    data: Option<Vec<u8>>,
}

impl Default for RulesetIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesetIndexer {
    pub fn new() -> Self {
        Self {
            str_pool: StringPool::new(),
            rules: Vec::new(),
            rule_count: 0,
            domains: Vec::new(),
            domain_count: 0,
            blacklist: PatternIndexBuilder::default(),
            whitelist: PatternIndexBuilder::default(),
            data: None,
        }
    }

    /// Append a rule. Returns `false` if the rule carries element or
    /// activation type bits this format does not support, or applies to
    /// nothing at all; such rules are not serialized.
    pub fn add_url_rule(&mut self, rule: &UrlRule) -> bool {
        if self.data.is_some() {
            log::warn!("Rule added after the indexed ruleset was finished");
            return false;
        }
        if !is_supported(rule) {
            return false;
        }

        let rule_id = self.rule_count;
        let (pattern_off, pattern_len) = self.str_pool.intern(&rule.pattern);
        let (domains_start, domains_count) = self.add_domains(rule);

        let mut record = [0u8; RULE_RECORD_SIZE];
        record[rule_record::OPTIONS] = rule.options().bits();
        record[rule_record::PATTERN_TYPE] = rule.pattern_type as u8;
        record[rule_record::ANCHOR_LEFT] = rule.anchor_left as u8;
        record[rule_record::ANCHOR_RIGHT] = rule.anchor_right as u8;
        write_u16_le(&mut record, rule_record::ELEMENT_TYPES, rule.element_types.bits());
        record[rule_record::ACTIVATION_TYPES] = rule.activation_types.bits();
        write_u32_le(&mut record, rule_record::PATTERN_OFF, pattern_off);
        write_u32_le(&mut record, rule_record::PATTERN_LEN, pattern_len);
        write_u32_le(&mut record, rule_record::DOMAINS_START, domains_start);
        write_u32_le(&mut record, rule_record::DOMAINS_COUNT, domains_count);
        self.rules.extend_from_slice(&record);
        self.rule_count += 1;

        let index = match rule.semantics {
            RuleSemantics::Blacklist => &mut self.blacklist,
            RuleSemantics::Whitelist => &mut self.whitelist,
        };
        index.insert(rule_id, rule);
        true
    }

    /// Domain list, longest first with exclusions first on equal length.
    fn add_domains(&mut self, rule: &UrlRule) -> (u32, u32) {
        let start = self.domain_count;
        let mut domains: Vec<_> = rule.domains.iter().collect();
        domains.sort_by(|a, b| {
            b.domain
                .len()
                .cmp(&a.domain.len())
                .then_with(|| b.exclude.cmp(&a.exclude))
        });

        for condition in domains {
            let (str_off, str_len) = self.str_pool.intern(&condition.domain);
            let flags = if condition.exclude { domain_flags::EXCLUDE } else { 0 };
            self.domains.extend_from_slice(&str_off.to_le_bytes());
            self.domains.extend_from_slice(&str_len.to_le_bytes());
            self.domains.extend_from_slice(&flags.to_le_bytes());
            self.domain_count += 1;
        }
        (start, self.domain_count - start)
    }

    /// Serialize everything added so far. Idempotent.
    pub fn finish(&mut self) {
        if self.data.is_some() {
            return;
        }

        let str_pool = std::mem::replace(&mut self.str_pool, StringPool::new()).build();

        let mut rules = Vec::with_capacity(RULES_HEADER_SIZE + self.rules.len());
        rules.extend_from_slice(&self.rule_count.to_le_bytes());
        rules.extend_from_slice(&self.rules);

        let mut domains = Vec::with_capacity(DOMAIN_POOL_HEADER_SIZE + self.domains.len());
        domains.extend_from_slice(&self.domain_count.to_le_bytes());
        domains.extend_from_slice(&self.domains);
        debug_assert_eq!(domains.len(), DOMAIN_POOL_HEADER_SIZE + self.domain_count as usize * DOMAIN_ENTRY_SIZE);

        let sections = vec![
            SectionData::new(SectionId::StrPool, str_pool),
            SectionData::new(SectionId::Rules, rules),
            SectionData::new(SectionId::DomainPool, domains),
            SectionData::new(SectionId::BlacklistIndex, self.blacklist.build()),
            SectionData::new(SectionId::WhitelistIndex, self.whitelist.build()),
        ];

        let data = layout(sections, self.rule_count);
        log::debug!(
            "Indexed {} rules ({} blacklist n-grams, {} whitelist n-grams, {} bytes)",
            self.rule_count,
            self.blacklist.ngrams.len(),
            self.whitelist.ngrams.len(),
            data.len()
        );
        self.data = Some(data);
    }

    /// Indexed bytes; empty until `finish` is called.
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn size(&self) -> usize {
        self.data().len()
    }

    pub fn into_data(mut self) -> Vec<u8> {
        self.finish();
        self.data.take().unwrap_or_default()
    }

    pub fn rule_count(&self) -> u32 {
        self.rule_count
    }
}

fn is_supported(rule: &UrlRule) -> bool {
    if rule.element_types.bits() & !ElementTypes::ALL.bits() != 0 {
        return false;
    }
    if rule.activation_types.bits() & !ActivationTypes::ALL.bits() != 0 {
        return false;
    }
    // Popups are not subresources
    let element_types = rule.element_types & !ElementTypes::POPUP;
    !(element_types.is_empty() && rule.activation_types.is_empty())
}

// =============================================================================
// Section Layout
// =============================================================================

struct SectionData {
    id: SectionId,
    data: Vec<u8>,
    offset: usize,
}

impl SectionData {
    fn new(id: SectionId, data: Vec<u8>) -> Self {
        Self { id, data, offset: 0 }
    }
}

fn layout(mut sections: Vec<SectionData>, rule_count: u32) -> Vec<u8> {
    let section_count = sections.len();
    let section_dir_offset = HEADER_SIZE;
    let section_dir_bytes = section_count * SECTION_ENTRY_SIZE;
    let mut data_offset = align_offset(section_dir_offset + section_dir_bytes, 4);

    for section in &mut sections {
        section.offset = data_offset;
        data_offset = align_offset(data_offset + section.data.len(), 4);
    }

    let total_size = data_offset;
    let mut buffer = vec![0u8; total_size];

    buffer[0..4].copy_from_slice(&SRF_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, INDEXED_RULESET_FORMAT_VERSION as u16);
    write_u16_le(&mut buffer, header::FLAGS, header_flags::HAS_CRC32);
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::SECTION_COUNT, section_count as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_OFFSET, section_dir_offset as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_BYTES, section_dir_bytes as u32);
    write_u32_le(&mut buffer, header::RULE_COUNT, rule_count);

    for (index, section) in sections.iter().enumerate() {
        let entry_offset = section_dir_offset + index * SECTION_ENTRY_SIZE;
        write_u16_le(&mut buffer, entry_offset + section_entry::ID, section.id as u16);
        write_u16_le(&mut buffer, entry_offset + section_entry::FLAGS, 0);
        write_u32_le(&mut buffer, entry_offset + section_entry::OFFSET, section.offset as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::LENGTH, section.data.len() as u32);

        let end = section.offset + section.data.len();
        buffer[section.offset..end].copy_from_slice(&section.data);
    }

    let crc = compute_crc32(&buffer);
    write_u32_le(&mut buffer, header::RULESET_CRC32, crc);
    buffer
}

// =============================================================================
// String Pool
// =============================================================================

struct StringPool {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> (u32, u32) {
        if let Some(&offset) = self.index.get(s) {
            return (offset, s.len() as u32);
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.index.insert(s.to_string(), offset);
        (offset, s.len() as u32)
    }

    fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

// =============================================================================
// N-gram Index
// =============================================================================

#[derive(Default)]
struct PatternIndexBuilder {
    ngrams: HashMap<u64, Vec<u32>>,
    fallback: Vec<u32>,
    rule_count: u32,
}

impl PatternIndexBuilder {
    fn insert(&mut self, rule_id: u32, rule: &UrlRule) {
        self.rule_count += 1;

        let best = if rule.pattern_type == UrlPatternType::Regexp {
            None
        } else {
            literal_ngrams(rule.pattern.as_bytes(), rule.pattern_type)
                .min_by_key(|ngram| self.ngrams.get(ngram).map_or(0, Vec::len))
        };

        match best {
            Some(ngram) => self.ngrams.entry(ngram).or_default().push(rule_id),
            None => self.fallback.push(rule_id),
        }
    }

    fn build(&self) -> Vec<u8> {
        let capacity = table_capacity(self.ngrams.len());

        let mut entries: Vec<(&u64, &Vec<u32>)> = self.ngrams.iter().collect();
        entries.sort_unstable_by_key(|(ngram, _)| **ngram);

        let mut postings = Vec::new();
        let mut slots = vec![0u8; capacity * NGRAM_SLOT_SIZE];
        let mask = capacity.wrapping_sub(1);

        for (&ngram, rule_ids) in entries {
            let postings_off = postings.len() as u32;
            encode_posting_list(&mut postings, rule_ids);

            let mut idx = (hash_ngram(ngram, NGRAM_SEED) as usize) & mask;
            loop {
                let slot = idx * NGRAM_SLOT_SIZE;
                let occupied = slots[slot..slot + 8].iter().any(|&b| b != 0);
                if !occupied {
                    write_u32_le(&mut slots, slot + ngram_slot::NGRAM_LO, ngram as u32);
                    write_u32_le(&mut slots, slot + ngram_slot::NGRAM_HI, (ngram >> 32) as u32);
                    write_u32_le(&mut slots, slot + ngram_slot::POSTINGS_OFF, postings_off);
                    write_u32_le(&mut slots, slot + ngram_slot::RULE_COUNT, rule_ids.len() as u32);
                    break;
                }
                idx = (idx + 1) & mask;
            }
        }

        let mut buf = vec![0u8; INDEX_HEADER_SIZE];
        write_u32_le(&mut buf, index_header::CAPACITY, capacity as u32);
        write_u32_le(&mut buf, index_header::ENTRY_COUNT, self.ngrams.len() as u32);
        write_u32_le(&mut buf, index_header::SEED, NGRAM_SEED);
        write_u32_le(&mut buf, index_header::FALLBACK_COUNT, self.fallback.len() as u32);
        write_u32_le(&mut buf, index_header::POSTINGS_BYTES, postings.len() as u32);
        write_u32_le(&mut buf, index_header::RULE_COUNT, self.rule_count);
        buf.extend_from_slice(&slots);
        for rule_id in &self.fallback {
            buf.extend_from_slice(&rule_id.to_le_bytes());
        }
        buf.extend_from_slice(&postings);
        buf
    }
}

/// All n-grams fully inside the literal parts of a pattern.
fn literal_ngrams(pattern: &[u8], pattern_type: UrlPatternType) -> impl Iterator<Item = u64> + '_ {
    let wildcarded = pattern_type == UrlPatternType::Wildcarded;
    pattern
        .split(move |&b| wildcarded && (b == b'*' || b == b'^'))
        .flat_map(|piece| piece.windows(NGRAM_SIZE))
        .filter_map(pack_ngram)
}
