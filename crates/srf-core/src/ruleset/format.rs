//! Indexed Ruleset Format v1 Constants
//!
//! All values are little-endian.

/// Magic bytes: "SRF1"
pub const SRF_MAGIC: [u8; 4] = [0x53, 0x52, 0x46, 0x31];

/// Current on-disk format version. Bumping it invalidates every stored
/// ruleset and moves the versioned store to a fresh directory.
pub const INDEXED_RULESET_FORMAT_VERSION: u32 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Section directory entry size
pub const SECTION_ENTRY_SIZE: usize = 24;

// =============================================================================
// Header Field Offsets
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "SRF1"
    pub const MAGIC: usize = 0;
    /// u16 format version
    pub const VERSION: usize = 4;
    /// u16 flags
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 64)
    pub const HEADER_BYTES: usize = 8;
    /// u32 sectionCount
    pub const SECTION_COUNT: usize = 12;
    /// u32 sectionDirOffset
    pub const SECTION_DIR_OFFSET: usize = 16;
    /// u32 sectionDirBytes
    pub const SECTION_DIR_BYTES: usize = 20;
    /// u32 ruleCount
    pub const RULE_COUNT: usize = 24;
    /// u32 rulesetCrc32
    pub const RULESET_CRC32: usize = 28;
}

/// Header flags.
pub mod header_flags {
    /// Ruleset includes CRC32 checksum
    pub const HAS_CRC32: u16 = 1 << 0;
}

// =============================================================================
// Section Directory Entry Offsets
// =============================================================================

pub mod section_entry {
    /// u16 section id
    pub const ID: usize = 0;
    /// u16 flags
    pub const FLAGS: usize = 2;
    /// u32 file offset
    pub const OFFSET: usize = 4;
    /// u32 byte length
    pub const LENGTH: usize = 8;
}

// =============================================================================
// Section IDs
// =============================================================================

/// Section type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionId {
    /// String pool for pattern text and domains
    StrPool = 0x0001,
    /// Fixed-size rule records
    Rules = 0x0002,
    /// Domain condition entries referenced by rules
    DomainPool = 0x0003,
    /// N-gram index over blacklist rules
    BlacklistIndex = 0x0004,
    /// N-gram index over whitelist rules
    WhitelistIndex = 0x0005,
}

impl SectionId {
    pub const ALL: [SectionId; 5] = [
        Self::StrPool,
        Self::Rules,
        Self::DomainPool,
        Self::BlacklistIndex,
        Self::WhitelistIndex,
    ];
}

impl TryFrom<u16> for SectionId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::StrPool),
            0x0002 => Ok(Self::Rules),
            0x0003 => Ok(Self::DomainPool),
            0x0004 => Ok(Self::BlacklistIndex),
            0x0005 => Ok(Self::WhitelistIndex),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Rule Record Layout
// =============================================================================

/// Rules section header size (u32 count)
pub const RULES_HEADER_SIZE: usize = 4;

/// Rule record size
pub const RULE_RECORD_SIZE: usize = 24;

pub mod rule_record {
    /// u8 RuleOptions bits
    pub const OPTIONS: usize = 0;
    /// u8 UrlPatternType
    pub const PATTERN_TYPE: usize = 1;
    /// u8 AnchorType (left)
    pub const ANCHOR_LEFT: usize = 2;
    /// u8 AnchorType (right)
    pub const ANCHOR_RIGHT: usize = 3;
    /// u16 ElementTypes bits
    pub const ELEMENT_TYPES: usize = 4;
    /// u8 ActivationTypes bits
    pub const ACTIVATION_TYPES: usize = 6;
    /// u32 pattern string offset in StrPool
    pub const PATTERN_OFF: usize = 8;
    /// u32 pattern string length
    pub const PATTERN_LEN: usize = 12;
    /// u32 first DomainPool entry
    pub const DOMAINS_START: usize = 16;
    /// u32 DomainPool entry count
    pub const DOMAINS_COUNT: usize = 20;
}

// =============================================================================
// Domain Pool Layout
// =============================================================================

/// Domain pool header size (u32 count)
pub const DOMAIN_POOL_HEADER_SIZE: usize = 4;

/// Domain entry size
pub const DOMAIN_ENTRY_SIZE: usize = 12;

pub mod domain_entry {
    /// u32 string offset in StrPool
    pub const STR_OFF: usize = 0;
    /// u32 string length
    pub const STR_LEN: usize = 4;
    /// u32 flags
    pub const FLAGS: usize = 8;
}

/// Domain entry flags.
pub mod domain_flags {
    /// `~domain` condition
    pub const EXCLUDE: u32 = 1 << 0;
}

// =============================================================================
// N-gram Index Layout
// =============================================================================

/// Index section header size
pub const INDEX_HEADER_SIZE: usize = 24;

/// Index header field offsets.
pub mod index_header {
    /// u32 table capacity (0 or a power of two)
    pub const CAPACITY: usize = 0;
    /// u32 occupied slots
    pub const ENTRY_COUNT: usize = 4;
    /// u32 hash seed
    pub const SEED: usize = 8;
    /// u32 fallback rule count
    pub const FALLBACK_COUNT: usize = 12;
    /// u32 posting bytes length
    pub const POSTINGS_BYTES: usize = 16;
    /// u32 total rules in this index
    pub const RULE_COUNT: usize = 20;
}

/// N-gram table slot size (ngram lo, ngram hi, postings offset, posting count)
pub const NGRAM_SLOT_SIZE: usize = 16;

pub mod ngram_slot {
    pub const NGRAM_LO: usize = 0;
    pub const NGRAM_HI: usize = 4;
    pub const POSTINGS_OFF: usize = 8;
    pub const RULE_COUNT: usize = 12;
}

/// Target load factor of the n-gram tables.
pub const NGRAM_TABLE_LOAD_FACTOR: f64 = 0.7;

// =============================================================================
// Helpers
// =============================================================================

/// Align offset to boundary.
#[inline]
pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Validate magic bytes.
#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == SRF_MAGIC
}

/// Read u8, `None` when out of bounds.
#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

/// Read u16 little-endian, `None` when out of bounds.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read u32 little-endian, `None` when out of bounds.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Write u16 little-endian. Panics if out of bounds; only used by builders
/// on buffers they sized themselves.
#[inline]
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write u32 little-endian, see `write_u16_le`.
#[inline]
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Capacity for an open-addressing table holding `count` entries.
pub fn table_capacity(count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let target = ((count as f64) / NGRAM_TABLE_LOAD_FACTOR).ceil() as usize;
    target.next_power_of_two().max(2)
}

// =============================================================================
// Varint Codec
// =============================================================================

/// Append one unsigned LEB128 varint.
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode a single unsigned LEB128 varint.
/// Returns (value, bytes_read), or `None` when truncated or overlong.
pub fn decode_varint(data: &[u8], offset: usize) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut shift = 0;
    let mut bytes_read = 0;

    loop {
        let byte = *data.get(offset + bytes_read)?;
        bytes_read += 1;

        if shift == 28 && byte & 0x70 != 0 {
            return None;
        }
        result |= ((byte & 0x7f) as u32) << shift;

        if byte & 0x80 == 0 {
            return Some((result, bytes_read));
        }

        shift += 7;
        if shift > 28 {
            return None;
        }
    }
}

/// Append a delta-encoded posting list. Ids must be ascending.
pub fn encode_posting_list(buf: &mut Vec<u8>, rule_ids: &[u32]) {
    let mut prev = 0u32;
    for &id in rule_ids {
        encode_varint(buf, id.wrapping_sub(prev));
        prev = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_offset() {
        assert_eq!(align_offset(0, 4), 0);
        assert_eq!(align_offset(1, 4), 4);
        assert_eq!(align_offset(8, 4), 8);
    }

    #[test]
    fn test_bounds_checked_reads() {
        let data = [1u8, 0, 0, 0, 2];
        assert_eq!(read_u32_le(&data, 0), Some(1));
        assert_eq!(read_u32_le(&data, 2), None);
        assert_eq!(read_u16_le(&data, 4), None);
        assert_eq!(read_u32_le(&data, usize::MAX - 1), None);
        assert_eq!(read_u8(&data, 4), Some(2));
    }

    #[test]
    fn test_varint_values() {
        for value in [0u32, 1, 127, 128, 300, 16_384, u32::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, value);
            assert_eq!(decode_varint(&buf, 0), Some((value, buf.len())));
        }
    }

    #[test]
    fn test_varint_rejects_truncated_and_overlong() {
        assert_eq!(decode_varint(&[0x80], 0), None);
        assert_eq!(decode_varint(&[0xff, 0xff, 0xff, 0xff, 0x7f], 0), None);
        assert_eq!(decode_varint(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01], 0), None);
    }

    #[test]
    fn test_table_capacity() {
        assert_eq!(table_capacity(0), 0);
        assert_eq!(table_capacity(1), 2);
        assert_eq!(table_capacity(7), 16);
        assert!(table_capacity(100) >= 143);
    }
}
