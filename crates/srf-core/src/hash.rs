//! Hash functions for the indexed ruleset
//!
//! N-grams are packed into a `u64` and hashed with Murmur3 32-bit to select
//! a slot in the open-addressing tables. CRC32 protects the whole file.
//!
//! # Sentinel Handling
//!
//! Empty slot sentinel in n-gram tables is `ngram == 0`. No n-gram is ever
//! zero because windows containing a NUL byte are never indexed.

/// Number of bytes in one n-gram.
pub const NGRAM_SIZE: usize = 5;

/// Seed used for n-gram slot hashing. Stored in each index header.
pub const NGRAM_SEED: u32 = 0x9e3779b9; // Golden ratio

/// Murmur3 32-bit hash implementation.
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let len = data.len();
    let mut h = seed;
    let mut i = 0;

    // Process 4-byte chunks
    let chunks = (len >> 2) << 2;
    while i < chunks {
        let k = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe6546b64);

        i += 4;
    }

    // Process remaining bytes
    let mut k: u32 = 0;
    let remainder = len & 3;
    if remainder >= 3 {
        k ^= (data[i + 2] as u32) << 16;
    }
    if remainder >= 2 {
        k ^= (data[i + 1] as u32) << 8;
    }
    if remainder >= 1 {
        k ^= data[i] as u32;
        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);
        h ^= k;
    }

    // Finalization
    h ^= len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;

    h
}

/// Pack an n-gram window into a `u64`, lowercasing ASCII letters.
///
/// Returns `None` if the window is not exactly `NGRAM_SIZE` bytes or
/// contains a NUL byte.
#[inline]
pub fn pack_ngram(window: &[u8]) -> Option<u64> {
    if window.len() != NGRAM_SIZE {
        return None;
    }
    let mut ngram = 0u64;
    for (i, &b) in window.iter().enumerate() {
        if b == 0 {
            return None;
        }
        ngram |= (b.to_ascii_lowercase() as u64) << (8 * i);
    }
    Some(ngram)
}

/// Hash a packed n-gram for slot selection.
#[inline]
pub fn hash_ngram(ngram: u64, seed: u32) -> u32 {
    murmur3_32(&ngram.to_le_bytes()[..NGRAM_SIZE], seed)
}

/// Compute CRC32 for ruleset integrity checking.
/// Uses the standard CRC32 polynomial (IEEE 802.3).
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0, data)
}

/// Continue a CRC32 computation over another chunk.
pub fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    static CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 { 0xedb88320 ^ (c >> 1) } else { c >> 1 };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    let mut crc = crc ^ 0xffffffff;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    crc ^ 0xffffffff
}
