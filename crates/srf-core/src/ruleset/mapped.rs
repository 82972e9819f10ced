//! Read-only memory mapping of an indexed ruleset file

use std::fs::File;
use std::io;
use std::ops::Deref;

use memmap2::Mmap;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// Indexed ruleset bytes, either mapped from a file or owned.
///
/// Mapping is read-only. The file handle may be dropped right after
/// `map` returns; the mapping stays valid until this value is dropped.
pub struct MemoryMappedRuleset {
    backing: Backing,
}

impl MemoryMappedRuleset {
    /// Map a ruleset file. Empty files are represented as an empty owned buffer
    /// since zero-length mappings are not portable.
    pub fn map(file: &File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self::from_bytes(Vec::new()));
        }
        // SAFETY: the file is opened read-only by the owner of the versioned
        // store and never modified in place; new versions go to new paths.
        let mmap = unsafe { Mmap::map(file)? };
        log::debug!("Mapped indexed ruleset ({} bytes)", mmap.len());
        Ok(Self { backing: Backing::Mapped(mmap) })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { backing: Backing::Owned(data) }
    }

    pub fn data(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mmap) => mmap,
            Backing::Owned(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

impl Deref for MemoryMappedRuleset {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl std::fmt::Debug for MemoryMappedRuleset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backing {
            Backing::Mapped(_) => "mapped",
            Backing::Owned(_) => "owned",
        };
        f.debug_struct("MemoryMappedRuleset")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_map_file_contents() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"SRF1 payload").unwrap();
        let mapped = MemoryMappedRuleset::map(&file).unwrap();
        assert_eq!(mapped.data(), b"SRF1 payload");
        assert_eq!(mapped.len(), 12);
    }

    #[test]
    fn test_map_empty_file() {
        let file = tempfile::tempfile().unwrap();
        let mapped = MemoryMappedRuleset::map(&file).unwrap();
        assert!(mapped.is_empty());
    }

    #[test]
    fn test_mapping_outlives_file_handle() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"abc").unwrap();
        let mapped = MemoryMappedRuleset::map(&file).unwrap();
        drop(file);
        assert_eq!(&*mapped, b"abc");
    }
}
