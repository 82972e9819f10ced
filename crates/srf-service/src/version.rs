//! Ruleset version identifiers

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use srf_core::INDEXED_RULESET_FORMAT_VERSION;

use crate::prefs::PrefStore;

pub mod pref_keys {
    pub const CONTENT_VERSION: &str = "subresource_filter.ruleset_version.content";
    pub const FORMAT_VERSION: &str = "subresource_filter.ruleset_version.format";
    pub const CHECKSUM: &str = "subresource_filter.ruleset_version.checksum";
}

pub const RULESET_DATA_FILE_NAME: &str = "ruleset.dat";
pub const LICENSE_FILE_NAME: &str = "LICENSE";
pub const SENTINEL_FILE_NAME: &str = ".sentinel";

/// Identifies one indexed ruleset directory on disk.
///
/// `content_version` is trusted to change whenever the rule content does.
/// `checksum` is the CRC32 of the indexed data; 0 means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexedRulesetVersion {
    pub content_version: String,
    pub format_version: u32,
    #[serde(default)]
    pub checksum: u32,
}

impl IndexedRulesetVersion {
    pub fn new(content_version: impl Into<String>, format_version: u32) -> Self {
        Self {
            content_version: content_version.into(),
            format_version,
            checksum: 0,
        }
    }

    pub fn current_format_version() -> u32 {
        INDEXED_RULESET_FORMAT_VERSION
    }

    pub fn is_valid(&self) -> bool {
        self.format_version != 0 && !self.content_version.is_empty()
    }

    pub fn is_current_format_version(&self) -> bool {
        self.format_version == Self::current_format_version()
    }

    /// Missing or mistyped keys read as an invalid version.
    pub fn read_from_prefs(prefs: &dyn PrefStore) -> Self {
        Self {
            content_version: prefs.get_string(pref_keys::CONTENT_VERSION).unwrap_or_default(),
            format_version: prefs.get_u32(pref_keys::FORMAT_VERSION).unwrap_or(0),
            checksum: prefs.get_u32(pref_keys::CHECKSUM).unwrap_or(0),
        }
    }

    pub fn save_to_prefs(&self, prefs: &mut dyn PrefStore) {
        prefs.set(pref_keys::CONTENT_VERSION, json!(self.content_version));
        prefs.set(pref_keys::FORMAT_VERSION, json!(self.format_version));
        prefs.set(pref_keys::CHECKSUM, json!(self.checksum));
    }

    /// `<base_dir>/<format_version>`
    pub fn format_dir(base_dir: &Path, format_version: u32) -> PathBuf {
        base_dir.join(format_version.to_string())
    }

    /// `<base_dir>/<format_version>/<content_version>`
    pub fn subdirectory_path(&self, base_dir: &Path) -> PathBuf {
        Self::format_dir(base_dir, self.format_version).join(&self.content_version)
    }

    pub fn ruleset_data_path(&self, base_dir: &Path) -> PathBuf {
        self.subdirectory_path(base_dir).join(RULESET_DATA_FILE_NAME)
    }

    pub fn license_path(&self, base_dir: &Path) -> PathBuf {
        self.subdirectory_path(base_dir).join(LICENSE_FILE_NAME)
    }

    pub fn sentinel_path(&self, base_dir: &Path) -> PathBuf {
        self.subdirectory_path(base_dir).join(SENTINEL_FILE_NAME)
    }
}

/// An unindexed ruleset as delivered by the rule source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnindexedRulesetInfo {
    pub content_version: String,
    pub ruleset_path: PathBuf,
    pub license_path: Option<PathBuf>,
}

impl UnindexedRulesetInfo {
    pub fn new(content_version: impl Into<String>, ruleset_path: impl Into<PathBuf>) -> Self {
        Self {
            content_version: content_version.into(),
            ruleset_path: ruleset_path.into(),
            license_path: None,
        }
    }

    pub fn with_license(mut self, license_path: impl Into<PathBuf>) -> Self {
        self.license_path = Some(license_path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::InMemoryPrefs;

    #[test]
    fn test_validity() {
        assert!(!IndexedRulesetVersion::default().is_valid());
        assert!(!IndexedRulesetVersion::new("", 1).is_valid());
        assert!(!IndexedRulesetVersion::new("1.2.3", 0).is_valid());
        assert!(IndexedRulesetVersion::new("1.2.3", 1).is_valid());
    }

    #[test]
    fn test_prefs_round_trip() {
        let mut prefs = InMemoryPrefs::new();
        assert_eq!(IndexedRulesetVersion::read_from_prefs(&prefs), IndexedRulesetVersion::default());

        let mut version = IndexedRulesetVersion::new("20240101.1", 1);
        version.checksum = 0xdeadbeef;
        version.save_to_prefs(&mut prefs);
        assert_eq!(IndexedRulesetVersion::read_from_prefs(&prefs), version);
    }

    #[test]
    fn test_paths() {
        let version = IndexedRulesetVersion::new("42", 3);
        let base = Path::new("/tmp/rulesets");
        assert_eq!(version.subdirectory_path(base), Path::new("/tmp/rulesets/3/42"));
        assert_eq!(version.ruleset_data_path(base), Path::new("/tmp/rulesets/3/42/ruleset.dat"));
        assert_eq!(version.sentinel_path(base), Path::new("/tmp/rulesets/3/42/.sentinel"));
        assert_eq!(version.license_path(base), Path::new("/tmp/rulesets/3/42/LICENSE"));
    }

    #[test]
    fn test_current_format() {
        let version = IndexedRulesetVersion::new("1", IndexedRulesetVersion::current_format_version());
        assert!(version.is_current_format_version());
        assert!(!IndexedRulesetVersion::new("1", 99).is_current_format_version());
    }
}
