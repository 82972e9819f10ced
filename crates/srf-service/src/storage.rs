//! On-disk ruleset store
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/<format_version>/<content_version>/ruleset.dat
//! <base>/<format_version>/<content_version>/LICENSE
//! <base>/<format_version>/<content_version>/.sentinel   (only while indexing)
//! ```
//!
//! A sentinel that survives a crash marks the version as poisoned: it is
//! never indexed again and never garbage-collected.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use srf_core::hash::crc32;
use srf_core::MemoryMappedRuleset;
use srf_indexer::{index_filter_list, read_filter_list};

use crate::version::{
    IndexedRulesetVersion, UnindexedRulesetInfo, LICENSE_FILE_NAME, RULESET_DATA_FILE_NAME, SENTINEL_FILE_NAME,
};

/// Why indexing a ruleset version did not produce a published file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum IndexingError {
    #[error("failed to create the version directory")]
    FailedCreatingVersionDir,
    #[error("a sentinel from an earlier attempt is present")]
    AbortedBecauseSentinelFilePresent,
    #[error("failed to create the sentinel file")]
    FailedCreatingSentinelFile,
    #[error("failed to open the unindexed ruleset")]
    FailedOpeningUnindexedRuleset,
    #[error("failed to parse the unindexed ruleset")]
    FailedParsingUnindexedRuleset,
    #[error("failed to delete the sentinel file")]
    FailedDeletingSentinelFile,
    #[error("failed to create the scratch directory")]
    FailedCreatingScratchDir,
    #[error("failed to write the indexed ruleset")]
    FailedWritingRulesetData,
    #[error("failed to write the license file")]
    FailedWritingLicense,
    #[error("failed to delete the preexisting version directory")]
    FailedDeletePreexisting,
    #[error("failed to move the scratch directory into place")]
    FailedReplaceFile,
}

/// Index `info` and store it under `base_dir`.
///
/// On success returns the stored version with its checksum filled in.
/// Blocking; runs on the service worker.
pub fn index_and_write_ruleset(
    base_dir: &Path,
    info: &UnindexedRulesetInfo,
    format_version: u32,
) -> Result<IndexedRulesetVersion, IndexingError> {
    let mut version = IndexedRulesetVersion::new(info.content_version.clone(), format_version);
    let version_dir = version.subdirectory_path(base_dir);

    // Open before touching the store; an unreadable source must not leave a
    // sentinel behind.
    let mut unindexed = File::open(&info.ruleset_path).map_err(|e| {
        log::warn!("Cannot open {}: {}", info.ruleset_path.display(), e);
        IndexingError::FailedOpeningUnindexedRuleset
    })?;

    fs::create_dir_all(&version_dir).map_err(|e| {
        log::warn!("Cannot create {}: {}", version_dir.display(), e);
        IndexingError::FailedCreatingVersionDir
    })?;

    let sentinel = version.sentinel_path(base_dir);
    if sentinel.exists() {
        log::warn!(
            "Ruleset {} crashed the indexer before, not retrying",
            version.content_version
        );
        return Err(IndexingError::AbortedBecauseSentinelFilePresent);
    }
    File::create(&sentinel).map_err(|e| {
        log::warn!("Cannot create sentinel {}: {}", sentinel.display(), e);
        IndexingError::FailedCreatingSentinelFile
    })?;

    // Failures from here until the sentinel is removed leave it behind.
    let list = read_filter_list(&mut unindexed).map_err(|e| {
        log::warn!("Cannot parse {}: {}", info.ruleset_path.display(), e);
        IndexingError::FailedParsingUnindexedRuleset
    })?;
    let stats = list.stats;
    let (indexer, rejected) = index_filter_list(list);
    log::info!(
        "Indexed ruleset {}: {} rules, {} rejected, {} unsupported lines, {} bytes",
        version.content_version,
        indexer.rule_count(),
        rejected,
        stats.unsupported,
        indexer.size()
    );

    fs::remove_file(&sentinel).map_err(|e| {
        log::warn!("Cannot delete sentinel {}: {}", sentinel.display(), e);
        IndexingError::FailedDeletingSentinelFile
    })?;

    let data = indexer.into_data();
    version.checksum = crc32(&data);
    write_ruleset(base_dir, &version, &data, info.license_path.as_deref())?;
    Ok(version)
}

/// Write into a scratch directory, then swap it in for the version directory.
fn write_ruleset(
    base_dir: &Path,
    version: &IndexedRulesetVersion,
    data: &[u8],
    license_source: Option<&Path>,
) -> Result<(), IndexingError> {
    let format_dir = IndexedRulesetVersion::format_dir(base_dir, version.format_version);
    let scratch = tempfile::Builder::new()
        .prefix(".scratch")
        .tempdir_in(&format_dir)
        .map_err(|e| {
            log::warn!("Cannot create scratch dir in {}: {}", format_dir.display(), e);
            IndexingError::FailedCreatingScratchDir
        })?;

    fs::write(scratch.path().join(RULESET_DATA_FILE_NAME), data).map_err(|e| {
        log::warn!("Cannot write ruleset data: {}", e);
        IndexingError::FailedWritingRulesetData
    })?;

    if let Some(source) = license_source {
        if source.exists() {
            fs::copy(source, scratch.path().join(LICENSE_FILE_NAME)).map_err(|e| {
                log::warn!("Cannot copy license {}: {}", source.display(), e);
                IndexingError::FailedWritingLicense
            })?;
        } else {
            log::debug!("No license file at {}", source.display());
        }
    }

    let version_dir = version.subdirectory_path(base_dir);
    if version_dir.exists() {
        fs::remove_dir_all(&version_dir).map_err(|e| {
            log::warn!("Cannot delete {}: {}", version_dir.display(), e);
            IndexingError::FailedDeletePreexisting
        })?;
    }

    // The TempDir guard removes the scratch directory if the rename fails.
    fs::rename(scratch.path(), &version_dir).map_err(|e| {
        log::warn!("Cannot move scratch dir to {}: {}", version_dir.display(), e);
        IndexingError::FailedReplaceFile
    })?;
    Ok(())
}

/// Open a stored ruleset read-only and check it against `version.checksum`.
///
/// On Windows the handle allows concurrent deletion so garbage collection
/// of an older version is not blocked by consumers still holding it.
pub fn open_ruleset(base_dir: &Path, version: &IndexedRulesetVersion) -> io::Result<File> {
    let path = version.ruleset_data_path(base_dir);
    let file = open_read_only_share_delete(&path)?;
    if version.checksum != 0 {
        let mapped = MemoryMappedRuleset::map(&file)?;
        let actual = crc32(mapped.data());
        if actual != version.checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "checksum mismatch for {}: expected {:#010x}, found {:#010x}",
                    path.display(),
                    version.checksum,
                    actual
                ),
            ));
        }
    }
    Ok(file)
}

fn open_read_only_share_delete(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        // FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE
        options.share_mode(0x1 | 0x2 | 0x4);
    }
    options.open(path)
}

/// Remove every stored version except `active` and poisoned ones.
///
/// Format directories other than `format_version` are removed whole.
/// Entries whose names are not decimal numbers are left alone.
pub fn delete_obsolete_rulesets(
    base_dir: &Path,
    format_version: u32,
    active: &IndexedRulesetVersion,
) -> io::Result<usize> {
    let entries = match fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0usize;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(format) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };

        if format != format_version {
            log::debug!("Removing obsolete format directory {}", entry.path().display());
            fs::remove_dir_all(entry.path())?;
            removed += 1;
            continue;
        }

        for version_entry in fs::read_dir(entry.path())? {
            let version_entry = version_entry?;
            let path = version_entry.path();
            if !version_entry.file_type()?.is_dir() {
                continue;
            }
            let is_active = active.format_version == format_version
                && version_entry.file_name().to_str() == Some(active.content_version.as_str());
            if is_active || path.join(SENTINEL_FILE_NAME).exists() {
                continue;
            }
            log::debug!("Removing obsolete ruleset {}", path.display());
            fs::remove_dir_all(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use srf_core::IndexedRuleset;
    use std::path::PathBuf;

    const FORMAT: u32 = 1;

    fn write_list(dir: &Path, name: &str, text: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_index_and_write_layout() {
        let base = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let list = write_list(src.path(), "list.txt", b"||ads.example^\n/banner.gif\n");
        let license = write_list(src.path(), "LICENSE.txt", b"public domain\n");
        let info = UnindexedRulesetInfo::new("1.0", &list).with_license(&license);

        let version = index_and_write_ruleset(base.path(), &info, FORMAT).unwrap();
        assert_eq!(version.content_version, "1.0");
        assert_eq!(version.format_version, FORMAT);
        assert_ne!(version.checksum, 0);

        let dir = version.subdirectory_path(base.path());
        assert_eq!(dir_names(&dir), vec!["LICENSE", "ruleset.dat"]);
        assert_eq!(dir_names(&base.path().join("1")), vec!["1.0"]);
        assert_eq!(fs::read(dir.join("LICENSE")).unwrap(), b"public domain\n");

        let data = fs::read(dir.join("ruleset.dat")).unwrap();
        IndexedRuleset::verify(&data).unwrap();
        assert_eq!(crc32(&data), version.checksum);
    }

    #[test]
    fn test_missing_license_is_skipped() {
        let base = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let list = write_list(src.path(), "list.txt", b"/ads.js\n");
        let info = UnindexedRulesetInfo::new("2", &list).with_license(src.path().join("nope"));

        let version = index_and_write_ruleset(base.path(), &info, FORMAT).unwrap();
        assert_eq!(dir_names(&version.subdirectory_path(base.path())), vec!["ruleset.dat"]);
    }

    #[test]
    fn test_sentinel_aborts() {
        let base = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let list = write_list(src.path(), "list.txt", b"/ads.js\n");
        let info = UnindexedRulesetInfo::new("3", &list);

        let version = IndexedRulesetVersion::new("3", FORMAT);
        fs::create_dir_all(version.subdirectory_path(base.path())).unwrap();
        File::create(version.sentinel_path(base.path())).unwrap();

        assert_eq!(
            index_and_write_ruleset(base.path(), &info, FORMAT),
            Err(IndexingError::AbortedBecauseSentinelFilePresent)
        );
        assert!(!version.ruleset_data_path(base.path()).exists());
        assert!(version.sentinel_path(base.path()).exists());
    }

    #[test]
    fn test_parse_failure_leaves_sentinel() {
        let base = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let list = write_list(src.path(), "list.txt", b"/ads.js\n\xff\xfe\n");
        let info = UnindexedRulesetInfo::new("4", &list);

        assert_eq!(
            index_and_write_ruleset(base.path(), &info, FORMAT),
            Err(IndexingError::FailedParsingUnindexedRuleset)
        );
        let version = IndexedRulesetVersion::new("4", FORMAT);
        assert!(version.sentinel_path(base.path()).exists());

        // A second attempt is refused.
        assert_eq!(
            index_and_write_ruleset(base.path(), &info, FORMAT),
            Err(IndexingError::AbortedBecauseSentinelFilePresent)
        );
    }

    #[test]
    fn test_missing_unindexed_ruleset() {
        let base = tempfile::tempdir().unwrap();
        let info = UnindexedRulesetInfo::new("5", base.path().join("does-not-exist.txt"));
        assert_eq!(
            index_and_write_ruleset(base.path(), &info, FORMAT),
            Err(IndexingError::FailedOpeningUnindexedRuleset)
        );
        let version = IndexedRulesetVersion::new("5", FORMAT);
        assert!(!version.sentinel_path(base.path()).exists());
        assert!(!version.subdirectory_path(base.path()).exists());

        // Once the file shows up the same version indexes normally.
        fs::write(&info.ruleset_path, b"/ads.js\n").unwrap();
        let indexed = index_and_write_ruleset(base.path(), &info, FORMAT).unwrap();
        assert_eq!(indexed.content_version, "5");
        assert!(!version.sentinel_path(base.path()).exists());
        assert!(indexed.ruleset_data_path(base.path()).exists());
    }

    #[test]
    fn test_replaces_preexisting_directory() {
        let base = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let list = write_list(src.path(), "list.txt", b"/ads.js\n");
        let version = IndexedRulesetVersion::new("6", FORMAT);
        let dir = version.subdirectory_path(base.path());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("junk"), b"leftover").unwrap();

        index_and_write_ruleset(base.path(), &UnindexedRulesetInfo::new("6", &list), FORMAT).unwrap();
        assert_eq!(dir_names(&dir), vec!["ruleset.dat"]);
        // No scratch directories left behind.
        assert_eq!(dir_names(&base.path().join("1")), vec!["6"]);
    }

    #[test]
    fn test_open_ruleset_checks_checksum() {
        let base = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let list = write_list(src.path(), "list.txt", b"/ads.js\n");
        let version = index_and_write_ruleset(base.path(), &UnindexedRulesetInfo::new("7", &list), FORMAT).unwrap();

        assert!(open_ruleset(base.path(), &version).is_ok());

        let mut wrong = version.clone();
        wrong.checksum ^= 1;
        let err = open_ruleset(base.path(), &wrong).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // Zero means unknown and skips the check.
        wrong.checksum = 0;
        assert!(open_ruleset(base.path(), &wrong).is_ok());

        let missing = IndexedRulesetVersion::new("nope", FORMAT);
        assert_eq!(open_ruleset(base.path(), &missing).unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_obsolete_rulesets() {
        let base = tempfile::tempdir().unwrap();
        let b = base.path();
        for dir in ["0/a", "2/b", "1/old", "1/poisoned", "1/current", "notes"] {
            fs::create_dir_all(b.join(dir)).unwrap();
        }
        File::create(b.join("1/poisoned/.sentinel")).unwrap();
        fs::write(b.join("prefs.json"), b"{}").unwrap();
        fs::write(b.join("1/stray-file"), b"").unwrap();

        let active = IndexedRulesetVersion::new("current", FORMAT);
        let removed = delete_obsolete_rulesets(b, FORMAT, &active).unwrap();
        assert_eq!(removed, 3);

        assert_eq!(dir_names(b), vec!["1", "notes", "prefs.json"]);
        assert_eq!(dir_names(&b.join("1")), vec!["current", "poisoned", "stray-file"]);
    }

    #[test]
    fn test_delete_obsolete_without_active() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("1/x")).unwrap();
        let removed = delete_obsolete_rulesets(base.path(), FORMAT, &IndexedRulesetVersion::default()).unwrap();
        assert_eq!(removed, 1);
        assert!(dir_names(&base.path().join("1")).is_empty());

        let missing = base.path().join("missing");
        assert_eq!(delete_obsolete_rulesets(&missing, FORMAT, &IndexedRulesetVersion::default()).unwrap(), 0);
    }
}
