//! Persisted preferences
//!
//! A small key/value store holding the most recently indexed ruleset
//! version. Values are JSON so both stores share one representation.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("Failed to access preference file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed preference file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to replace preference file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Key/value preference storage owned by the ruleset service.
pub trait PrefStore: Send {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
    /// Make pending writes durable.
    fn commit(&mut self) -> Result<(), PrefsError>;

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key)?.as_u64().and_then(|v| u32::try_from(v).ok())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Preferences kept in memory. Clones share the same values, which lets a
/// restarted service see what the previous instance wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPrefs {
    values: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl InMemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PrefStore for InMemoryPrefs {
    fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values().insert(key.to_string(), value);
    }

    fn commit(&mut self) -> Result<(), PrefsError> {
        Ok(())
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// Preferences persisted as one JSON object on disk.
#[derive(Debug)]
pub struct JsonFilePrefs {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl JsonFilePrefs {
    /// Load the file, or start empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PrefStore for JsonFilePrefs {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Writes a temporary file next to the target and renames it into place.
    fn commit(&mut self) -> Result<(), PrefsError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.values)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_clones_share_values() {
        let mut prefs = InMemoryPrefs::new();
        let other = prefs.clone();
        prefs.set("a", json!("x"));
        prefs.set("b", json!(7));
        assert_eq!(other.get_string("a").as_deref(), Some("x"));
        assert_eq!(other.get_u32("b"), Some(7));
        assert_eq!(other.get_u32("a"), None);
        assert_eq!(other.get_string("missing"), None);
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let mut prefs = JsonFilePrefs::open(&path).unwrap();
        assert_eq!(prefs.get("k"), None);
        prefs.set("k", json!("v"));
        prefs.set("n", json!(3));
        prefs.commit().unwrap();

        let reopened = JsonFilePrefs::open(&path).unwrap();
        assert_eq!(reopened.get_string("k").as_deref(), Some("v"));
        assert_eq!(reopened.get_u32("n"), Some(3));
    }

    #[test]
    fn test_json_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonFilePrefs::open(&path), Err(PrefsError::Json(_))));
    }

    #[test]
    fn test_u32_rejects_out_of_range() {
        let mut prefs = InMemoryPrefs::new();
        prefs.set("big", json!(u64::MAX));
        prefs.set("neg", json!(-1));
        assert_eq!(prefs.get_u32("big"), None);
        assert_eq!(prefs.get_u32("neg"), None);
    }
}
