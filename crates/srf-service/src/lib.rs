//! Subresource Filter Ruleset Service
//!
//! Indexes unindexed filter lists into a versioned on-disk store and
//! publishes the active indexed ruleset to distributors.
//!
//! # Modules
//!
//! - `prefs`: Persisted key/value preferences
//! - `version`: Ruleset version identifiers and store paths
//! - `storage`: Indexing, writing, opening and garbage collection
//! - `worker`: Sequenced blocking worker
//! - `distributor`: Publishing seam
//! - `service`: The service task and its handle

pub mod distributor;
pub mod prefs;
pub mod service;
pub mod storage;
pub mod version;
pub mod worker;

pub use distributor::RulesetDistributor;
pub use prefs::{InMemoryPrefs, JsonFilePrefs, PrefStore, PrefsError};
pub use service::{RulesetService, RulesetServiceConfig, RulesetServiceHandle, ServiceError, ServiceStats};
pub use storage::{delete_obsolete_rulesets, index_and_write_ruleset, open_ruleset, IndexingError};
pub use version::{IndexedRulesetVersion, UnindexedRulesetInfo};
