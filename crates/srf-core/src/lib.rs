//! Subresource Filter Core Library
//!
//! This crate provides the rule model, the indexed ruleset binary format and
//! the matcher that evaluates subresource loads against it.
//!
//! # Architecture
//!
//! Filter lists are compiled once into an immutable indexed ruleset (SRF
//! format) holding two n-gram hash indexes, one for blacklist and one for
//! whitelist rules. Consumers memory-map that buffer read-only and query it
//! through zero-copy, bounds-checked views.
//!
//! # Modules
//!
//! - `types`: Rule model shared by the indexer and the matcher
//! - `hash`: N-gram packing, Murmur3 slot hashing, CRC32
//! - `url`: URL helpers for the matching hot path
//! - `psl`: Registrable-domain extraction for first/third-party checks
//! - `ruleset`: SRF format, zero-copy loader, verification, memory mapping
//! - `pattern`: URL pattern matching with anchors and wildcards
//! - `first_party`: Cached first/third-party classification
//! - `matcher`: Document and resource load queries
//! - `activation`: Activation state, configuration and decision

pub mod activation;
pub mod first_party;
pub mod hash;
pub mod matcher;
pub mod pattern;
pub mod psl;
pub mod ruleset;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use activation::{ActivationConfig, ActivationList, ActivationScope, ActivationState};
pub use first_party::FirstPartyOrigin;
pub use matcher::IndexedRulesetMatcher;
pub use ruleset::{IndexedRuleset, MemoryMappedRuleset, RulesetError, INDEXED_RULESET_FORMAT_VERSION};
pub use types::{
    ActivationTypes, AnchorType, DomainCondition, ElementTypes, PartyRestriction, RuleSemantics, UrlPatternType,
    UrlRule,
};
