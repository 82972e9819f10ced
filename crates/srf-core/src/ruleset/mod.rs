//! Indexed ruleset binary format and zero-copy loading

pub mod format;
pub mod loader;
pub mod mapped;

pub use format::*;
pub use loader::*;
pub use mapped::MemoryMappedRuleset;
