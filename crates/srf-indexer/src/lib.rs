//! Subresource Filter Ruleset Indexer
//!
//! This crate turns Adblock-Plus style filter lists into the indexed ruleset
//! (SRF) binary format read by `srf-core`.

pub mod indexer;
pub mod optimizer;
pub mod parser;

pub use indexer::RulesetIndexer;
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_filter_list, read_filter_list, ParseError, ParseStats, ParsedFilterList, ParsedRule};

/// Parse, optimize and index a filter list in one go.
///
/// Returns the finished indexer together with the number of rules the
/// indexer rejected.
pub fn index_filter_list(list: ParsedFilterList) -> (RulesetIndexer, usize) {
    let (rules, stats) = optimize_rules(list.rules);
    log::debug!(
        "Optimized {} -> {} rules ({} duplicates, {} badfiltered)",
        stats.before,
        stats.after,
        stats.deduped,
        stats.badfiltered_rules
    );

    let mut indexer = RulesetIndexer::new();
    let rejected = rules.iter().filter(|rule| !indexer.add_url_rule(rule)).count();
    indexer.finish();
    (indexer, rejected)
}
