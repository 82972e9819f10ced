use std::collections::HashSet;

use srf_core::types::UrlRule;

use crate::parser::ParsedRule;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub badfilter_rules: usize,
    pub badfiltered_rules: usize,
}

/// Apply `badfilter` cancellation, then drop exact duplicates.
/// Order of the surviving rules is preserved.
pub fn optimize_rules(rules: Vec<ParsedRule>) -> (Vec<UrlRule>, OptimizeStats) {
    let before = rules.len();

    let badfilter_keys: HashSet<UrlRule> = rules
        .iter()
        .filter(|parsed| parsed.badfilter)
        .map(|parsed| parsed.rule.clone())
        .collect();
    let badfilter_rules = rules.iter().filter(|parsed| parsed.badfilter).count();

    let mut badfiltered_rules = 0usize;
    let mut deduped = 0usize;
    let mut seen: HashSet<UrlRule> = HashSet::new();
    let mut out = Vec::with_capacity(rules.len());

    for parsed in rules {
        if parsed.badfilter {
            continue;
        }
        if badfilter_keys.contains(&parsed.rule) {
            badfiltered_rules += 1;
            continue;
        }
        if seen.contains(&parsed.rule) {
            deduped += 1;
            continue;
        }
        seen.insert(parsed.rule.clone());
        out.push(parsed.rule);
    }

    let stats = OptimizeStats {
        before,
        after: out.len(),
        deduped,
        badfilter_rules,
        badfiltered_rules,
    };
    (out, stats)
}
