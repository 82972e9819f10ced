//! Indexed ruleset matcher
//!
//! This is the hot path - every subresource request goes through here.
//! Matching is read-only over the immutable ruleset buffer, so one buffer can
//! serve any number of matchers on any number of threads.

use url::{Origin, Url};

use crate::first_party::{is_third_party_url, FirstPartyOrigin};
use crate::pattern::UrlPattern;
use crate::ruleset::{IndexedRuleset, RuleView, RulesetError, UrlPatternIndex};
use crate::types::{ActivationTypes, ElementTypes, RuleOptions};
use crate::url::{host_matches_domain, host_range};

// =============================================================================
// Matcher
// =============================================================================

/// Query engine over one indexed ruleset buffer.
///
/// Construction only parses the header. Buffers from an untrusted source
/// must go through [`IndexedRulesetMatcher::verify`] first.
#[derive(Clone, Copy)]
pub struct IndexedRulesetMatcher<'a> {
    ruleset: IndexedRuleset<'a>,
}

/// Per-query conditions a candidate rule is checked against.
struct MatchQuery<'q> {
    url: &'q [u8],
    host: (usize, usize),
    initiator_host: Option<&'q str>,
    element_type: ElementTypes,
    activation_type: ActivationTypes,
    /// `None` when there is no document to compare against.
    third_party: Option<bool>,
    disable_generic_rules: bool,
}

impl<'a> IndexedRulesetMatcher<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, RulesetError> {
        Ok(Self { ruleset: IndexedRuleset::new(data)? })
    }

    /// Full structural validation; see [`IndexedRuleset::verify`].
    pub fn verify(data: &[u8]) -> Result<(), RulesetError> {
        IndexedRuleset::verify(data).map(|_| ())
    }

    pub fn ruleset(&self) -> &IndexedRuleset<'a> {
        &self.ruleset
    }

    /// Whether a whitelist rule of `activation_type` covers the document.
    ///
    /// `parent_origin` is the origin of the embedding document, `None` for
    /// main frames. Unspecified activation types never match.
    pub fn should_disable_filtering_for_document(
        &self,
        document_url: &Url,
        parent_origin: Option<&Origin>,
        activation_type: ActivationTypes,
    ) -> bool {
        if activation_type.is_empty() {
            return false;
        }

        let initiator_host = parent_origin.and_then(origin_host);
        let query = MatchQuery {
            url: document_url.as_str().as_bytes(),
            host: host_range(document_url),
            initiator_host: initiator_host.as_deref(),
            element_type: ElementTypes::empty(),
            activation_type,
            third_party: parent_origin.map(|origin| is_third_party_url(document_url, origin)),
            disable_generic_rules: false,
        };
        let matched = self.find_match(self.ruleset.whitelist_index(), &query);
        if let Some(rule_id) = matched {
            log::debug!(
                "Document {} matched whitelist rule {} for {:?}",
                document_url,
                rule_id,
                activation_type
            );
        }
        matched.is_some()
    }

    /// Whether a subresource load must be disallowed: some blacklist rule
    /// matches and no whitelist rule does.
    pub fn should_disallow_resource_load(
        &self,
        url: &Url,
        first_party: &mut FirstPartyOrigin,
        element_type: ElementTypes,
        disable_generic_rules: bool,
    ) -> bool {
        self.find_blocking_rule(url, first_party, element_type, disable_generic_rules)
            .is_some()
    }

    /// Like [`should_disallow_resource_load`](Self::should_disallow_resource_load),
    /// returning the id of the blacklist rule that blocks the load.
    pub fn find_blocking_rule(
        &self,
        url: &Url,
        first_party: &mut FirstPartyOrigin,
        element_type: ElementTypes,
        disable_generic_rules: bool,
    ) -> Option<u32> {
        if element_type.is_empty() {
            return None;
        }

        let third_party = first_party.is_third_party(url);
        let mut query = MatchQuery {
            url: url.as_str().as_bytes(),
            host: host_range(url),
            initiator_host: first_party.host(),
            element_type,
            activation_type: ActivationTypes::empty(),
            third_party: Some(third_party),
            disable_generic_rules,
        };

        let blocking = self.find_match(self.ruleset.blacklist_index(), &query)?;

        query.disable_generic_rules = false;
        if let Some(allowing) = self.find_match(self.ruleset.whitelist_index(), &query) {
            log::trace!("Blacklist rule {} overridden by whitelist rule {}", blocking, allowing);
            return None;
        }
        Some(blocking)
    }

    fn find_match(&self, index: UrlPatternIndex<'a>, query: &MatchQuery<'_>) -> Option<u32> {
        let rules = self.ruleset.rules();
        index.candidates(query.url).find(|&rule_id| {
            rules
                .get(rule_id)
                .is_some_and(|rule| rule_matches(&rule, query))
        })
    }
}

fn origin_host(origin: &Origin) -> Option<String> {
    match origin {
        Origin::Tuple(_, host, _) => Some(host.to_string()),
        Origin::Opaque(_) => None,
    }
}

// =============================================================================
// Rule Checks
// =============================================================================

fn rule_matches(rule: &RuleView<'_>, query: &MatchQuery<'_>) -> bool {
    if !flags_match(rule, query) {
        return false;
    }
    if query.disable_generic_rules && !rule.has_included_domains() {
        return false;
    }
    if !domains_match(rule, query.initiator_host) {
        return false;
    }
    UrlPattern::from_rule_view(rule).is_some_and(|pattern| pattern.matches(query.url, query.host))
}

fn flags_match(rule: &RuleView<'_>, query: &MatchQuery<'_>) -> bool {
    if !query.element_type.is_empty() && !rule.element_types().intersects(query.element_type) {
        return false;
    }
    if !query.activation_type.is_empty() && !rule.activation_types().intersects(query.activation_type) {
        return false;
    }

    let options = rule.options();
    match query.third_party {
        Some(true) => options.contains(RuleOptions::APPLIES_TO_THIRD_PARTY),
        Some(false) => options.contains(RuleOptions::APPLIES_TO_FIRST_PARTY),
        None => options.contains(RuleOptions::APPLIES_TO_FIRST_PARTY | RuleOptions::APPLIES_TO_THIRD_PARTY),
    }
}

/// Domains are stored longest first with exclusions first on ties, so the
/// first entry covering the initiator decides.
fn domains_match(rule: &RuleView<'_>, initiator_host: Option<&str>) -> bool {
    if rule.domain_count() == 0 {
        return true;
    }
    let Some(host) = initiator_host else {
        return !rule.has_included_domains();
    };
    let host = host.trim_end_matches('.');
    for entry in rule.domains() {
        if host_matches_domain(host, entry.domain) {
            return !entry.exclude;
        }
    }
    !rule.has_included_domains()
}
