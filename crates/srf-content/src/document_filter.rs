//! Per-document subresource filtering
//!
//! One [`DocumentSubresourceFilter`] is built for each committed document
//! load whose activation state is not `Disabled`. Ancestor documents are
//! evaluated once, up front; afterwards each subresource load is a single
//! matcher query.

use std::sync::Arc;
use std::time::{Duration, Instant};

use srf_core::{ActivationState, ActivationTypes, ElementTypes, FirstPartyOrigin};
use url::{Origin, Url};

use crate::dealer::VerifiedRuleset;

/// What kind of fetch a subresource load is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestContext {
    Audio,
    Beacon,
    CspReport,
    Download,
    Embed,
    EventSource,
    Favicon,
    Fetch,
    Font,
    Frame,
    Iframe,
    Image,
    ImageSet,
    Import,
    Internal,
    Location,
    Manifest,
    Object,
    Ping,
    Plugin,
    Prefetch,
    Script,
    ServiceWorker,
    SharedWorker,
    Style,
    Subresource,
    Track,
    Video,
    Worker,
    XmlHttpRequest,
    Xslt,
    Unspecified,
}

impl RequestContext {
    pub fn element_type(self) -> ElementTypes {
        use RequestContext::*;
        match self {
            Audio | Video | Track => ElementTypes::MEDIA,
            Beacon | Ping | CspReport => ElementTypes::PING,
            Embed | Object | Plugin => ElementTypes::OBJECT,
            EventSource | Fetch | XmlHttpRequest => ElementTypes::XMLHTTPREQUEST,
            Favicon | Image | ImageSet => ElementTypes::IMAGE,
            Font => ElementTypes::FONT,
            Frame | Iframe => ElementTypes::SUBDOCUMENT,
            Script | ServiceWorker | SharedWorker | Worker => ElementTypes::SCRIPT,
            Style | Xslt => ElementTypes::STYLESHEET,
            _ => ElementTypes::OTHER,
        }
    }
}

/// Running totals for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentLoadStatistics {
    pub num_loads_total: usize,
    pub num_loads_evaluated: usize,
    pub num_loads_matching_rules: usize,
    pub num_loads_disallowed: usize,
    /// Only accumulated when performance measurement is on.
    pub evaluation_total_wall_duration: Duration,
}

pub type FirstDisallowedLoadCallback = Box<dyn FnOnce() + Send>;

pub struct DocumentSubresourceFilter {
    activation_state: ActivationState,
    ruleset: Arc<VerifiedRuleset>,
    first_party: FirstPartyOrigin,
    filtering_disabled_for_document: bool,
    generic_blocking_rules_disabled: bool,
    measure_performance: bool,
    first_disallowed_load_callback: Option<FirstDisallowedLoadCallback>,
    statistics: DocumentLoadStatistics,
}

impl DocumentSubresourceFilter {
    /// `ancestor_document_urls` starts with the document itself and ends
    /// with the main frame document.
    pub fn new(
        activation_state: ActivationState,
        ruleset: Arc<VerifiedRuleset>,
        ancestor_document_urls: &[Url],
        first_disallowed_load_callback: Option<FirstDisallowedLoadCallback>,
        measure_performance: bool,
    ) -> Self {
        debug_assert_ne!(activation_state, ActivationState::Disabled);

        let document_origin = ancestor_document_urls
            .first()
            .map(Url::origin)
            .unwrap_or_else(Origin::new_opaque);
        let mut filter = Self {
            activation_state,
            ruleset,
            first_party: FirstPartyOrigin::new(document_origin),
            filtering_disabled_for_document: activation_state == ActivationState::Disabled,
            generic_blocking_rules_disabled: false,
            measure_performance,
            first_disallowed_load_callback,
            statistics: DocumentLoadStatistics::default(),
        };

        let start = filter.measure_performance.then(Instant::now);
        if !filter.filtering_disabled_for_document {
            filter.evaluate_ancestors(ancestor_document_urls);
        }
        if let Some(start) = start {
            filter.statistics.evaluation_total_wall_duration += start.elapsed();
        }
        filter
    }

    /// Walk from the main frame down to the document itself.
    fn evaluate_ancestors(&mut self, ancestor_document_urls: &[Url]) {
        let matcher = match self.ruleset.matcher() {
            Ok(matcher) => matcher,
            Err(e) => {
                log::warn!("Ruleset unusable, not filtering document: {}", e);
                self.filtering_disabled_for_document = true;
                return;
            }
        };

        let mut parent_origin: Option<Origin> = None;
        for url in ancestor_document_urls.iter().rev() {
            if matcher.should_disable_filtering_for_document(url, parent_origin.as_ref(), ActivationTypes::DOCUMENT) {
                log::debug!("Filtering disabled for document by ancestor {}", url);
                self.filtering_disabled_for_document = true;
                return;
            }
            if !self.generic_blocking_rules_disabled
                && matcher.should_disable_filtering_for_document(
                    url,
                    parent_origin.as_ref(),
                    ActivationTypes::GENERICBLOCK,
                )
            {
                log::debug!("Generic blocking rules disabled by ancestor {}", url);
                self.generic_blocking_rules_disabled = true;
            }
            parent_origin = Some(url.origin());
        }
    }

    pub fn activation_state(&self) -> ActivationState {
        self.activation_state
    }

    pub fn filtering_disabled_for_document(&self) -> bool {
        self.filtering_disabled_for_document
    }

    pub fn generic_blocking_rules_disabled(&self) -> bool {
        self.generic_blocking_rules_disabled
    }

    pub fn statistics(&self) -> &DocumentLoadStatistics {
        &self.statistics
    }

    /// Whether the load may proceed. Matches only block under `Enabled`.
    pub fn allow_load(&mut self, url: &Url, request_context: RequestContext) -> bool {
        self.statistics.num_loads_total += 1;
        if self.filtering_disabled_for_document || url.scheme() == "data" {
            return true;
        }

        self.statistics.num_loads_evaluated += 1;
        let start = self.measure_performance.then(Instant::now);
        let disallowed = match self.ruleset.matcher() {
            Ok(matcher) => matcher.should_disallow_resource_load(
                url,
                &mut self.first_party,
                request_context.element_type(),
                self.generic_blocking_rules_disabled,
            ),
            Err(_) => false,
        };
        if let Some(start) = start {
            self.statistics.evaluation_total_wall_duration += start.elapsed();
        }

        if !disallowed {
            return true;
        }
        self.statistics.num_loads_matching_rules += 1;
        if self.activation_state != ActivationState::Enabled {
            return true;
        }

        self.statistics.num_loads_disallowed += 1;
        if let Some(callback) = self.first_disallowed_load_callback.take() {
            callback();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srf_core::MemoryMappedRuleset;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ruleset(rules: &str) -> Arc<VerifiedRuleset> {
        let (indexer, _) = srf_indexer::index_filter_list(srf_indexer::parse_filter_list(rules));
        Arc::new(VerifiedRuleset::new(MemoryMappedRuleset::from_bytes(indexer.into_data())).unwrap())
    }

    fn urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn counting_callback() -> (Arc<AtomicUsize>, FirstDisallowedLoadCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_request_context_mapping() {
        assert_eq!(RequestContext::Image.element_type(), ElementTypes::IMAGE);
        assert_eq!(RequestContext::Favicon.element_type(), ElementTypes::IMAGE);
        assert_eq!(RequestContext::Iframe.element_type(), ElementTypes::SUBDOCUMENT);
        assert_eq!(RequestContext::Fetch.element_type(), ElementTypes::XMLHTTPREQUEST);
        assert_eq!(RequestContext::Beacon.element_type(), ElementTypes::PING);
        assert_eq!(RequestContext::Video.element_type(), ElementTypes::MEDIA);
        assert_eq!(RequestContext::Plugin.element_type(), ElementTypes::OBJECT);
        assert_eq!(RequestContext::Worker.element_type(), ElementTypes::SCRIPT);
        assert_eq!(RequestContext::Xslt.element_type(), ElementTypes::STYLESHEET);
        assert_eq!(RequestContext::Prefetch.element_type(), ElementTypes::OTHER);
        assert_eq!(RequestContext::Unspecified.element_type(), ElementTypes::OTHER);
    }

    #[test]
    fn test_dry_run_counts_but_allows() {
        let (calls, callback) = counting_callback();
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::DryRun,
            ruleset("/ads.js\n"),
            &urls(&["https://example.com/"]),
            Some(callback),
            false,
        );

        assert!(filter.allow_load(&url("https://example.com/ads.js"), RequestContext::Script));
        assert!(filter.allow_load(&url("https://example.com/app.js"), RequestContext::Script));

        let stats = filter.statistics();
        assert_eq!(stats.num_loads_total, 2);
        assert_eq!(stats.num_loads_evaluated, 2);
        assert_eq!(stats.num_loads_matching_rules, 1);
        assert_eq!(stats.num_loads_disallowed, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enabled_callback_fires_once() {
        let (calls, callback) = counting_callback();
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::Enabled,
            ruleset("/ads.js\n"),
            &urls(&["https://example.com/"]),
            Some(callback),
            false,
        );

        let blocked = url("https://example.com/ads.js");
        for _ in 0..3 {
            assert!(!filter.allow_load(&blocked, RequestContext::Script));
        }
        assert!(filter.allow_load(&url("https://example.com/app.js"), RequestContext::Script));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = filter.statistics();
        assert_eq!(stats.num_loads_total, 4);
        assert_eq!(stats.num_loads_matching_rules, 3);
        assert_eq!(stats.num_loads_disallowed, 3);
    }

    #[test]
    fn test_data_urls_are_not_evaluated() {
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::Enabled,
            ruleset("ads\n"),
            &urls(&["https://example.com/"]),
            None,
            false,
        );
        assert!(filter.allow_load(&url("data:text/plain,ads"), RequestContext::Image));
        assert_eq!(filter.statistics().num_loads_total, 1);
        assert_eq!(filter.statistics().num_loads_evaluated, 0);
    }

    #[test]
    fn test_document_whitelist_on_ancestor() {
        let rules = "/ads.js\n@@||example.com^$document\n";

        // Main frame whitelisted: nested document is not filtered either.
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::Enabled,
            ruleset(rules),
            &urls(&["https://frame.test/inner.html", "https://example.com/"]),
            None,
            false,
        );
        assert!(filter.filtering_disabled_for_document());
        assert!(filter.allow_load(&url("https://frame.test/ads.js"), RequestContext::Script));
        assert_eq!(filter.statistics().num_loads_evaluated, 0);

        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::Enabled,
            ruleset(rules),
            &urls(&["https://xample.com/"]),
            None,
            false,
        );
        assert!(!filter.filtering_disabled_for_document());
        assert!(!filter.allow_load(&url("https://xample.com/ads.js"), RequestContext::Script));
    }

    #[test]
    fn test_genericblock_keeps_domain_rules() {
        let rules = "/generic.js\n/specific.js$domain=example.com\n@@||example.com^$genericblock\n";
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::Enabled,
            ruleset(rules),
            &urls(&["https://example.com/"]),
            None,
            false,
        );
        assert!(filter.generic_blocking_rules_disabled());
        assert!(!filter.filtering_disabled_for_document());
        assert!(filter.allow_load(&url("https://cdn.test/generic.js"), RequestContext::Script));
        assert!(!filter.allow_load(&url("https://cdn.test/specific.js"), RequestContext::Script));
    }

    #[test]
    fn test_element_type_restriction() {
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::Enabled,
            ruleset("/banner.gif$image\n"),
            &urls(&["https://example.com/"]),
            None,
            false,
        );
        assert!(!filter.allow_load(&url("https://ads.test/banner.gif"), RequestContext::Image));
        assert!(filter.allow_load(&url("https://ads.test/banner.gif"), RequestContext::Script));
    }

    #[test]
    fn test_measure_performance_accumulates() {
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::DryRun,
            ruleset("/ads.js\n"),
            &urls(&["https://example.com/"]),
            None,
            true,
        );
        for i in 0..50 {
            filter.allow_load(&url(&format!("https://example.com/{}/ads.js", i)), RequestContext::Script);
        }
        assert!(filter.statistics().evaluation_total_wall_duration > Duration::ZERO);

        let mut unmeasured = DocumentSubresourceFilter::new(
            ActivationState::DryRun,
            ruleset("/ads.js\n"),
            &urls(&["https://example.com/"]),
            None,
            false,
        );
        unmeasured.allow_load(&url("https://example.com/ads.js"), RequestContext::Script);
        assert_eq!(unmeasured.statistics().evaluation_total_wall_duration, Duration::ZERO);
    }

    #[test]
    fn test_third_party_rule_uses_document_origin() {
        let rules = "/track.js$third-party\n";
        let mut filter = DocumentSubresourceFilter::new(
            ActivationState::Enabled,
            ruleset(rules),
            &urls(&["https://www.example.com/"]),
            None,
            false,
        );
        assert!(filter.allow_load(&url("https://static.example.com/track.js"), RequestContext::Script));
        assert!(!filter.allow_load(&url("https://tracker.test/track.js"), RequestContext::Script));
    }
}
