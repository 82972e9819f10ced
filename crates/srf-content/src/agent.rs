//! Per-frame filtering agent on the consumer side
//!
//! Tracks the activation sent for the frame's provisional load and, when
//! that load commits, installs a [`DocumentSubresourceFilter`] for the new
//! document.

use std::sync::Arc;

use srf_core::ActivationState;
use url::Url;

use crate::dealer::RulesetDealer;
use crate::document_filter::{
    DocumentLoadStatistics, DocumentSubresourceFilter, FirstDisallowedLoadCallback, RequestContext,
};
use crate::protocol::{FrameHostMessage, FrameHostSender, FrameMessage};

pub struct SubresourceFilterAgent {
    dealer: Arc<RulesetDealer>,
    host: FrameHostSender,
    performance_measurement_rate: f64,
    activation_state_for_provisional_load: ActivationState,
    url_for_provisional_load: Option<Url>,
    filter: Option<DocumentSubresourceFilter>,
}

impl SubresourceFilterAgent {
    pub fn new(dealer: Arc<RulesetDealer>, host: FrameHostSender, performance_measurement_rate: f64) -> Self {
        Self {
            dealer,
            host,
            performance_measurement_rate,
            activation_state_for_provisional_load: ActivationState::Disabled,
            url_for_provisional_load: None,
            filter: None,
        }
    }

    /// A new load starts; activation must be sent again for it.
    pub fn did_start_provisional_load(&mut self) {
        self.activation_state_for_provisional_load = ActivationState::Disabled;
        self.url_for_provisional_load = None;
    }

    pub fn on_message(&mut self, message: FrameMessage) {
        match message {
            FrameMessage::ActivateForLoad { state, url } => {
                log::debug!("Activation {} for {}", state.as_str(), url);
                self.activation_state_for_provisional_load = state;
                self.url_for_provisional_load = Some(url);
            }
        }
    }

    /// The provisional load committed as `ancestor_document_urls[0]`.
    ///
    /// Replaces the previous document's filter. Returns whether filtering is
    /// active for the new document.
    pub fn did_commit_provisional_load(&mut self, ancestor_document_urls: &[Url]) -> bool {
        let state = std::mem::replace(&mut self.activation_state_for_provisional_load, ActivationState::Disabled);
        let activated_url = self.url_for_provisional_load.take();
        self.filter = None;

        if state == ActivationState::Disabled {
            return false;
        }
        if activated_url.as_ref() != ancestor_document_urls.first() {
            log::debug!("Activation was sent for a different load, not filtering");
            return false;
        }
        if !self.dealer.is_ruleset_available() {
            return false;
        }
        let Some(ruleset) = self.dealer.get_ruleset() else {
            return false;
        };

        let host = self.host.clone();
        let callback: FirstDisallowedLoadCallback = Box::new(move || {
            let _ = host.send(FrameHostMessage::FirstLoadDisallowed);
        });
        let measure_performance = rand::random::<f64>() < self.performance_measurement_rate;
        self.filter = Some(DocumentSubresourceFilter::new(
            state,
            ruleset,
            ancestor_document_urls,
            Some(callback),
            measure_performance,
        ));
        true
    }

    /// Loads are allowed whenever no filter is installed.
    pub fn allow_load(&mut self, url: &Url, request_context: RequestContext) -> bool {
        match &mut self.filter {
            Some(filter) => filter.allow_load(url, request_context),
            None => true,
        }
    }

    pub fn is_filtering(&self) -> bool {
        self.filter.is_some()
    }

    /// Statistics of the current document, if it is being filtered.
    pub fn did_finish_load(&self) -> Option<DocumentLoadStatistics> {
        let statistics = *self.filter.as_ref()?.statistics();
        log::debug!(
            "Document loads: {} total, {} evaluated, {} matched, {} disallowed",
            statistics.num_loads_total,
            statistics.num_loads_evaluated,
            statistics.num_loads_matching_rules,
            statistics.num_loads_disallowed
        );
        Some(statistics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc;

    fn dealer_with(rules: &str) -> Arc<RulesetDealer> {
        let (indexer, _) = srf_indexer::index_filter_list(srf_indexer::parse_filter_list(rules));
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(indexer.data()).unwrap();
        let dealer = Arc::new(RulesetDealer::new());
        dealer.set_ruleset_file(file);
        dealer
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn activate(agent: &mut SubresourceFilterAgent, state: ActivationState, u: &Url) {
        agent.did_start_provisional_load();
        agent.on_message(FrameMessage::ActivateForLoad { state, url: u.clone() });
    }

    #[test]
    fn test_enabled_load_blocks_and_notifies_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agent = SubresourceFilterAgent::new(dealer_with("/ads.js\n"), tx, 0.0);
        let page = url("https://example.com/");

        activate(&mut agent, ActivationState::Enabled, &page);
        assert!(agent.did_commit_provisional_load(&[page.clone()]));
        assert!(!agent.allow_load(&url("https://example.com/ads.js"), RequestContext::Script));
        assert!(!agent.allow_load(&url("https://example.com/ads.js"), RequestContext::Script));

        assert_eq!(rx.try_recv().unwrap(), FrameHostMessage::FirstLoadDisallowed);
        assert!(rx.try_recv().is_err());
        assert_eq!(agent.did_finish_load().unwrap().num_loads_disallowed, 2);
    }

    #[test]
    fn test_missing_activation_means_disabled() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agent = SubresourceFilterAgent::new(dealer_with("/ads.js\n"), tx, 0.0);
        let page = url("https://example.com/");

        agent.did_start_provisional_load();
        assert!(!agent.did_commit_provisional_load(&[page]));
        assert!(agent.allow_load(&url("https://example.com/ads.js"), RequestContext::Script));
        assert!(agent.did_finish_load().is_none());
    }

    #[test]
    fn test_new_load_resets_activation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agent = SubresourceFilterAgent::new(dealer_with("/ads.js\n"), tx, 0.0);
        let first = url("https://example.com/");
        let second = url("https://other.com/");

        activate(&mut agent, ActivationState::Enabled, &first);
        assert!(agent.did_commit_provisional_load(&[first]));
        assert!(agent.is_filtering());

        agent.did_start_provisional_load();
        assert!(!agent.did_commit_provisional_load(&[second]));
        assert!(!agent.is_filtering());
    }

    #[test]
    fn test_activation_for_other_url_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agent = SubresourceFilterAgent::new(dealer_with("/ads.js\n"), tx, 0.0);
        activate(&mut agent, ActivationState::Enabled, &url("https://example.com/"));
        assert!(!agent.did_commit_provisional_load(&[url("https://elsewhere.com/")]));
    }

    #[test]
    fn test_no_ruleset_means_no_filter() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut agent = SubresourceFilterAgent::new(Arc::new(RulesetDealer::new()), tx, 0.0);
        let page = url("https://example.com/");
        activate(&mut agent, ActivationState::Enabled, &page);
        assert!(!agent.did_commit_provisional_load(&[page]));
    }

    #[test]
    fn test_dry_run_with_measurement() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agent = SubresourceFilterAgent::new(dealer_with("/ads.js\n"), tx, 1.0);
        let page = url("https://example.com/");
        activate(&mut agent, ActivationState::DryRun, &page);
        assert!(agent.did_commit_provisional_load(&[page]));
        assert!(agent.allow_load(&url("https://example.com/ads.js"), RequestContext::Script));

        let stats = agent.did_finish_load().unwrap();
        assert_eq!(stats.num_loads_matching_rules, 1);
        assert_eq!(stats.num_loads_disallowed, 0);
        assert!(rx.try_recv().is_err());
    }
}
