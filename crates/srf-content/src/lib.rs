//! Subresource Filter Content Layer
//!
//! Everything between a published ruleset file and a blocked subresource
//! load: distribution to consumers, the consumer-side ruleset cache, the
//! activation handshake and per-document filtering.
//!
//! # Modules
//!
//! - `protocol`: Control and per-frame messages
//! - `distributor`: Service-side fan-out to consumers
//! - `dealer`: Consumer-side verified mapping cache
//! - `document_filter`: Per-document load decisions and statistics
//! - `agent`: Per-frame activation tracking and filter installation
//! - `navigation`: Per-navigation activation decision

pub mod agent;
pub mod dealer;
pub mod distributor;
pub mod document_filter;
pub mod navigation;
pub mod protocol;

pub use agent::SubresourceFilterAgent;
pub use dealer::{RulesetDealer, VerifiedRuleset};
pub use distributor::ConsumerRulesetDistributor;
pub use document_filter::{DocumentLoadStatistics, DocumentSubresourceFilter, RequestContext};
pub use navigation::NavigationActivationDriver;
pub use protocol::{ControlMessage, FrameHostMessage, FrameMessage};

#[cfg(test)]
mod tests {
    use super::*;
    use srf_core::activation::{SiteWhitelist, ThreatPatternType, ThreatType};
    use srf_core::{ActivationConfig, ActivationList, ActivationScope, ActivationState};
    use srf_service::{InMemoryPrefs, RulesetService, RulesetServiceConfig, UnindexedRulesetInfo};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use url::Url;

    #[tokio::test]
    async fn test_published_ruleset_blocks_in_activated_frame() {
        let base = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let list = src.path().join("list.txt");
        std::fs::write(&list, "||ads.example^\n@@||ads.example/allowed/\n").unwrap();

        // Service side.
        let service = RulesetService::start(RulesetServiceConfig::new(base.path()), Box::new(InMemoryPrefs::new()));
        let distributor = ConsumerRulesetDistributor::new();
        service.register_distributor(distributor.clone());
        service.notify_startup_completed();

        // Consumer side.
        let dealer = Arc::new(RulesetDealer::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        distributor.add_consumer(control_tx);
        let consumer = tokio::spawn(Arc::clone(&dealer).run_control_channel(control_rx));

        service.index_and_store_and_publish_ruleset_if_needed(UnindexedRulesetInfo::new("1", &list));
        service.flush().await.unwrap();
        drop(distributor);
        drop(service);
        consumer.await.unwrap();
        assert!(dealer.is_ruleset_available());

        // Navigation with a phishing verdict.
        let config = ActivationConfig {
            activation_state: ActivationState::Enabled,
            activation_scope: ActivationScope::ActivationList,
            activation_list: Some(ActivationList::PhishingInterstitial),
            ..ActivationConfig::default()
        };
        let page = Url::parse("https://bad.test/").unwrap();
        let mut navigation = NavigationActivationDriver::new(page.clone(), false);
        navigation.on_safe_browsing_verdict(&page, ThreatType::Phishing, ThreatPatternType::None);

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let mut agent = SubresourceFilterAgent::new(Arc::clone(&dealer), host_tx, 0.0);

        agent.did_start_provisional_load();
        let state = navigation.ready_to_commit(&config, &mut SiteWhitelist::new(), &frame_tx);
        assert_eq!(state, ActivationState::Enabled);
        agent.on_message(frame_rx.try_recv().unwrap());
        assert!(agent.did_commit_provisional_load(&[page]));

        let blocked = Url::parse("https://ads.example/banner.png").unwrap();
        let allowed = Url::parse("https://ads.example/allowed/banner.png").unwrap();
        assert!(!agent.allow_load(&blocked, RequestContext::Image));
        assert!(agent.allow_load(&allowed, RequestContext::Image));
        assert_eq!(host_rx.try_recv().unwrap(), FrameHostMessage::FirstLoadDisallowed);
    }
}
