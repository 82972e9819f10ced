//! Consumer-side ruleset cache
//!
//! The dealer owns the most recent ruleset file handle and hands out a
//! shared, verified mapping of it. Only a weak reference is cached: the
//! mapping lives as long as some document filter still holds it.

use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use srf_core::{IndexedRuleset, IndexedRulesetMatcher, MemoryMappedRuleset, RulesetError};
use tokio::sync::mpsc;

use crate::protocol::ControlMessage;

/// A mapped ruleset that passed full structural verification.
pub struct VerifiedRuleset {
    data: MemoryMappedRuleset,
    rule_count: u32,
}

impl VerifiedRuleset {
    pub fn new(data: MemoryMappedRuleset) -> Result<Self, RulesetError> {
        let rule_count = IndexedRuleset::verify(data.data())?.rule_count;
        Ok(Self { data, rule_count })
    }

    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    pub fn rule_count(&self) -> u32 {
        self.rule_count
    }

    pub fn matcher(&self) -> Result<IndexedRulesetMatcher<'_>, RulesetError> {
        IndexedRulesetMatcher::new(self.data.data())
    }
}

impl std::fmt::Debug for VerifiedRuleset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedRuleset")
            .field("len", &self.data.len())
            .field("rule_count", &self.rule_count)
            .finish()
    }
}

#[derive(Default)]
struct DealerState {
    file: Option<File>,
    cached: Weak<VerifiedRuleset>,
    /// Set when the current file failed to map or verify.
    unusable: bool,
}

#[derive(Default)]
pub struct RulesetDealer {
    state: Mutex<DealerState>,
}

impl RulesetDealer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DealerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the ruleset. Rulesets handed out earlier stay valid for
    /// their holders but are no longer returned.
    pub fn set_ruleset_file(&self, file: File) {
        let mut state = self.state();
        state.file = Some(file);
        state.cached = Weak::new();
        state.unusable = false;
    }

    pub fn is_ruleset_available(&self) -> bool {
        self.state().file.is_some()
    }

    /// The current ruleset, mapping and verifying it if no live instance
    /// exists. `None` if there is no ruleset or it is corrupt.
    pub fn get_ruleset(&self) -> Option<Arc<VerifiedRuleset>> {
        let mut state = self.state();
        if let Some(ruleset) = state.cached.upgrade() {
            return Some(ruleset);
        }
        if state.unusable {
            return None;
        }
        let file = state.file.as_ref()?;

        let verified = MemoryMappedRuleset::map(file)
            .map_err(|e| e.to_string())
            .and_then(|mapped| VerifiedRuleset::new(mapped).map_err(|e| e.to_string()));
        match verified {
            Ok(ruleset) => {
                log::debug!("Mapped ruleset with {} rules", ruleset.rule_count());
                let ruleset = Arc::new(ruleset);
                state.cached = Arc::downgrade(&ruleset);
                Some(ruleset)
            }
            Err(e) => {
                log::warn!("Rejecting ruleset: {}", e);
                state.unusable = true;
                None
            }
        }
    }

    /// Apply control messages until the channel closes.
    pub async fn run_control_channel(self: Arc<Self>, mut messages: mpsc::UnboundedReceiver<ControlMessage>) {
        while let Some(message) = messages.recv().await {
            match message {
                ControlMessage::SetRuleset(file) => self.set_ruleset_file(file),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ruleset_file(rules: &str) -> File {
        let list = srf_indexer::parse_filter_list(rules);
        let (indexer, _) = srf_indexer::index_filter_list(list);
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(indexer.data()).unwrap();
        file
    }

    #[test]
    fn test_no_ruleset() {
        let dealer = RulesetDealer::new();
        assert!(!dealer.is_ruleset_available());
        assert!(dealer.get_ruleset().is_none());
    }

    #[test]
    fn test_shares_live_instance() {
        let dealer = RulesetDealer::new();
        dealer.set_ruleset_file(ruleset_file("/ads.js\n/banner.gif\n"));
        assert!(dealer.is_ruleset_available());

        let first = dealer.get_ruleset().unwrap();
        let second = dealer.get_ruleset().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.rule_count(), 2);

        // Once every holder is gone the next call maps afresh.
        drop(first);
        drop(second);
        let third = dealer.get_ruleset().unwrap();
        assert_eq!(third.rule_count(), 2);
        assert_eq!(Arc::strong_count(&third), 1);
    }

    #[test]
    fn test_new_file_invalidates_cache() {
        let dealer = RulesetDealer::new();
        dealer.set_ruleset_file(ruleset_file("/ads.js\n"));
        let old = dealer.get_ruleset().unwrap();

        dealer.set_ruleset_file(ruleset_file("/a.js\n/b.js\n/c.js\n"));
        let new = dealer.get_ruleset().unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(old.rule_count(), 1);
        assert_eq!(new.rule_count(), 3);
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dealer = RulesetDealer::new();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"SRF1 but not really a ruleset").unwrap();
        dealer.set_ruleset_file(file);

        assert!(dealer.is_ruleset_available());
        assert!(dealer.get_ruleset().is_none());
        assert!(dealer.get_ruleset().is_none());

        dealer.set_ruleset_file(ruleset_file("/ads.js\n"));
        assert!(dealer.get_ruleset().is_some());
    }

    #[tokio::test]
    async fn test_control_channel() {
        let dealer = Arc::new(RulesetDealer::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Arc::clone(&dealer).run_control_channel(rx));

        tx.send(ControlMessage::SetRuleset(ruleset_file("/ads.js\n"))).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(dealer.get_ruleset().unwrap().rule_count(), 1);
    }
}
