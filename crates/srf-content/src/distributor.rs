use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard};

use srf_service::RulesetDistributor;

use crate::protocol::{ControlMessage, ControlSender};

#[derive(Default)]
struct Consumers {
    senders: Vec<ControlSender>,
    latest: Option<File>,
}

/// Forwards published rulesets to every live consumer.
///
/// Clones share one consumer list, so one clone can be registered with the
/// ruleset service while another keeps accepting new consumers.
#[derive(Clone, Default)]
pub struct ConsumerRulesetDistributor {
    consumers: Arc<Mutex<Consumers>>,
}

impl ConsumerRulesetDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    fn consumers(&self) -> MutexGuard<'_, Consumers> {
        self.consumers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A consumer added after a publish immediately receives the latest ruleset.
    pub fn add_consumer(&self, sender: ControlSender) {
        let mut consumers = self.consumers();
        if let Some(latest) = &consumers.latest {
            match latest.try_clone() {
                Ok(duplicate) => {
                    if sender.send(ControlMessage::SetRuleset(duplicate)).is_err() {
                        return;
                    }
                }
                Err(e) => log::warn!("Cannot duplicate ruleset handle for new consumer: {}", e),
            }
        }
        consumers.senders.push(sender);
    }

    /// Live consumers as of the last publish or addition.
    pub fn consumer_count(&self) -> usize {
        self.consumers().senders.len()
    }
}

impl RulesetDistributor for ConsumerRulesetDistributor {
    fn publish_new_ruleset_version(&mut self, ruleset_data: File) {
        let mut consumers = self.consumers();
        consumers.senders.retain(|sender| match ruleset_data.try_clone() {
            Ok(duplicate) => sender.send(ControlMessage::SetRuleset(duplicate)).is_ok(),
            Err(e) => {
                log::warn!("Cannot duplicate ruleset handle: {}", e);
                true
            }
        });
        log::debug!("Sent ruleset to {} consumers", consumers.senders.len());
        consumers.latest = Some(ruleset_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use tokio::sync::mpsc;

    fn file_with(contents: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    fn read_all(mut file: File) -> Vec<u8> {
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    fn expect_ruleset(rx: &mut mpsc::UnboundedReceiver<ControlMessage>) -> Vec<u8> {
        match rx.try_recv().unwrap() {
            ControlMessage::SetRuleset(file) => read_all(file),
        }
    }

    #[test]
    fn test_publish_reaches_all_consumers() {
        let distributor = ConsumerRulesetDistributor::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        distributor.add_consumer(tx1);
        distributor.add_consumer(tx2);

        let mut publisher = distributor.clone();
        publisher.publish_new_ruleset_version(file_with(b"v1"));
        assert_eq!(expect_ruleset(&mut rx1), b"v1");
        assert_eq!(expect_ruleset(&mut rx2), b"v1");
    }

    #[test]
    fn test_late_consumer_gets_latest() {
        let distributor = ConsumerRulesetDistributor::new();
        let mut publisher = distributor.clone();
        publisher.publish_new_ruleset_version(file_with(b"v1"));
        publisher.publish_new_ruleset_version(file_with(b"v2"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        distributor.add_consumer(tx);
        assert_eq!(expect_ruleset(&mut rx), b"v2");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_consumers_are_pruned() {
        let distributor = ConsumerRulesetDistributor::new();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        distributor.add_consumer(tx1);
        distributor.add_consumer(tx2);
        drop(rx1);

        let mut publisher = distributor.clone();
        publisher.publish_new_ruleset_version(file_with(b"v1"));
        assert_eq!(distributor.consumer_count(), 1);
        assert_eq!(expect_ruleset(&mut rx2), b"v1");
    }
}
