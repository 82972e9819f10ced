//! Ruleset service
//!
//! Owns the versioned on-disk store. Indexes new ruleset versions on a
//! sequenced blocking worker, persists the active version in preferences
//! and publishes the indexed file to every registered distributor.
//!
//! The service runs as a single tokio task. All state lives on that task;
//! callers talk to it through a [`RulesetServiceHandle`]. Worker replies
//! reach the task through a weak sender, so replies that arrive after the
//! last handle is dropped are discarded.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use crate::distributor::RulesetDistributor;
use crate::prefs::PrefStore;
use crate::storage::{self, IndexingError};
use crate::version::{IndexedRulesetVersion, UnindexedRulesetInfo};
use crate::worker::{SequencedWorker, TaskPanicked};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Ruleset service has stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RulesetServiceConfig {
    /// Root of the versioned store.
    pub base_dir: PathBuf,
    /// Format version new rulesets are written with.
    pub format_version: u32,
}

impl RulesetServiceConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            format_version: IndexedRulesetVersion::current_format_version(),
        }
    }
}

/// Counters describing what the service has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub indexing_succeeded: usize,
    pub indexing_failed: BTreeMap<IndexingError, usize>,
    /// Requests for a version that was already indexed.
    pub skipped_already_indexed: usize,
    /// Requests held back until start-up completed.
    pub deferred: usize,
    pub publishes: usize,
    pub open_failures: usize,
    pub obsolete_removed: usize,
    /// Worker tasks that panicked. A panic while indexing leaves that
    /// version's sentinel in place.
    pub worker_panics: usize,
}

enum Command {
    RegisterDistributor(Box<dyn RulesetDistributor>),
    IndexAndStoreAndPublish(UnindexedRulesetInfo),
    NotifyStartupCompleted,
    Flush(oneshot::Sender<()>),
    Stats(oneshot::Sender<ServiceStats>),
    ActiveVersion(oneshot::Sender<Option<IndexedRulesetVersion>>),
    Worker(WorkerReply),
}

enum WorkerReply {
    Indexed(Result<IndexedRulesetVersion, IndexingError>),
    Opened(IndexedRulesetVersion, io::Result<File>),
    ObsoleteDeleted(io::Result<usize>),
    Panicked,
}

/// Work held back until start-up completes.
#[derive(Default)]
struct DeferredTasks {
    /// Only the newest request is kept.
    ruleset: Option<UnindexedRulesetInfo>,
}

pub struct RulesetService {
    config: RulesetServiceConfig,
    prefs: Box<dyn PrefStore>,
    worker: SequencedWorker,
    commands: mpsc::WeakUnboundedSender<Command>,
    distributors: Vec<Box<dyn RulesetDistributor>>,
    ruleset_data: Option<File>,
    active_version: Option<IndexedRulesetVersion>,
    startup_completed: bool,
    deferred: DeferredTasks,
    in_flight: usize,
    flush_waiters: Vec<oneshot::Sender<()>>,
    stats: ServiceStats,
}

impl RulesetService {
    /// Spawn the service on the current tokio runtime.
    ///
    /// If the preferences name a valid ruleset in the current format, it is
    /// opened and published right away.
    pub fn start(config: RulesetServiceConfig, prefs: Box<dyn PrefStore>) -> RulesetServiceHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut service = RulesetService::new(config, prefs, &sender);

        let persisted = IndexedRulesetVersion::read_from_prefs(service.prefs.as_ref());
        if persisted.is_valid() && persisted.format_version == service.config.format_version {
            log::info!("Opening persisted ruleset {}", persisted.content_version);
            service.open_and_publish(persisted);
        }

        tokio::spawn(service.run(receiver));
        RulesetServiceHandle { commands: sender }
    }

    fn new(
        config: RulesetServiceConfig,
        prefs: Box<dyn PrefStore>,
        commands: &mpsc::UnboundedSender<Command>,
    ) -> Self {
        RulesetService {
            config,
            prefs,
            worker: SequencedWorker::spawn("ruleset-indexer"),
            commands: commands.downgrade(),
            distributors: Vec::new(),
            ruleset_data: None,
            active_version: None,
            startup_completed: false,
            deferred: DeferredTasks::default(),
            in_flight: 0,
            flush_waiters: Vec::new(),
            stats: ServiceStats::default(),
        }
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            self.handle(command);
        }
        log::debug!("Ruleset service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RegisterDistributor(distributor) => self.register_distributor(distributor),
            Command::IndexAndStoreAndPublish(info) => self.index_and_store_and_publish_ruleset_if_needed(info),
            Command::NotifyStartupCompleted => self.notify_startup_completed(),
            Command::Flush(waiter) => {
                if self.in_flight == 0 {
                    let _ = waiter.send(());
                } else {
                    self.flush_waiters.push(waiter);
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats.clone());
            }
            Command::ActiveVersion(reply) => {
                let _ = reply.send(self.active_version.clone());
            }
            Command::Worker(reply) => {
                self.handle_worker_reply(reply);
                self.in_flight = self.in_flight.saturating_sub(1);
                if self.in_flight == 0 {
                    for waiter in self.flush_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
            }
        }
    }

    fn register_distributor(&mut self, mut distributor: Box<dyn RulesetDistributor>) {
        if let Some(file) = &self.ruleset_data {
            match file.try_clone() {
                Ok(duplicate) => distributor.publish_new_ruleset_version(duplicate),
                Err(e) => log::warn!("Cannot duplicate ruleset handle for new distributor: {}", e),
            }
        }
        self.distributors.push(distributor);
    }

    fn index_and_store_and_publish_ruleset_if_needed(&mut self, info: UnindexedRulesetInfo) {
        if info.content_version.is_empty() {
            log::warn!("Ignoring ruleset without a content version");
            return;
        }

        let most_recent = IndexedRulesetVersion::read_from_prefs(self.prefs.as_ref());
        if most_recent.is_valid()
            && most_recent.format_version == self.config.format_version
            && most_recent.content_version == info.content_version
        {
            log::debug!("Ruleset {} is already indexed", info.content_version);
            self.stats.skipped_already_indexed += 1;
            return;
        }

        if !self.startup_completed {
            log::debug!("Deferring ruleset {} until start-up completes", info.content_version);
            self.stats.deferred += 1;
            self.deferred.ruleset = Some(info);
            return;
        }

        let base_dir = self.config.base_dir.clone();
        let format_version = self.config.format_version;
        self.post_to_worker(
            move || storage::index_and_write_ruleset(&base_dir, &info, format_version),
            WorkerReply::Indexed,
        );
    }

    fn notify_startup_completed(&mut self) {
        if self.startup_completed {
            return;
        }
        self.startup_completed = true;

        // Collect garbage before indexing anything new so the sweep cannot
        // see a half-written version.
        let base_dir = self.config.base_dir.clone();
        let format_version = self.config.format_version;
        let active = IndexedRulesetVersion::read_from_prefs(self.prefs.as_ref());
        self.post_to_worker(
            move || storage::delete_obsolete_rulesets(&base_dir, format_version, &active),
            WorkerReply::ObsoleteDeleted,
        );

        let deferred = std::mem::take(&mut self.deferred);
        if let Some(info) = deferred.ruleset {
            self.index_and_store_and_publish_ruleset_if_needed(info);
        }
    }

    fn handle_worker_reply(&mut self, reply: WorkerReply) {
        match reply {
            WorkerReply::Indexed(Ok(version)) => {
                self.stats.indexing_succeeded += 1;
                version.save_to_prefs(self.prefs.as_mut());
                if let Err(e) = self.prefs.commit() {
                    log::error!("Failed to persist ruleset version {}: {}", version.content_version, e);
                }
                self.open_and_publish(version);
            }
            WorkerReply::Indexed(Err(e)) => {
                log::warn!("Indexing failed: {}", e);
                *self.stats.indexing_failed.entry(e).or_insert(0) += 1;
            }
            WorkerReply::Opened(version, Ok(file)) => self.publish(version, file),
            WorkerReply::Opened(version, Err(e)) => {
                log::error!("Cannot open ruleset {}: {}", version.content_version, e);
                self.stats.open_failures += 1;
            }
            WorkerReply::ObsoleteDeleted(Ok(removed)) => {
                if removed > 0 {
                    log::info!("Removed {} obsolete ruleset directories", removed);
                }
                self.stats.obsolete_removed += removed;
            }
            WorkerReply::ObsoleteDeleted(Err(e)) => log::warn!("Failed to remove obsolete rulesets: {}", e),
            WorkerReply::Panicked => {
                log::error!("Ruleset worker task panicked");
                self.stats.worker_panics += 1;
            }
        }
    }

    fn open_and_publish(&mut self, version: IndexedRulesetVersion) {
        let base_dir = self.config.base_dir.clone();
        self.post_to_worker(
            move || {
                let result = storage::open_ruleset(&base_dir, &version);
                (version, result)
            },
            |(version, result)| WorkerReply::Opened(version, result),
        );
    }

    fn publish(&mut self, version: IndexedRulesetVersion, file: File) {
        log::info!(
            "Publishing ruleset {} to {} distributors",
            version.content_version,
            self.distributors.len()
        );
        for distributor in &mut self.distributors {
            match file.try_clone() {
                Ok(duplicate) => distributor.publish_new_ruleset_version(duplicate),
                Err(e) => log::warn!("Cannot duplicate ruleset handle: {}", e),
            }
        }
        self.ruleset_data = Some(file);
        self.active_version = Some(version);
        self.stats.publishes += 1;
    }

    fn post_to_worker<T, F, R>(&mut self, task: F, reply: R)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        R: FnOnce(T) -> WorkerReply + Send + 'static,
    {
        let commands = self.commands.clone();
        let posted = self.worker.post_task_and_reply(task, move |result| {
            let reply = match result {
                Ok(result) => reply(result),
                Err(TaskPanicked) => WorkerReply::Panicked,
            };
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Worker(reply));
            }
        });
        if posted {
            self.in_flight += 1;
        } else {
            log::error!("Ruleset worker has stopped");
        }
    }
}

/// Cheap, cloneable handle to a running [`RulesetService`]. The service
/// stops once every handle is dropped.
#[derive(Clone)]
pub struct RulesetServiceHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RulesetServiceHandle {
    /// The distributor immediately receives the current ruleset, if any.
    pub fn register_distributor(&self, distributor: impl RulesetDistributor + 'static) {
        self.send(Command::RegisterDistributor(Box::new(distributor)));
    }

    pub fn index_and_store_and_publish_ruleset_if_needed(&self, info: UnindexedRulesetInfo) {
        self.send(Command::IndexAndStoreAndPublish(info));
    }

    pub fn notify_startup_completed(&self) {
        self.send(Command::NotifyStartupCompleted);
    }

    /// Resolves once no worker task is in flight.
    pub async fn flush(&self) -> Result<(), ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx));
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    pub async fn stats(&self) -> Result<ServiceStats, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx));
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// The most recently published version.
    pub async fn active_version(&self) -> Result<Option<IndexedRulesetVersion>, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ActiveVersion(tx));
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("Ruleset service has stopped, dropping request");
        }
    }
}
