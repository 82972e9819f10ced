//! Sequenced blocking worker
//!
//! Runs blocking jobs one at a time, in posting order, on the tokio
//! blocking pool.

use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;

/// The task panicked instead of producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker task panicked")]
pub struct TaskPanicked;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone)]
pub struct SequencedWorker {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SequencedWorker {
    /// Must be called from within a tokio runtime. The worker stops once
    /// every clone has been dropped and the queue has drained.
    pub fn spawn(name: &'static str) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    log::error!("{} job failed: {}", name, e);
                }
            }
            log::trace!("{} worker stopped", name);
        });
        Self { jobs }
    }

    /// Returns false if the worker has stopped.
    pub fn post_task(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.jobs.send(Box::new(task)).is_ok()
    }

    /// Run `task` on the worker, then hand its result to `reply` on the
    /// same thread. `reply` is expected to forward the result elsewhere.
    ///
    /// `reply` runs even if `task` panics, so callers waiting on it are
    /// always released.
    pub fn post_task_and_reply<T, F, R>(&self, task: F, reply: R) -> bool
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        R: FnOnce(Result<T, TaskPanicked>) + Send + 'static,
    {
        self.post_task(move || reply(panic::catch_unwind(AssertUnwindSafe(task)).map_err(|_| TaskPanicked)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_tasks_run_in_order() {
        let worker = SequencedWorker::spawn("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let seen = Arc::clone(&seen);
            assert!(worker.post_task(move || {
                std::thread::sleep(std::time::Duration::from_millis((16 - i) as u64));
                seen.lock().unwrap().push(i);
            }));
        }

        let (tx, rx) = oneshot::channel();
        worker.post_task_and_reply(|| 42, move |v| {
            let _ = tx.send(v);
        });
        assert_eq!(rx.await.unwrap(), Ok(42));
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_task_still_replies() {
        let worker = SequencedWorker::spawn("test");

        let (tx, rx) = oneshot::channel();
        worker.post_task_and_reply(
            || -> u32 { panic!("task blew up") },
            move |v| {
                let _ = tx.send(v);
            },
        );
        assert_eq!(rx.await.unwrap(), Err(TaskPanicked));

        // The worker keeps running later jobs.
        let (tx, rx) = oneshot::channel();
        worker.post_task_and_reply(|| 7, move |v| {
            let _ = tx.send(v);
        });
        assert_eq!(rx.await.unwrap(), Ok(7));
    }
}
