//! Bounded worker pool for work that must stay off the tick thread.
//!
//! [`TaskExecutor`] feeds a fixed number of worker tasks from an unbounded
//! queue. Each work item runs on Tokio's blocking pool, so a slow scan or a
//! blocking write never stalls the async workers or the tick loop.
//! Submission never waits.
//!
//! # Guarantees
//!
//! - Each item runs at most once.
//! - Items from different submissions may run in any order, in parallel.
//! - A failing or panicking item is logged and counted; nothing else is
//!   affected.
//! - After [`TaskExecutor::shutdown`] every accepted item is accounted for:
//!   `submitted == completed + failed + abandoned`.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cadence_types::ShutdownMode;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::BoxError;

/// Error type returned by executor work.
pub type TaskError = BoxError;

type Job = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

/// A queued unit of work.
struct WorkItem {
    label: Cow<'static, str>,
    job: Job,
}

/// Errors returned to submitters.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The executor no longer accepts work.
    #[error("task executor is shut down; rejected {label}")]
    ShutDown {
        /// Label of the rejected item.
        label: String,
    },
}

/// Failure of a single work item. Logged by the worker, never returned.
#[derive(Debug, thiserror::Error)]
pub enum TaskExecutionError {
    /// The work returned an error.
    #[error("task {label} failed: {source}")]
    Failed {
        /// Label of the item.
        label: String,
        /// Error returned by the work.
        source: TaskError,
    },

    /// The work panicked.
    #[error("task {label} panicked: {message}")]
    Panicked {
        /// Label of the item.
        label: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// The runtime shut down before the work could run.
    #[error("task {label} was cancelled")]
    Cancelled {
        /// Label of the item.
        label: String,
    },
}

/// Point-in-time executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Items accepted by [`TaskExecutor::submit`].
    pub submitted: u64,
    /// Items that ran to completion without error.
    pub completed: u64,
    /// Items that failed, panicked or were cancelled.
    pub failed: u64,
    /// Items queued or running when the executor was shut down with
    /// [`ShutdownMode::Abandon`].
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.submitted.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            abandoned: self.abandoned.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug)]
struct Inner {
    sender: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to a bounded pool of workers.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
}

impl TaskExecutor {
    /// Start `workers` workers (at least one) on the given runtime.
    pub fn new(workers: usize, runtime: &Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<WorkItem>();
        let queue = Arc::new(AsyncMutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let count = workers.max(1);

        let handles = (0..count)
            .map(|index| {
                runtime.spawn(worker_loop(
                    index,
                    Arc::clone(&queue),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        debug!(workers = count, "task executor started");

        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                workers: Mutex::new(handles),
                counters,
            }),
        }
    }

    /// Queue work for asynchronous execution. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::ShutDown`] once the executor has been closed.
    pub fn submit<F>(
        &self,
        label: impl Into<Cow<'static, str>>,
        work: F,
    ) -> Result<(), ExecutorError>
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        let label = label.into();
        let guard = lock(&self.inner.sender);
        let Some(sender) = guard.as_ref() else {
            return Err(ExecutorError::ShutDown {
                label: label.into_owned(),
            });
        };

        self.inner.counters.submitted.fetch_add(1, Ordering::AcqRel);
        let item = WorkItem {
            label,
            job: Box::new(work),
        };
        sender.send(item).map_err(|rejected| {
            self.inner.counters.submitted.fetch_sub(1, Ordering::AcqRel);
            ExecutorError::ShutDown {
                label: rejected.0.label.into_owned(),
            }
        })
    }

    /// Current counters.
    pub fn stats(&self) -> ExecutorStats {
        self.inner.counters.snapshot()
    }

    /// Whether new work is still accepted.
    pub fn is_open(&self) -> bool {
        lock(&self.inner.sender).is_some()
    }

    /// Stop accepting work. Queued items still run; workers exit once the
    /// queue is empty.
    pub fn close(&self) {
        if lock(&self.inner.sender).take().is_some() {
            debug!("task executor closed to new work");
        }
    }

    /// Close the executor and either wait for queued work or drop it.
    ///
    /// With [`ShutdownMode::Drain`] this returns once every queued and
    /// running item has finished. With [`ShutdownMode::Abandon`] the workers
    /// are aborted and queued items are dropped; blocking work already
    /// running is detached rather than awaited. Both are counted as
    /// abandoned. Calling this again is a no-op.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.close();
        let workers = std::mem::take(&mut *lock(&self.inner.workers));
        if workers.is_empty() {
            return;
        }

        match mode {
            ShutdownMode::Drain => {
                for worker in workers {
                    if let Err(err) = worker.await {
                        warn!(error = %err, "executor worker ended abnormally");
                    }
                }
            }
            ShutdownMode::Abandon => {
                for worker in &workers {
                    worker.abort();
                }
                for worker in workers {
                    match worker.await {
                        Err(err) if !err.is_cancelled() => {
                            warn!(error = %err, "executor worker ended abnormally");
                        }
                        _ => {}
                    }
                }
                let settled = self.stats();
                let abandoned = settled
                    .submitted
                    .saturating_sub(settled.completed.saturating_add(settled.failed));
                self.inner
                    .counters
                    .abandoned
                    .store(abandoned, Ordering::Release);
            }
        }

        let stats = self.stats();
        info!(
            ?mode,
            submitted = stats.submitted,
            completed = stats.completed,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "task executor shut down"
        );
    }
}

async fn worker_loop(
    index: usize,
    queue: Arc<AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>>,
    counters: Arc<Counters>,
) {
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(WorkItem { label, job }) = next else {
            break;
        };

        let outcome = match tokio::task::spawn_blocking(job).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(TaskExecutionError::Failed {
                label: label.into_owned(),
                source,
            }),
            Err(join) if join.is_panic() => Err(TaskExecutionError::Panicked {
                label: label.into_owned(),
                message: crate::panic_message(join.into_panic().as_ref()),
            }),
            Err(_cancelled) => Err(TaskExecutionError::Cancelled {
                label: label.into_owned(),
            }),
        };

        match outcome {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::AcqRel);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
                error!(worker = index, error = %err, "task failed");
            }
        }
    }
    debug!(worker = index, "executor worker exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn drain_runs_everything_queued() {
        let executor = TaskExecutor::new(1, &Handle::current());
        let hits = Arc::new(AtomicU32::new(0));
        for _ in 0..5 {
            let hits = Arc::clone(&hits);
            executor
                .submit("count", move || {
                    std::thread::sleep(Duration::from_millis(5));
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        executor.shutdown(ShutdownMode::Drain).await;
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        let stats = executor.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.abandoned, 0);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let executor = TaskExecutor::new(2, &Handle::current());
        let hits = Arc::new(AtomicU32::new(0));

        let first = Arc::clone(&hits);
        executor
            .submit("ok-1", move || {
                first.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        executor.submit("err", || Err("no save slot".into())).unwrap();
        executor.submit("panic", || panic!("sweep crashed")).unwrap();
        let second = Arc::clone(&hits);
        executor
            .submit("ok-2", move || {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        executor.shutdown(ShutdownMode::Drain).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let stats = executor.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let executor = TaskExecutor::new(1, &Handle::current());
        executor.shutdown(ShutdownMode::Drain).await;
        executor.shutdown(ShutdownMode::Drain).await;
        assert!(!executor.is_open());
        assert!(matches!(
            executor.submit("late", || Ok(())),
            Err(ExecutorError::ShutDown { label }) if label == "late"
        ));
        assert_eq!(executor.stats().submitted, 0);
    }

    #[tokio::test]
    async fn abandon_drops_queued_work() {
        let executor = TaskExecutor::new(1, &Handle::current());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let ran_second = Arc::new(AtomicU32::new(0));

        executor
            .submit("slow", move || {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            })
            .unwrap();
        let flag = Arc::clone(&ran_second);
        executor
            .submit("queued", move || {
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        started_rx.await.unwrap();
        executor.shutdown(ShutdownMode::Abandon).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ran_second.load(Ordering::SeqCst), 0);

        let stats = executor.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.abandoned, 2);
        assert_eq!(
            stats.submitted,
            stats
                .completed
                .saturating_add(stats.failed)
                .saturating_add(stats.abandoned)
        );
    }

    #[tokio::test]
    async fn submit_returns_without_waiting_for_work() {
        let executor = TaskExecutor::new(1, &Handle::current());
        let started = std::time::Instant::now();
        executor
            .submit("slow", || {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        executor.shutdown(ShutdownMode::Drain).await;
    }
}
