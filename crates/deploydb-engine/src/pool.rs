//! Bounded worker pool for provisioning and teardown tasks.
//!
//! Tasks go through a bounded queue to a dispatcher that runs at most
//! `max_concurrent` of them at once. Enqueueing never waits: a full queue is
//! reported to the caller as backpressure. Shutdown stops intake, drains
//! what is already queued, and waits for running tasks to finish.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Future returned by a task handler; resolves to whether the task succeeded.
pub type TaskFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Runs one task.
pub type TaskHandler<T> = Arc<dyn Fn(T) -> TaskFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("queue is full")]
    Full,
    #[error("pool is shut down")]
    Closed,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// Waiting for a free worker.
    pub queued: usize,
    /// Currently running.
    pub in_flight: usize,
    /// Finished successfully since start.
    pub completed: u64,
    /// Finished unsuccessfully (or panicked) since start.
    pub failed: u64,
}

impl TaskStats {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.in_flight == 0
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    idle: Notify,
}

impl Counters {
    fn snapshot(&self) -> TaskStats {
        TaskStats {
            queued: self.queued.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    fn notify_if_idle(&self) {
        if self.snapshot().is_idle() {
            self.idle.notify_waiters();
        }
    }
}

/// A reserved queue slot. Sending cannot fail once reserved.
pub struct Reservation<T> {
    permit: mpsc::OwnedPermit<T>,
    counters: Arc<Counters>,
}

impl<T> Reservation<T> {
    pub fn send(self, task: T) {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        self.permit.send(task);
    }
}

/// Bounded queue plus a fixed number of concurrent workers.
pub struct WorkerPool<T> {
    sender: RwLock<Option<mpsc::Sender<T>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start the pool. Must be called from within a tokio runtime.
    pub fn spawn(max_concurrent: usize, queue_depth: usize, handler: TaskHandler<T>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let counters = Arc::new(Counters::default());
        let dispatcher = tokio::spawn(dispatch(rx, handler, max_concurrent, counters.clone()));
        info!(max_concurrent, queue_depth, "worker pool started");
        Self {
            sender: RwLock::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            counters,
        }
    }

    /// Reserve a queue slot without waiting.
    pub fn reserve(&self) -> Result<Reservation<T>, PoolError> {
        let sender = self
            .sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(PoolError::Closed)?;
        let permit = sender.try_reserve_owned().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::Full,
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })?;
        Ok(Reservation {
            permit,
            counters: self.counters.clone(),
        })
    }

    /// Enqueue a task without waiting.
    pub fn submit(&self, task: T) -> Result<(), PoolError> {
        self.reserve()?.send(task);
        Ok(())
    }

    pub fn stats(&self) -> TaskStats {
        self.counters.snapshot()
    }

    /// Wait until nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            if self.stats().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting tasks, finish everything already accepted, then return.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                error!(error = %e, "worker pool dispatcher failed");
            }
            info!(stats = ?self.stats(), "worker pool stopped");
        }
    }
}

async fn dispatch<T: Send + 'static>(
    mut rx: mpsc::Receiver<T>,
    handler: TaskHandler<T>,
    max_concurrent: usize,
    counters: Arc<Counters>,
) {
    let workers = Arc::new(Semaphore::new(max_concurrent));

    while let Some(task) = rx.recv().await {
        let Ok(permit) = workers.clone().acquire_owned().await else {
            break;
        };
        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        counters.queued.fetch_sub(1, Ordering::SeqCst);

        let handler = handler.clone();
        let counters = counters.clone();
        tokio::spawn(async move {
            match tokio::spawn(handler(task)).await {
                Ok(true) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(false) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    error!(error = %e, "worker task panicked");
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            counters.notify_if_idle();
        });
    }

    // Intake is closed; wait for running tasks.
    let _ = workers.acquire_many(max_concurrent as u32).await;
    debug!("worker pool drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handler(
        peak: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
        delay: Duration,
    ) -> TaskHandler<bool> {
        Arc::new(move |succeed: bool| -> TaskFuture {
            let peak = peak.clone();
            let running = running.clone();
            Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                running.fetch_sub(1, Ordering::SeqCst);
                succeed
            })
        })
    }

    #[tokio::test]
    async fn runs_tasks_and_counts_outcomes() {
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::spawn(
            2,
            16,
            handler(peak.clone(), Arc::new(AtomicUsize::new(0)), Duration::from_millis(10)),
        );

        for i in 0..6 {
            pool.submit(i % 3 != 0).unwrap();
        }
        pool.wait_idle().await;

        let stats = pool.stats();
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.failed, 2);
        assert!(stats.is_idle());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn full_queue_is_backpressure() {
        let pool = WorkerPool::spawn(
            1,
            1,
            handler(
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
                Duration::from_millis(200),
            ),
        );

        let mut results = Vec::new();
        for _ in 0..5 {
            results.push(pool.submit(true));
        }
        assert!(results.contains(&Err(PoolError::Full)));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_then_refuses() {
        let pool = WorkerPool::spawn(
            1,
            8,
            handler(
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
                Duration::from_millis(5),
            ),
        );
        for _ in 0..3 {
            pool.submit(true).unwrap();
        }

        pool.shutdown().await;
        assert_eq!(pool.stats().completed, 3);
        assert_eq!(pool.submit(true), Err(PoolError::Closed));
    }

    #[tokio::test]
    async fn panicking_task_counts_as_failed() {
        let pool: WorkerPool<bool> = WorkerPool::spawn(
            1,
            4,
            Arc::new(|explode: bool| -> TaskFuture {
                Box::pin(async move {
                    assert!(!explode, "boom");
                    true
                })
            }),
        );
        pool.submit(true).unwrap();
        pool.wait_idle().await;
        assert_eq!(pool.stats().failed, 1);
    }
}
