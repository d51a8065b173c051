//! Concurrency substrate the engine runs on.
//!
//! The engine consumes two capabilities from its host:
//!
//! - A [`WorkerPool`] that runs units of work concurrently, in no particular
//!   order. Attempts and completion classification run here.
//! - A [`DelayScheduler`] that runs a job once, no earlier than a given delay.
//!   It never classifies anything; the engine's jobs only hand the next
//!   attempt back to the worker pool.
//!
//! [`TokioWorkerPool`] and [`TokioDelayScheduler`] implement both on a tokio
//! runtime. Hosts with their own executors implement the traits directly.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::EngineError;

/// Unit of work accepted by a [`WorkerPool`].
pub type Task = BoxFuture<'static, ()>;

/// Unit of work accepted by a [`DelayScheduler`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs units of work immediately and concurrently.
pub trait WorkerPool: Send + Sync + fmt::Debug + 'static {
    /// Starts `task`. Must not block the caller until the task completes.
    fn execute(&self, task: Task);
}

/// Runs a job once after a minimum delay.
///
/// Jobs must never run before their delay has elapsed. No ordering is
/// promised between jobs beyond that.
pub trait DelayScheduler: Send + Sync + fmt::Debug + 'static {
    /// Arranges for `job` to run no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, job: Job);
}

impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn execute(&self, task: Task) {
        (**self).execute(task);
    }
}

impl<T: DelayScheduler + ?Sized> DelayScheduler for Arc<T> {
    fn schedule(&self, delay: Duration, job: Job) {
        (**self).schedule(delay, job);
    }
}

/// Worker pool that spawns every task on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioWorkerPool {
    handle: Handle,
}

impl TokioWorkerPool {
    /// Uses the given runtime.
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    pub fn try_current() -> Result<Self, EngineError> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl WorkerPool for TokioWorkerPool {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn(task));
    }
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Single-task delay scheduler on a tokio runtime.
///
/// One driver task owns a time-ordered heap of pending jobs and runs each
/// job inline once its deadline passes. The driver stops when the shutdown
/// token is cancelled, dropping whatever is still pending, or once every
/// handle to the scheduler is gone and the heap has drained.
#[derive(Debug, Clone)]
pub struct TokioDelayScheduler {
    tx: mpsc::UnboundedSender<Scheduled>,
    seq: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl TokioDelayScheduler {
    /// Starts a scheduler on the given runtime.
    pub fn new(handle: &Handle) -> Self {
        Self::with_shutdown(handle, CancellationToken::new())
    }

    /// Starts a scheduler on the runtime the caller is running on.
    pub fn try_current() -> Result<Self, EngineError> {
        Ok(Self::new(&Handle::try_current()?))
    }

    /// Starts a scheduler whose driver stops when `shutdown` is cancelled.
    pub fn with_shutdown(handle: &Handle, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(drive(rx, shutdown.clone()));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
            shutdown,
        }
    }

    /// Stops the driver. Pending jobs never run.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl DelayScheduler for TokioDelayScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        let entry = Scheduled {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            job,
        };
        if self.tx.send(entry).is_err() {
            debug!(?delay, "delay scheduler stopped, dropping job");
        }
    }
}

async fn drive(mut rx: mpsc::UnboundedReceiver<Scheduled>, shutdown: CancellationToken) {
    let mut queue: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    let mut open = true;

    loop {
        if !open && queue.is_empty() {
            trace!("delay scheduler drained");
            return;
        }

        let next_deadline = queue.peek().map(|Reverse(entry)| entry.deadline);

        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                debug!(pending = queue.len(), "delay scheduler shut down");
                return;
            }

            received = rx.recv(), if open => match received {
                Some(entry) => queue.push(Reverse(entry)),
                None => open = false,
            },

            () = wait_until(next_deadline) => {
                let now = Instant::now();
                while queue.peek().is_some_and(|Reverse(entry)| entry.deadline <= now) {
                    if let Some(Reverse(entry)) = queue.pop() {
                        trace!(seq = entry.seq, "running scheduled job");
                        (entry.job)();
                    }
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    fn recorder() -> (Arc<Mutex<Vec<(u32, Instant)>>>, impl Fn(u32) -> Job) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let make = move |label: u32| -> Job {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().push((label, Instant::now())))
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_never_run_before_their_delay() {
        let scheduler = TokioDelayScheduler::try_current().expect("inside runtime");
        let (fired, job) = recorder();
        let start = Instant::now();

        scheduler.schedule(Duration::from_secs(10), job(1));

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert!(fired.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let fired = fired.lock();
        assert_eq!(fired.len(), 1);
        assert!(fired[0].1 - start >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_fire_in_deadline_order() {
        let scheduler = TokioDelayScheduler::try_current().expect("inside runtime");
        let (fired, job) = recorder();

        scheduler.schedule(Duration::from_secs(30), job(30));
        scheduler.schedule(Duration::from_secs(5), job(5));
        scheduler.schedule(Duration::from_secs(20), job(20));

        tokio::time::sleep(Duration::from_secs(31)).await;

        let labels: Vec<u32> = fired.lock().iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, vec![5, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_jobs() {
        let scheduler = TokioDelayScheduler::try_current().expect("inside runtime");
        let (fired, job) = recorder();

        scheduler.schedule(Duration::from_secs(5), job(1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(fired.lock().is_empty());
        // Scheduling after shutdown is a silent no-op.
        scheduler.schedule(Duration::from_secs(1), job(2));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.lock().is_empty());
    }

    #[tokio::test]
    async fn tokio_worker_pool_runs_tasks() {
        let pool = TokioWorkerPool::try_current().expect("inside runtime");
        let (tx, rx) = oneshot::channel();

        pool.execute(Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.expect("task ran"), 42);
    }

    #[test]
    fn worker_pool_requires_a_runtime() {
        assert!(matches!(
            TokioWorkerPool::try_current(),
            Err(EngineError::NoRuntime(_))
        ));
    }
}
