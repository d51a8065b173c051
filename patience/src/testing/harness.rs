//! Deterministic substrate for driving the engine step by step.
//!
//! [`ManualWorkerPool`] queues tasks and polls them only from
//! [`run_until_idle`](ManualWorkerPool::run_until_idle). [`ManualScheduler`]
//! keeps scheduled jobs against a [`ManualClock`] and fires them in deadline
//! order, moving the clock forward to each deadline. Together they make
//! retry timelines reproducible without sleeping.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::task::noop_waker;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::command::RetriableCommand;
use crate::executor::RetryingExecutor;
use crate::observer::Termination;
use crate::policy::RetryPolicy;
use crate::runtime::{DelayScheduler, Job, Task, WorkerPool};
use crate::testing::observer::RecordingObserver;

/// Clock that only moves when told to. Starts at zero.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::AcqRel);
    }

    /// Moves the clock to `millis` unless it is already past it.
    pub fn advance_to(&self, millis: u64) {
        self.millis.fetch_max(millis, Ordering::AcqRel);
    }

    /// Current reading as a duration since zero.
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now_millis())
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

/// Worker pool that runs nothing until asked.
///
/// Tasks are polled with a no-op waker. A task that is still pending after
/// its poll is parked and polled again on the next call to
/// [`run_until_idle`](Self::run_until_idle).
#[derive(Default)]
pub struct ManualWorkerPool {
    queue: Mutex<VecDeque<Task>>,
    parked: Mutex<Vec<Task>>,
}

impl ManualWorkerPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Polls parked tasks once, then every queued task (including tasks
    /// queued while running) until the queue is empty. Returns how many
    /// tasks completed.
    pub fn run_until_idle(&self) -> usize {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut ready = VecDeque::from(std::mem::take(&mut *self.parked.lock()));
        let mut still_pending = Vec::new();
        let mut completed = 0;

        loop {
            let next = ready.pop_front().or_else(|| self.queue.lock().pop_front());
            let Some(mut task) = next else { break };
            match task.as_mut().poll(&mut cx) {
                Poll::Ready(()) => completed += 1,
                Poll::Pending => still_pending.push(task),
            }
        }

        self.parked.lock().extend(still_pending);
        completed
    }

    /// Tasks queued but not yet polled.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Tasks polled at least once that have not completed.
    pub fn parked(&self) -> usize {
        self.parked.lock().len()
    }
}

impl std::fmt::Debug for ManualWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualWorkerPool")
            .field("queued", &self.queued())
            .field("parked", &self.parked())
            .finish()
    }
}

impl WorkerPool for ManualWorkerPool {
    fn execute(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

struct Pending {
    due_millis: u64,
    seq: u64,
    delay: Duration,
    job: Job,
}

/// Delay scheduler that holds jobs until a test fires them.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    pending: Mutex<Vec<Pending>>,
    history: Mutex<Vec<Duration>>,
    seq: AtomicU64,
}

impl ManualScheduler {
    /// Creates a scheduler measuring deadlines on `clock`.
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            pending: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Runs the job with the earliest deadline, first advancing the clock to
    /// that deadline. Returns the delay the job was scheduled with.
    pub fn fire_next(&self) -> Option<Duration> {
        let next = {
            let mut pending = self.pending.lock();
            let index = pending
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| (p.due_millis, p.seq))
                .map(|(index, _)| index)?;
            pending.swap_remove(index)
        };
        self.clock.advance_to(next.due_millis);
        (next.job)();
        Some(next.delay)
    }

    /// Jobs scheduled and not yet fired.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Every delay ever scheduled, in scheduling order.
    pub fn history(&self) -> Vec<Duration> {
        self.history.lock().clone()
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .field("history", &self.history())
            .finish_non_exhaustive()
    }
}

impl DelayScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        let delay_millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let entry = Pending {
            due_millis: self.clock.now_millis().saturating_add(delay_millis),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            delay,
            job,
        };
        self.history.lock().push(delay);
        self.pending.lock().push(entry);
    }
}

/// An executor wired to a manual clock, pool, scheduler and a recording
/// observer.
///
/// # Example
/// ```rust,ignore
/// let harness = DeterministicHarness::new();
/// harness.submit(command.clone(), policy);
/// while harness.fire_next().is_some() {}
/// assert_eq!(harness.terminations(), vec![Termination::Succeeded]);
/// ```
#[derive(Debug)]
pub struct DeterministicHarness {
    /// Clock the executor measures patience on
    pub clock: Arc<ManualClock>,
    /// Pool the executor runs attempts on
    pub pool: Arc<ManualWorkerPool>,
    /// Scheduler the executor delays retries on
    pub scheduler: Arc<ManualScheduler>,
    /// Observer attached to the executor
    pub observer: Arc<RecordingObserver>,
    executor: RetryingExecutor,
}

impl DeterministicHarness {
    /// Creates a harness with the clock at zero and nothing queued.
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let pool = Arc::new(ManualWorkerPool::new());
        let scheduler = Arc::new(ManualScheduler::new(Arc::clone(&clock)));
        let observer = Arc::new(RecordingObserver::new());
        let executor = RetryingExecutor::builder()
            .worker_pool(Arc::clone(&pool))
            .delay_scheduler(Arc::clone(&scheduler))
            .clock(Arc::clone(&clock))
            .observer(Arc::clone(&observer))
            .build();
        Self {
            clock,
            pool,
            scheduler,
            observer,
            executor,
        }
    }

    /// The executor under test.
    pub const fn executor(&self) -> &RetryingExecutor {
        &self.executor
    }

    /// Submits a command and runs the pool until idle.
    pub fn submit<C: RetriableCommand>(&self, command: C, policy: impl Into<Option<RetryPolicy>>) {
        self.executor.submit(command, policy);
        self.run_until_idle();
    }

    /// Runs queued work until the pool is idle.
    pub fn run_until_idle(&self) -> usize {
        self.pool.run_until_idle()
    }

    /// Fires the earliest scheduled retry, then runs the pool until idle.
    /// Returns the delay that retry was scheduled with.
    pub fn fire_next(&self) -> Option<Duration> {
        let delay = self.scheduler.fire_next()?;
        self.run_until_idle();
        Some(delay)
    }

    /// Terminal outcomes seen so far, in order.
    pub fn terminations(&self) -> Vec<Termination> {
        self.observer
            .terminations()
            .into_iter()
            .map(|(_, termination)| termination)
            .collect()
    }
}

impl Default for DeterministicHarness {
    fn default() -> Self {
        Self::new()
    }
}
