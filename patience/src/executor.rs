//! The retry engine: the single entry point for submitting commands.
//!
//! [`RetryingExecutor::submit`] pairs a [`RetriableCommand`] with an optional
//! [`RetryPolicy`] and hands the first attempt to the worker pool. Nothing is
//! returned; every outcome surfaces through the command's own callbacks and
//! through the configured [`RetryObserver`].
//!
//! # Example
//!
//! ```rust,ignore
//! use patience::{RetryPolicy, RetryingExecutor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = RetryingExecutor::tokio();
//!     let policy = RetryPolicy::builder()
//!         .initial_interval(1)
//!         .max_interval(60)
//!         .finally_fail_after(600)
//!         .build()?;
//!
//!     executor.submit(SendWelcomeEmail::new(user), policy);
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attempt::{Attempt, Wiring};
use crate::clock::{Clock, MonotonicClock};
use crate::command::RetriableCommand;
use crate::errors::EngineError;
use crate::observer::{NoopObserver, RetryObserver};
use crate::policy::RetryPolicy;
use crate::runtime::{DelayScheduler, TokioDelayScheduler, TokioWorkerPool, WorkerPool};

/// Submits commands and drives their retries.
///
/// Cloning is cheap; clones share the worker pool, scheduler, clock,
/// observer and shutdown state. Submissions share nothing else.
#[derive(Clone)]
pub struct RetryingExecutor {
    wiring: Arc<Wiring>,
}

impl RetryingExecutor {
    /// Creates an executor on the given worker pool and delay scheduler,
    /// with the default clock and no observer.
    pub fn new(pool: impl WorkerPool, scheduler: impl DelayScheduler) -> Self {
        Self::builder()
            .worker_pool(pool)
            .delay_scheduler(scheduler)
            .build()
    }

    /// Starts a builder.
    pub fn builder() -> RetryingExecutorBuilder {
        RetryingExecutorBuilder::default()
    }

    /// Creates an executor on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime. See [`Self::try_tokio`].
    pub fn tokio() -> Self {
        Self::try_tokio().expect("RetryingExecutor::tokio() must be called inside a tokio runtime")
    }

    /// Creates an executor on the current tokio runtime.
    pub fn try_tokio() -> Result<Self, EngineError> {
        Ok(Self::builder().tokio(&Handle::try_current()?).build())
    }

    /// Submits `command` for execution with retries.
    ///
    /// With `None` for the policy the command gets no backoff: the first
    /// failure that would back off abandons the submission instead.
    ///
    /// After [`shutdown`](Self::shutdown) the command is dropped without
    /// running.
    pub fn submit<C>(&self, command: C, policy: impl Into<Option<RetryPolicy>>)
    where
        C: RetriableCommand,
    {
        let policy = policy.into();
        if self.is_shutdown() {
            warn!("executor is shut down, dropping submitted command");
            return;
        }

        let attempt = Attempt::new(command, policy, Arc::clone(&self.wiring));
        match &policy {
            Some(policy) => debug!(submission = %attempt.id(), %policy, "command submitted"),
            None => debug!(submission = %attempt.id(), "command submitted without retry policy"),
        }
        attempt.submit();
    }

    /// Stops the engine.
    ///
    /// Attempts waiting on a pending result and retries waiting on a delay
    /// terminate silently: no command callback is called. Attempts already
    /// inside `execute()` finish that call first.
    pub fn shutdown(&self) {
        if !self.wiring.shutdown.is_cancelled() {
            info!("shutting down retrying executor");
            self.wiring.shutdown.cancel();
        }
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.wiring.shutdown.is_cancelled()
    }

    /// Token cancelled on shutdown, for tying other tasks to the engine.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.wiring.shutdown.clone()
    }
}

impl fmt::Debug for RetryingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExecutor")
            .field("pool", &self.wiring.pool)
            .field("scheduler", &self.wiring.scheduler)
            .field("clock", &self.wiring.clock)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryingExecutor`].
///
/// The worker pool and delay scheduler are required; [`build`](Self::build)
/// falls back to the tokio adapters on the current runtime for whichever is
/// missing.
#[derive(Default)]
pub struct RetryingExecutorBuilder {
    pool: Option<Arc<dyn WorkerPool>>,
    scheduler: Option<Arc<dyn DelayScheduler>>,
    clock: Option<Arc<dyn Clock>>,
    observer: Option<Arc<dyn RetryObserver>>,
    shutdown: Option<CancellationToken>,
}

impl RetryingExecutorBuilder {
    /// Sets the worker pool that runs attempts and classification.
    #[must_use]
    pub fn worker_pool(mut self, pool: impl WorkerPool) -> Self {
        self.pool = Some(Arc::new(pool));
        self
    }

    /// Sets the scheduler that delays retries.
    #[must_use]
    pub fn delay_scheduler(mut self, scheduler: impl DelayScheduler) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Uses tokio for both the worker pool and the delay scheduler. The
    /// scheduler's driver stops when the executor shuts down.
    #[must_use]
    pub fn tokio(mut self, handle: &Handle) -> Self {
        let shutdown = self.shutdown.get_or_insert_with(CancellationToken::new).clone();
        self.pool = Some(Arc::new(TokioWorkerPool::new(handle.clone())));
        self.scheduler = Some(Arc::new(TokioDelayScheduler::with_shutdown(
            handle, shutdown,
        )));
        self
    }

    /// Sets the clock used to measure the patience budget.
    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Sets the observer notified of attempts, backoffs and terminations.
    #[must_use]
    pub fn observer(mut self, observer: impl RetryObserver) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Builds the executor.
    ///
    /// # Panics
    ///
    /// Panics when the worker pool or delay scheduler was not set and there
    /// is no current tokio runtime to fall back on.
    pub fn build(self) -> RetryingExecutor {
        let shutdown = self.shutdown.unwrap_or_default();
        let pool = self.pool.unwrap_or_else(|| {
            Arc::new(TokioWorkerPool::new(Handle::current())) as Arc<dyn WorkerPool>
        });
        let scheduler = self.scheduler.unwrap_or_else(|| {
            Arc::new(TokioDelayScheduler::with_shutdown(
                &Handle::current(),
                shutdown.clone(),
            )) as Arc<dyn DelayScheduler>
        });
        RetryingExecutor {
            wiring: Arc::new(Wiring {
                pool,
                scheduler,
                clock: self
                    .clock
                    .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn Clock>),
                observer: self
                    .observer
                    .unwrap_or_else(|| Arc::new(NoopObserver) as Arc<dyn RetryObserver>),
                shutdown,
            }),
        }
    }
}
