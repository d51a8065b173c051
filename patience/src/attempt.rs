//! Per-submission retry state machine.
//!
//! An [`Attempt`] is created once per submission and reused, by identity,
//! for every retry of it. One run calls `execute()`, and the outcome drives
//! exactly one next step:
//!
//! ```text
//! NotStarted -> Running -> { Succeeded | Abandoned | Aborted | Cancelled }
//!               Running -> (immediate resubmit | scheduled resubmit) -> Running
//! ```
//!
//! A new run is only handed to the worker pool after the previous run has
//! reached its decision, so runs of one submission never overlap. The fields
//! that survive between runs are still read and written from different worker
//! threads, which is why they live in a [`OnceLock`] and an atomic.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::clock::Clock;
use crate::command::{ErrorType, PendingResult, ResultType, RetriableCommand};
use crate::errors::AsyncError;
use crate::observer::{AttemptContext, BackoffContext, RetryObserver, SubmissionId, Termination};
use crate::policy::RetryPolicy;
use crate::runtime::{DelayScheduler, WorkerPool};

/// Everything an attempt borrows from the engine that submitted it.
pub(crate) struct Wiring {
    pub(crate) pool: Arc<dyn WorkerPool>,
    pub(crate) scheduler: Arc<dyn DelayScheduler>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) observer: Arc<dyn RetryObserver>,
    pub(crate) shutdown: CancellationToken,
}

pub(crate) struct Attempt<C: RetriableCommand> {
    id: SubmissionId,
    command: C,
    policy: Option<RetryPolicy>,
    wiring: Arc<Wiring>,
    first_attempt_at: OnceLock<u64>,
    current_interval_secs: AtomicU64,
    attempts: AtomicU32,
    terminated: AtomicBool,
}

impl<C: RetriableCommand> Attempt<C> {
    pub(crate) fn new(command: C, policy: Option<RetryPolicy>, wiring: Arc<Wiring>) -> Arc<Self> {
        let initial = policy.map_or(0, |p| p.initial_interval_secs());
        Arc::new(Self {
            id: SubmissionId::new(),
            command,
            policy,
            wiring,
            first_attempt_at: OnceLock::new(),
            current_interval_secs: AtomicU64::new(initial),
            attempts: AtomicU32::new(0),
            terminated: AtomicBool::new(false),
        })
    }

    pub(crate) const fn id(&self) -> SubmissionId {
        self.id
    }

    /// Hands the next run to the worker pool.
    pub(crate) fn submit(self: Arc<Self>) {
        let pool = Arc::clone(&self.wiring.pool);
        pool.execute(Box::pin(async move { self.run() }));
    }

    fn run(self: Arc<Self>) {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let span = debug_span!("attempt", submission = %self.id, attempt);
        let _entered = span.enter();

        if self.wiring.shutdown.is_cancelled() {
            debug!("engine shut down before attempt started");
            self.finish(Termination::Cancelled);
            return;
        }

        let clock = &self.wiring.clock;
        let first = *self.first_attempt_at.get_or_init(|| clock.now_millis());
        self.wiring.observer.on_attempt(&AttemptContext {
            submission: self.id,
            attempt,
            elapsed: clock.elapsed_since(first),
        });

        debug!("executing");
        let started = self.command.execute();
        match started {
            Ok(pending) => {
                let pool = Arc::clone(&self.wiring.pool);
                let listener = Arc::clone(&self).complete(pending);
                pool.execute(Box::pin(listener.instrument(span.clone())));
            }
            Err(error) => {
                debug!(class = %error.class(), %error, "execute failed");
                self.apply_error_type(error.class());
            }
        }
    }

    async fn complete(self: Arc<Self>, pending: PendingResult<C::Output, C::Error>) {
        let shutdown = self.wiring.shutdown.clone();
        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(AsyncError::Cancelled),
            outcome = pending => outcome,
        };

        match outcome {
            Ok(result) => self.handle_result(result),
            Err(AsyncError::Failed(error)) => self.handle_async_error(&error),
            Err(AsyncError::Cancelled) => {
                // Presumably a shutdown; neither retried nor reported.
                debug!("pending result cancelled");
                self.finish(Termination::Cancelled);
            }
        }
    }

    fn handle_result(self: Arc<Self>, result: C::Output) {
        let class = self.command.check_result(&result);
        debug!(?result, %class, "result classified");
        match class {
            ResultType::Success => {
                info!(attempts = self.attempts.load(Ordering::Acquire), "command succeeded");
                self.command.on_success(result);
                self.finish(Termination::Succeeded);
            }
            ResultType::FailureWithoutBackoff => self.reset_and_resubmit(),
            ResultType::FailureWithBackoff => self.backoff_or_abandon(),
        }
    }

    fn handle_async_error(self: Arc<Self>, error: &C::Error) {
        let class = self.command.check_async_error(error);
        debug!(?error, %class, "async error classified");
        self.apply_error_type(class);
    }

    fn apply_error_type(self: Arc<Self>, class: ErrorType) {
        match class {
            ErrorType::Abort => {
                debug!("command aborted");
                self.finish(Termination::Aborted);
            }
            ErrorType::FailButResetBackoff => self.reset_and_resubmit(),
            ErrorType::FailAndBackoff => self.backoff_or_abandon(),
        }
    }

    fn reset_and_resubmit(self: Arc<Self>) {
        if let Some(policy) = self.policy {
            self.current_interval_secs
                .store(policy.initial_interval_secs(), Ordering::Release);
        }
        debug!("backoff reset, retrying immediately");
        self.submit();
    }

    fn backoff_or_abandon(self: Arc<Self>) {
        let elapsed = self.elapsed();
        let Some(policy) = self.policy else {
            warn!("no retry policy, giving up after first failure");
            self.abandon();
            return;
        };
        if policy.is_exhausted(elapsed) {
            warn!(
                elapsed_secs = elapsed.as_secs(),
                finally_fail_after_secs = policy.finally_fail_after_secs(),
                "retry patience exhausted"
            );
            self.abandon();
            return;
        }

        // The delay waited is the current interval; only the following one grows.
        let delay_secs = self.current_interval_secs.load(Ordering::Acquire);
        let next_secs = policy.next_interval(delay_secs);
        self.current_interval_secs.store(next_secs, Ordering::Release);

        let delay = Duration::from_secs(delay_secs);
        self.wiring.observer.on_backoff(&BackoffContext {
            submission: self.id,
            attempt: self.attempts.load(Ordering::Acquire),
            delay,
            next_delay: Duration::from_secs(next_secs),
            elapsed,
        });
        debug!(delay_secs, next_delay_secs = next_secs, "backing off");

        let scheduler = Arc::clone(&self.wiring.scheduler);
        scheduler.schedule(delay, Box::new(move || self.submit()));
    }

    fn abandon(self: Arc<Self>) {
        self.command.on_exceed_max_retries();
        self.finish(Termination::Abandoned);
    }

    fn elapsed(&self) -> Duration {
        let clock = &self.wiring.clock;
        let first = *self.first_attempt_at.get_or_init(|| clock.now_millis());
        clock.elapsed_since(first)
    }

    fn finish(&self, termination: Termination) {
        let already = self.terminated.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "submission {} terminated twice", self.id);
        debug!(%termination, "submission finished");
        self.wiring.observer.on_terminal(self.id, termination);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::command::{ErrorType, ResultType};
    use crate::errors::ExecuteError;
    use crate::observer::Termination;
    use crate::policy::RetryPolicy;
    use crate::testing::{DeterministicHarness, ScriptedCommand, Step};
    use tracing_test::traced_test;

    fn policy(initial: u32, multiplier: f64, max: u32, finally_fail_after: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .initial_interval(initial)
            .multiplier(multiplier)
            .max_interval(max)
            .finally_fail_after(finally_fail_after)
            .build()
            .expect("valid policy")
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn success_on_first_attempt_calls_on_success_once() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([Step::Resolve(ResultType::Success)]);

        harness.submit(command.clone(), RetryPolicy::default());

        assert_eq!(command.executions(), 1);
        assert_eq!(command.successes(), 1);
        assert_eq!(command.exceeded(), 0);
        assert_eq!(harness.terminations(), vec![Termination::Succeeded]);
        assert_eq!(harness.scheduler.pending(), 0);
    }

    #[test]
    fn scenario_a_backoff_grows_then_clamps() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));

        harness.submit(command.clone(), policy(5, 2.0, 30, 0));
        let delays: Vec<Duration> = (0..6).filter_map(|_| harness.fire_next()).collect();

        assert_eq!(delays, secs(&[5, 10, 20, 30, 30, 30]));
        assert_eq!(command.executions(), 7);
        assert_eq!(command.exceeded(), 0);
        assert!(harness.terminations().is_empty());
    }

    #[test]
    fn scenario_b_abandons_at_first_decision_after_budget() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));

        harness.submit(command.clone(), policy(5, 2.0, 1800, 12));

        assert_eq!(harness.fire_next(), Some(Duration::from_secs(5)));
        assert_eq!(command.exceeded(), 0);
        assert_eq!(harness.fire_next(), Some(Duration::from_secs(10)));

        assert_eq!(harness.clock.now(), Duration::from_secs(15));
        assert_eq!(command.executions(), 3);
        assert_eq!(command.exceeded(), 1);
        assert_eq!(harness.fire_next(), None);
        assert_eq!(harness.terminations(), vec![Termination::Abandoned]);
    }

    #[test]
    fn scenario_c_failure_without_backoff_resets_interval() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([
            Step::Resolve(ResultType::FailureWithBackoff),
            Step::Resolve(ResultType::FailureWithBackoff),
            Step::Resolve(ResultType::FailureWithoutBackoff),
            Step::Resolve(ResultType::FailureWithBackoff),
            Step::Resolve(ResultType::Success),
        ]);

        harness.submit(command.clone(), policy(5, 2.0, 1800, 0));
        assert_eq!(harness.fire_next(), Some(Duration::from_secs(5)));
        // Second failure waits 10; the reset retry then runs with no delay.
        assert_eq!(harness.fire_next(), Some(Duration::from_secs(10)));
        assert_eq!(harness.fire_next(), Some(Duration::from_secs(5)));

        assert_eq!(command.executions(), 5);
        assert_eq!(command.successes(), 1);
        assert_eq!(harness.scheduler.history(), secs(&[5, 10, 5]));
    }

    #[test]
    fn scenario_d_synchronous_abort_is_silent() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([Step::Fail(ExecuteError::abort())]);

        harness.submit(command.clone(), RetryPolicy::default());

        assert_eq!(command.executions(), 1);
        assert_eq!(command.successes(), 0);
        assert_eq!(command.exceeded(), 0);
        assert_eq!(harness.scheduler.pending(), 0);
        assert_eq!(harness.terminations(), vec![Termination::Aborted]);
    }

    #[test]
    fn async_abort_is_silent() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([Step::Reject(ErrorType::Abort)]);

        harness.submit(command.clone(), RetryPolicy::default());

        assert_eq!(command.callbacks(), 0);
        assert_eq!(harness.scheduler.pending(), 0);
        assert_eq!(harness.terminations(), vec![Termination::Aborted]);
    }

    #[test]
    fn cancelled_pending_result_is_silent() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([Step::Cancel]);

        harness.submit(command.clone(), policy(1, 2.0, 10, 1));

        assert_eq!(command.callbacks(), 0);
        assert_eq!(harness.scheduler.pending(), 0);
        assert_eq!(harness.terminations(), vec![Termination::Cancelled]);
    }

    #[test]
    fn synchronous_reset_retries_immediately_without_scheduling() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([
            Step::Fail(ExecuteError::reset_backoff()),
            Step::Fail(ExecuteError::reset_backoff()),
            Step::Resolve(ResultType::Success),
        ]);

        harness.submit(command.clone(), RetryPolicy::default());

        assert_eq!(command.executions(), 3);
        assert_eq!(command.successes(), 1);
        assert!(harness.scheduler.history().is_empty());
    }

    #[test]
    fn async_reset_restores_initial_interval() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([
            Step::Reject(ErrorType::FailAndBackoff),
            Step::Reject(ErrorType::FailAndBackoff),
            Step::Reject(ErrorType::FailAndBackoff),
            Step::Reject(ErrorType::FailButResetBackoff),
            Step::Reject(ErrorType::FailAndBackoff),
            Step::Resolve(ResultType::Success),
        ]);

        harness.submit(command.clone(), policy(2, 3.0, 100, 0));
        while harness.fire_next().is_some() {}

        assert_eq!(harness.scheduler.history(), secs(&[2, 6, 18, 2]));
        assert_eq!(command.successes(), 1);
    }

    #[test]
    fn missing_policy_abandons_on_first_backoff() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Reject(ErrorType::FailAndBackoff));

        harness.submit(command.clone(), None);

        assert_eq!(command.executions(), 1);
        assert_eq!(command.exceeded(), 1);
        assert_eq!(harness.scheduler.pending(), 0);
        assert_eq!(harness.terminations(), vec![Termination::Abandoned]);
    }

    #[test]
    fn missing_policy_still_retries_resets_immediately() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([
            Step::Resolve(ResultType::FailureWithoutBackoff),
            Step::Resolve(ResultType::Success),
        ]);

        harness.submit(command.clone(), None);

        assert_eq!(command.executions(), 2);
        assert_eq!(command.successes(), 1);
    }

    #[test]
    fn unbounded_policy_never_abandons() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Reject(ErrorType::FailAndBackoff));

        harness.submit(command.clone(), policy(1, 2.0, 3600, 0));
        for _ in 0..40 {
            assert!(harness.fire_next().is_some());
        }

        assert_eq!(command.exceeded(), 0);
        assert!(harness.clock.now() > Duration::from_secs(100_000));
    }

    #[test]
    fn backoff_context_reports_current_and_next_delay() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([
            Step::Fail(ExecuteError::backoff()),
            Step::Resolve(ResultType::Success),
        ]);

        harness.submit(command, policy(4, 2.5, 100, 0));
        harness.fire_next();

        let backoffs = harness.observer.backoffs();
        assert_eq!(backoffs.len(), 1);
        assert_eq!(backoffs[0].attempt, 1);
        assert_eq!(backoffs[0].delay, Duration::from_secs(4));
        assert_eq!(backoffs[0].next_delay, Duration::from_secs(10));
    }

    #[test]
    fn attempts_are_numbered_from_one_with_elapsed_time() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([
            Step::Fail(ExecuteError::backoff()),
            Step::Fail(ExecuteError::backoff()),
            Step::Resolve(ResultType::Success),
        ]);

        harness.submit(command, policy(5, 2.0, 100, 0));
        while harness.fire_next().is_some() {}

        let attempts = harness.observer.attempts();
        let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt).collect();
        let elapsed: Vec<Duration> = attempts.iter().map(|a| a.elapsed).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(elapsed, secs(&[0, 5, 15]));
        assert!(attempts.iter().all(|a| a.submission == attempts[0].submission));
    }

    #[test]
    fn shutdown_drops_scheduled_retry_silently() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));

        harness.submit(command.clone(), policy(5, 2.0, 100, 0));
        harness.executor().shutdown();
        harness.fire_next();

        assert_eq!(command.executions(), 1);
        assert_eq!(command.callbacks(), 0);
        assert_eq!(harness.terminations(), vec![Termination::Cancelled]);
    }

    #[test]
    fn shutdown_while_awaiting_result_is_silent() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new([Step::Hang]);

        harness.submit(command.clone(), RetryPolicy::default());
        assert!(harness.terminations().is_empty());

        harness.executor().shutdown();
        harness.run_until_idle();

        assert_eq!(command.callbacks(), 0);
        assert_eq!(harness.terminations(), vec![Termination::Cancelled]);
    }

    #[traced_test]
    #[test]
    fn abandonment_is_logged_as_a_warning() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));

        harness.submit(command, policy(5, 2.0, 100, 4));
        harness.fire_next();

        assert_eq!(harness.terminations(), vec![Termination::Abandoned]);
        assert!(logs_contain("retry patience exhausted"));
    }

    #[traced_test]
    #[test]
    fn shutdown_is_not_logged_as_abandonment() {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));

        harness.submit(command, policy(5, 2.0, 100, 4));
        harness.executor().shutdown();
        harness.fire_next();

        assert!(logs_contain("engine shut down before attempt started"));
        assert!(!logs_contain("retry patience exhausted"));
    }

    #[test]
    fn concurrent_submissions_keep_independent_intervals() {
        let harness = DeterministicHarness::new();
        let slow = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));
        let quick = ScriptedCommand::new([
            Step::Fail(ExecuteError::backoff()),
            Step::Resolve(ResultType::Success),
        ]);

        harness.submit(slow.clone(), policy(5, 2.0, 100, 0));
        harness.submit(quick.clone(), policy(3, 2.0, 100, 0));

        assert_eq!(harness.fire_next(), Some(Duration::from_secs(3)));
        assert_eq!(harness.fire_next(), Some(Duration::from_secs(5)));
        assert_eq!(harness.fire_next(), Some(Duration::from_secs(10)));

        assert_eq!(quick.successes(), 1);
        assert_eq!(slow.executions(), 3);
        assert_eq!(harness.clock.now(), Duration::from_secs(15));
    }
}
