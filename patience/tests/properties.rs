//! Property-based tests for the retry engine's invariants.
//!
//! All properties run on the deterministic harness, so thousands of retry
//! timelines are checked without touching a real clock.

use std::time::Duration;

use patience::testing::prelude::*;
use patience::{ErrorType, ExecuteError, ResultType, RetryPolicy, Termination};
use proptest::prelude::*;

/// Mirrors how a scripted attempt turns a classification into a step.
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Result(ResultType),
    Error(ErrorType),
    SyncError(ErrorType),
}

impl Outcome {
    fn into_step(self) -> Step {
        match self {
            Self::Result(result) => Step::Resolve(result),
            Self::Error(error) => Step::Reject(error),
            Self::SyncError(ErrorType::Abort) => Step::Fail(ExecuteError::abort()),
            Self::SyncError(ErrorType::FailButResetBackoff) => {
                Step::Fail(ExecuteError::reset_backoff())
            }
            Self::SyncError(ErrorType::FailAndBackoff) => Step::Fail(ExecuteError::backoff()),
        }
    }
}

fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        arb_result_type().prop_map(Outcome::Result),
        arb_error_type().prop_map(Outcome::Error),
        arb_error_type().prop_map(Outcome::SyncError),
    ]
}

/// Drives the harness until nothing is left to run, with a safety cap.
fn drain(harness: &DeterministicHarness, cap: usize) {
    for _ in 0..cap {
        if harness.fire_next().is_none() {
            break;
        }
    }
}

proptest! {
    #[test]
    fn delays_follow_the_capped_exponential_sequence(
        initial in 1u64..=60,
        extra in 0u64..=3600,
        multiplier in 1u32..=4,
        failures in 1u32..25,
    ) {
        let max = initial + extra;
        let policy = RetryPolicy::builder()
            .initial_interval(u32::try_from(initial).expect("small interval"))
            .max_interval(u32::try_from(max).expect("small interval"))
            .multiplier(f64::from(multiplier))
            .build()
            .expect("valid policy");
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new(
            (0..failures)
                .map(|_| Step::Fail(ExecuteError::backoff()))
                .chain(std::iter::once(Step::Resolve(ResultType::Success))),
        );

        harness.submit(command.clone(), policy);
        drain(&harness, failures as usize + 1);

        // Whole-number growth never truncates, so the closed form holds.
        let expected: Vec<Duration> = (0..failures)
            .map(|n| {
                let grown = u64::from(multiplier)
                    .checked_pow(n)
                    .and_then(|factor| initial.checked_mul(factor))
                    .unwrap_or(u64::MAX);
                Duration::from_secs(grown.min(max))
            })
            .collect();
        prop_assert_eq!(harness.scheduler.history(), expected);
        prop_assert_eq!(command.successes(), 1);
    }

    #[test]
    fn delays_never_exceed_max_and_never_shrink_between_resets(
        policy in arb_unbounded_retry_policy(),
        failures in 1usize..40,
    ) {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new(
            (0..failures).map(|_| Step::Reject(ErrorType::FailAndBackoff)),
        );

        harness.submit(command, policy);
        drain(&harness, failures);

        let history = harness.scheduler.history();
        let max = Duration::from_secs(policy.max_interval_secs());
        prop_assert!(history.iter().all(|d| *d <= max));
        prop_assert!(history.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn reset_restores_the_initial_interval(
        policy in arb_unbounded_retry_policy(),
        before in 1usize..10,
    ) {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new(
            (0..before)
                .map(|_| Step::Reject(ErrorType::FailAndBackoff))
                .chain([
                    Step::Reject(ErrorType::FailButResetBackoff),
                    Step::Reject(ErrorType::FailAndBackoff),
                    Step::Resolve(ResultType::Success),
                ]),
        );

        harness.submit(command, policy);
        drain(&harness, before + 3);

        let history = harness.scheduler.history();
        prop_assert_eq!(history.len(), before + 1);
        prop_assert_eq!(
            history.last().copied(),
            Some(Duration::from_secs(policy.initial_interval_secs()))
        );
    }

    #[test]
    fn at_most_one_terminal_callback_per_submission(
        policy in arb_retry_policy(),
        outcomes in prop::collection::vec(arb_outcome(), 1..30),
    ) {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new(outcomes.into_iter().map(Outcome::into_step));

        harness.submit(command.clone(), policy);
        drain(&harness, 64);

        prop_assert!(command.callbacks() <= 1);
        prop_assert!(harness.terminations().len() <= 1);
        match harness.terminations().first() {
            Some(Termination::Succeeded) => prop_assert_eq!(command.successes(), 1),
            Some(Termination::Abandoned) => prop_assert_eq!(command.exceeded(), 1),
            Some(_) => prop_assert_eq!(command.callbacks(), 0),
            None => prop_assert_eq!(command.callbacks(), 0),
        }
    }

    #[test]
    fn bounded_policies_give_up_once_the_budget_is_spent(
        policy in arb_bounded_retry_policy(),
    ) {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));

        harness.submit(command.clone(), policy);
        drain(&harness, 10_000);

        let budget = Duration::from_secs(policy.finally_fail_after_secs());
        prop_assert_eq!(command.exceeded(), 1);
        prop_assert_eq!(harness.terminations(), vec![Termination::Abandoned]);
        prop_assert!(harness.clock.now() >= budget);
        // The decision before the last one was still within budget
        let history = harness.scheduler.history();
        let last_delay = history.last().copied().unwrap_or_default();
        prop_assert!(harness.clock.now() - last_delay < budget);
    }

    #[test]
    fn missing_policy_never_schedules_a_retry(
        outcomes in prop::collection::vec(arb_outcome(), 1..20),
    ) {
        let harness = DeterministicHarness::new();
        let command = ScriptedCommand::new(outcomes.into_iter().map(Outcome::into_step));

        harness.submit(command.clone(), None);

        prop_assert!(harness.scheduler.history().is_empty());
        prop_assert!(command.callbacks() <= 1);
    }
}
