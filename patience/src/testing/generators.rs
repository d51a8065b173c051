//! Property test generators for policies and classifications.
//!
//! Every generated policy passes validation, so strategies never need to
//! filter.

use proptest::prelude::*;

use crate::command::{ErrorType, ResultType};
use crate::policy::RetryPolicy;

/// Generates valid multipliers, including exactly `1.0`.
pub fn arb_multiplier() -> impl Strategy<Value = f64> {
    prop_oneof![Just(1.0), Just(1.5), Just(2.0), 1.0f64..4.0]
}

/// Generates valid `RetryPolicy` values, bounded or not.
///
/// Intervals stay under an hour so sequences reach the cap in a test-sized
/// number of steps.
///
/// # Example
/// ```rust,ignore
/// use proptest::prelude::*;
/// use patience::testing::generators::arb_retry_policy;
///
/// proptest! {
///     #[test]
///     fn first_delay_is_initial(policy in arb_retry_policy()) {
///         assert_eq!(policy.interval_after_failures(0), policy.initial_interval_secs());
///     }
/// }
/// ```
pub fn arb_retry_policy() -> impl Strategy<Value = RetryPolicy> {
    prop_oneof![arb_unbounded_retry_policy(), arb_bounded_retry_policy()]
}

/// Generates valid policies that never give up.
pub fn arb_unbounded_retry_policy() -> impl Strategy<Value = RetryPolicy> {
    policy_with_budget(Just(0u32))
}

/// Generates valid policies with a patience budget of 1 to 7200 seconds.
pub fn arb_bounded_retry_policy() -> impl Strategy<Value = RetryPolicy> {
    policy_with_budget(1u32..=7200)
}

fn policy_with_budget(budget: impl Strategy<Value = u32>) -> impl Strategy<Value = RetryPolicy> {
    (1u32..=60, 0u32..=3600, arb_multiplier(), budget).prop_map(
        |(initial, extra, multiplier, finally_fail_after)| {
            RetryPolicy::builder()
                .initial_interval(initial)
                .max_interval(initial.saturating_add(extra))
                .multiplier(multiplier)
                .finally_fail_after(finally_fail_after)
                .build()
                .expect("generated policy is valid")
        },
    )
}

/// Generates any `ResultType`.
pub fn arb_result_type() -> impl Strategy<Value = ResultType> {
    prop_oneof![
        Just(ResultType::Success),
        Just(ResultType::FailureWithoutBackoff),
        Just(ResultType::FailureWithBackoff),
    ]
}

/// Generates any `ErrorType`.
pub fn arb_error_type() -> impl Strategy<Value = ErrorType> {
    prop_oneof![
        Just(ErrorType::Abort),
        Just(ErrorType::FailButResetBackoff),
        Just(ErrorType::FailAndBackoff),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_policies_respect_bounds(policy in arb_retry_policy()) {
            prop_assert!(policy.initial_interval_secs() >= 1);
            prop_assert!(policy.max_interval_secs() >= policy.initial_interval_secs());
            prop_assert!(policy.multiplier() >= 1.0);
        }

        #[test]
        fn bounded_policies_have_a_budget(policy in arb_bounded_retry_policy()) {
            prop_assert!(!policy.is_unbounded());
        }
    }
}
