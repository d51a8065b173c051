//! Retry policy: the backoff shape and patience budget of a submission.
//!
//! A [`RetryPolicy`] is an immutable value. Every field is a validated
//! newtype, so a policy that exists is always usable: the initial interval is
//! positive, the multiplier never shrinks the interval, and the maximum is at
//! least the initial interval.
//!
//! Policies are usually built in code with [`RetryPolicy::builder`], or loaded
//! from configuration through `serde`:
//!
//! ```rust
//! use patience::RetryPolicy;
//!
//! let policy = RetryPolicy::from_json(
//!     r#"{ "initial_interval_seconds": 2, "max_interval_seconds": 60 }"#,
//! )
//! .unwrap();
//! assert_eq!(policy.initial_interval_secs(), 2);
//! assert_eq!(policy.interval_after_failures(10), 60);
//! ```

use std::fmt;
use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::errors::PolicyError;

/// Backoff used after the first failure, in seconds.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct InitialIntervalSeconds(u32);

/// Growth factor applied to the interval after each failure with backoff.
///
/// Must be finite and at least `1.0`.
#[nutype(
    validate(finite, greater_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Into, Serialize, Deserialize)
)]
pub struct IntervalMultiplier(f64);

/// Upper clamp on the computed interval, in seconds.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxIntervalSeconds(u32);

/// Total wall-clock budget, measured from the first attempt, before a
/// submission is abandoned. Zero means never abandon because of time.
#[nutype(
    default = 0,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct FinallyFailAfterSeconds(u32);

impl FinallyFailAfterSeconds {
    /// No time budget: the submission retries until it succeeds or aborts.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// True when this budget never expires.
    pub fn is_unbounded(self) -> bool {
        self.into_inner() == 0
    }

    /// The budget as a [`Duration`], or `None` when unbounded.
    pub fn as_duration(self) -> Option<Duration> {
        if self.is_unbounded() {
            None
        } else {
            Some(Duration::from_secs(self.into_inner().into()))
        }
    }
}

/// Immutable retry configuration for one submission.
///
/// The default policy starts at 5 seconds, doubles on every failure with
/// backoff, caps at 30 minutes, and never gives up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyConfig", into = "RetryPolicyConfig")]
pub struct RetryPolicy {
    initial_interval: InitialIntervalSeconds,
    multiplier: IntervalMultiplier,
    max_interval: MaxIntervalSeconds,
    finally_fail_after: FinallyFailAfterSeconds,
}

impl RetryPolicy {
    /// Default initial interval in seconds.
    pub const DEFAULT_INITIAL_INTERVAL_SECS: u32 = 5;
    /// Default interval multiplier.
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
    /// Default maximum interval in seconds.
    pub const DEFAULT_MAX_INTERVAL_SECS: u32 = 1800;

    /// Assembles a policy from already-validated parts.
    ///
    /// Fails when `max_interval` is below `initial_interval`.
    pub fn try_new(
        initial_interval: InitialIntervalSeconds,
        multiplier: IntervalMultiplier,
        max_interval: MaxIntervalSeconds,
        finally_fail_after: FinallyFailAfterSeconds,
    ) -> Result<Self, PolicyError> {
        let initial = initial_interval.into_inner();
        let max = max_interval.into_inner();
        if max < initial {
            return Err(PolicyError::MaxBelowInitial { initial, max });
        }
        Ok(Self {
            initial_interval,
            multiplier,
            max_interval,
            finally_fail_after,
        })
    }

    /// Starts a builder seeded with the default policy.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Parses a policy from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(json).map_err(|e| PolicyError::Parse(e.to_string()))
    }

    /// Backoff at first failure, in seconds.
    pub fn initial_interval_secs(&self) -> u64 {
        u64::from(self.initial_interval.into_inner())
    }

    /// Growth factor per failure with backoff.
    pub fn multiplier(&self) -> f64 {
        self.multiplier.into_inner()
    }

    /// Upper clamp on the interval, in seconds.
    pub fn max_interval_secs(&self) -> u64 {
        u64::from(self.max_interval.into_inner())
    }

    /// Patience budget in seconds; zero means unbounded.
    pub fn finally_fail_after_secs(&self) -> u64 {
        u64::from(self.finally_fail_after.into_inner())
    }

    /// The patience budget.
    pub const fn finally_fail_after(&self) -> FinallyFailAfterSeconds {
        self.finally_fail_after
    }

    /// True when the policy never abandons because of elapsed time.
    pub fn is_unbounded(&self) -> bool {
        self.finally_fail_after.is_unbounded()
    }

    /// The interval that follows `current` after one more failure with backoff.
    ///
    /// Multiplies, truncates to whole seconds, and clamps to the maximum.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn next_interval(&self, current_secs: u64) -> u64 {
        let grown = (current_secs as f64 * self.multiplier()) as u64;
        grown.min(self.max_interval_secs())
    }

    /// The delay used for the retry that follows `failures` consecutive
    /// failures with backoff and no reset.
    ///
    /// Applies [`next_interval`](Self::next_interval) `failures` times, so the
    /// truncation to whole seconds happens at every step. Integer multipliers
    /// give `min(initial * multiplier^n, max)`; fractional ones fall below it,
    /// e.g. 3s at x1.5 gives 3, 4, 6, 9, 13, 19.
    pub fn interval_after_failures(&self, failures: u32) -> u64 {
        let mut interval = self.initial_interval_secs();
        for _ in 0..failures {
            let next = self.next_interval(interval);
            if next == interval {
                break;
            }
            interval = next;
        }
        interval
    }

    /// True when `elapsed` has used up the patience budget.
    ///
    /// Never true for an unbounded policy.
    pub fn is_exhausted(&self, elapsed: Duration) -> bool {
        self.finally_fail_after
            .as_duration()
            .is_some_and(|budget| elapsed >= budget)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyConfig::default()
            .try_into()
            .expect("default retry policy should always be valid")
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryPolicy{{initial={}s, multiplier={}, max={}s, finally_fail_after=",
            self.initial_interval_secs(),
            self.multiplier(),
            self.max_interval_secs(),
        )?;
        if self.is_unbounded() {
            write!(f, "never}}")
        } else {
            write!(f, "{}s}}", self.finally_fail_after_secs())
        }
    }
}

/// Plain, unvalidated form of a [`RetryPolicy`] as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Backoff at first failure, in seconds.
    pub initial_interval_seconds: u32,
    /// Growth factor per failure with backoff.
    pub interval_multiplier: f64,
    /// Upper clamp on the interval, in seconds.
    pub max_interval_seconds: u32,
    /// Patience budget in seconds; zero means unbounded.
    pub finally_fail_after_seconds: u32,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            initial_interval_seconds: RetryPolicy::DEFAULT_INITIAL_INTERVAL_SECS,
            interval_multiplier: RetryPolicy::DEFAULT_MULTIPLIER,
            max_interval_seconds: RetryPolicy::DEFAULT_MAX_INTERVAL_SECS,
            finally_fail_after_seconds: 0,
        }
    }
}

impl TryFrom<RetryPolicyConfig> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(config: RetryPolicyConfig) -> Result<Self, Self::Error> {
        let initial = InitialIntervalSeconds::try_new(config.initial_interval_seconds)
            .map_err(|e| PolicyError::invalid("initial_interval_seconds", e))?;
        let multiplier = IntervalMultiplier::try_new(config.interval_multiplier)
            .map_err(|e| PolicyError::invalid("interval_multiplier", e))?;
        let max = MaxIntervalSeconds::try_new(config.max_interval_seconds)
            .map_err(|e| PolicyError::invalid("max_interval_seconds", e))?;
        let finally_fail_after = FinallyFailAfterSeconds::new(config.finally_fail_after_seconds);
        Self::try_new(initial, multiplier, max, finally_fail_after)
    }
}

impl From<RetryPolicy> for RetryPolicyConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            initial_interval_seconds: policy.initial_interval.into_inner(),
            interval_multiplier: policy.multiplier.into_inner(),
            max_interval_seconds: policy.max_interval.into_inner(),
            finally_fail_after_seconds: policy.finally_fail_after.into_inner(),
        }
    }
}

/// Fluent builder for [`RetryPolicy`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicyBuilder {
    config: RetryPolicyConfig,
}

impl RetryPolicyBuilder {
    /// Sets the initial interval in seconds.
    #[must_use]
    pub const fn initial_interval(mut self, seconds: u32) -> Self {
        self.config.initial_interval_seconds = seconds;
        self
    }

    /// Sets the interval multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.interval_multiplier = multiplier;
        self
    }

    /// Sets the maximum interval in seconds.
    #[must_use]
    pub const fn max_interval(mut self, seconds: u32) -> Self {
        self.config.max_interval_seconds = seconds;
        self
    }

    /// Sets the patience budget in seconds; zero means unbounded.
    #[must_use]
    pub const fn finally_fail_after(mut self, seconds: u32) -> Self {
        self.config.finally_fail_after_seconds = seconds;
        self
    }

    /// Validates and builds the policy.
    pub fn build(self) -> Result<RetryPolicy, PolicyError> {
        self.config.try_into()
    }
}
