//! Hooks for observing submissions as they retry.
//!
//! Observers see every attempt, every scheduled backoff, and the one terminal
//! outcome of each submission. They are for metrics and diagnostics; they
//! cannot influence retry decisions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one submission, shared by all of its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubmissionId(Uuid);

impl SubmissionId {
    /// Creates a new time-ordered identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Context passed to [`RetryObserver::on_attempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    /// Submission the attempt belongs to
    pub submission: SubmissionId,
    /// One-based attempt number
    pub attempt: u32,
    /// Time since the first attempt started
    pub elapsed: Duration,
}

/// Context passed to [`RetryObserver::on_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffContext {
    /// Submission being rescheduled
    pub submission: SubmissionId,
    /// Attempt that just failed
    pub attempt: u32,
    /// Delay before the next attempt
    pub delay: Duration,
    /// Delay that will be used if the next attempt also backs off
    pub next_delay: Duration,
    /// Time since the first attempt started
    pub elapsed: Duration,
}

/// How a submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Termination {
    /// `on_success` was called.
    Succeeded,
    /// The patience budget ran out and `on_exceed_max_retries` was called.
    Abandoned,
    /// The command aborted; no callback was called.
    Aborted,
    /// The pending result was cancelled or the engine shut down; no callback
    /// was called.
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Abandoned => write!(f, "abandoned"),
            Self::Aborted => write!(f, "aborted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Receives notifications about submissions.
///
/// All methods default to doing nothing. Implementations are called from
/// worker pool tasks and must not block.
pub trait RetryObserver: Send + Sync + 'static {
    /// An attempt is about to call `execute()`.
    fn on_attempt(&self, _ctx: &AttemptContext) {}

    /// A failed attempt has been scheduled to run again after a delay.
    fn on_backoff(&self, _ctx: &BackoffContext) {}

    /// A submission reached its terminal state.
    fn on_terminal(&self, _submission: SubmissionId, _termination: Termination) {}
}

impl<T: RetryObserver + ?Sized> RetryObserver for std::sync::Arc<T> {
    fn on_attempt(&self, ctx: &AttemptContext) {
        (**self).on_attempt(ctx);
    }

    fn on_backoff(&self, ctx: &BackoffContext) {
        (**self).on_backoff(ctx);
    }

    fn on_terminal(&self, submission: SubmissionId, termination: Termination) {
        (**self).on_terminal(submission, termination);
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RetryObserver for NoopObserver {}
