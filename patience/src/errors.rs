//! Error types for the retry engine.
//!
//! The engine itself never returns an error to the caller of
//! [`submit`](crate::RetryingExecutor::submit). The types here are how a
//! command reports the outcome of an attempt, plus the configuration and
//! wiring errors that can occur before anything is submitted.
//!
//! # Error Categories
//!
//! - **ExecuteError**: an attempt failed before a pending result existed
//! - **AsyncError**: the pending result failed or was cancelled
//! - **PolicyError**: a retry policy could not be built
//! - **EngineError**: the engine could not be wired to its runtime

use std::fmt;

use thiserror::Error;

use crate::command::ErrorType;

/// Boxed error used as the optional cause of an [`ExecuteError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Synchronous failure of [`RetriableCommand::execute`](crate::RetriableCommand::execute).
///
/// Each variant maps one-to-one to an [`ErrorType`]:
///
/// - **Abort**: stop permanently, no callback
/// - **FailButResetBackoff**: retry immediately with the interval reset
/// - **FailAndBackoff**: retry after the current backoff interval, or abandon
///   if the patience budget is spent
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The command decided the work is unrecoverable, or is being shut down.
    #[error("attempt aborted")]
    Abort(#[source] Option<BoxError>),

    /// A failure that does not indicate downstream unavailability.
    #[error("attempt failed, backoff reset")]
    FailButResetBackoff,

    /// A failure suggesting degraded or unavailable downstream state.
    #[error("attempt failed, backing off")]
    FailAndBackoff(#[source] Option<BoxError>),
}

impl ExecuteError {
    /// Abort without a cause.
    pub const fn abort() -> Self {
        Self::Abort(None)
    }

    /// Abort, keeping the error that caused it.
    pub fn abort_with(cause: impl Into<BoxError>) -> Self {
        Self::Abort(Some(cause.into()))
    }

    /// Retry immediately with the backoff reset.
    pub const fn reset_backoff() -> Self {
        Self::FailButResetBackoff
    }

    /// Back off without a cause.
    pub const fn backoff() -> Self {
        Self::FailAndBackoff(None)
    }

    /// Back off, keeping the error that caused it.
    pub fn backoff_with(cause: impl Into<BoxError>) -> Self {
        Self::FailAndBackoff(Some(cause.into()))
    }

    /// The classification this failure carries.
    pub const fn class(&self) -> ErrorType {
        match self {
            Self::Abort(_) => ErrorType::Abort,
            Self::FailButResetBackoff => ErrorType::FailButResetBackoff,
            Self::FailAndBackoff(_) => ErrorType::FailAndBackoff,
        }
    }
}

/// Failure of a pending result.
///
/// `Cancelled` is never classified: the engine treats it as an implicit abort
/// and terminates the submission silently. `Failed` carries the command's own
/// error and goes through
/// [`check_async_error`](crate::RetriableCommand::check_async_error).
#[derive(Debug, Error)]
pub enum AsyncError<E> {
    /// The pending result was cancelled or interrupted.
    #[error("pending result cancelled")]
    Cancelled,

    /// The pending result completed with an error.
    #[error("pending result failed: {0}")]
    Failed(E),
}

impl<E> AsyncError<E> {
    /// True for [`AsyncError::Cancelled`].
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<E> From<E> for AsyncError<E> {
    fn from(error: E) -> Self {
        Self::Failed(error)
    }
}

/// Errors raised while building a [`RetryPolicy`](crate::RetryPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A single field failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Configuration name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// The maximum interval is smaller than the initial interval.
    #[error("max interval {max}s is below initial interval {initial}s")]
    MaxBelowInitial {
        /// Initial interval in seconds
        initial: u32,
        /// Maximum interval in seconds
        max: u32,
    },

    /// The configuration document could not be parsed.
    #[error("invalid retry policy configuration: {0}")]
    Parse(String),
}

impl PolicyError {
    pub(crate) fn invalid(field: &'static str, reason: impl fmt::Display) -> Self {
        Self::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while wiring a [`RetryingExecutor`](crate::RetryingExecutor).
#[derive(Debug, Error)]
pub enum EngineError {
    /// No tokio runtime was available to host the worker pool and scheduler.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
