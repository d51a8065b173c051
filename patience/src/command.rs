//! The contract a unit of work implements to be retried by the engine.
//!
//! A [`RetriableCommand`] owns everything about *how* one attempt runs and
//! how its outcome is judged. The engine owns *when* the next attempt runs.
//! Shared state a command needs across submissions (for example a tracker of
//! unhealthy base URLs) belongs in the command, never in the engine.
//!
//! # Example
//!
//! ```rust
//! use patience::{ErrorType, ExecuteError, PendingResult, ResultType, RetriableCommand};
//!
//! struct Ping {
//!     healthy: bool,
//! }
//!
//! impl RetriableCommand for Ping {
//!     type Output = u16;
//!     type Error = std::io::Error;
//!
//!     fn execute(&self) -> Result<PendingResult<u16, std::io::Error>, ExecuteError> {
//!         let status = if self.healthy { 200 } else { 503 };
//!         Ok(Box::pin(async move { Ok(status) }))
//!     }
//!
//!     fn check_result(&self, status: &u16) -> ResultType {
//!         if *status == 200 {
//!             ResultType::Success
//!         } else {
//!             ResultType::FailureWithBackoff
//!         }
//!     }
//!
//!     fn check_async_error(&self, _error: &std::io::Error) -> ErrorType {
//!         ErrorType::FailAndBackoff
//!     }
//!
//!     fn on_success(&self, status: u16) {
//!         println!("ping answered {status}");
//!     }
//!
//!     fn on_exceed_max_retries(&self) {
//!         eprintln!("ping never answered");
//!     }
//! }
//! ```

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::errors::{AsyncError, ExecuteError};

/// Handle to the eventual result of one attempt.
///
/// Returned by [`RetriableCommand::execute`] without blocking. The engine
/// awaits it on the worker pool.
pub type PendingResult<T, E> = BoxFuture<'static, Result<T, AsyncError<E>>>;

/// Classification of a successfully obtained result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultType {
    /// The work is done; `on_success` receives the result.
    Success,
    /// Retry immediately with the backoff reset to its initial interval.
    FailureWithoutBackoff,
    /// Retry after the current backoff interval, or abandon.
    FailureWithBackoff,
}

/// Classification of an error, whether raised synchronously by `execute` or
/// while awaiting the pending result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Stop permanently and silently.
    Abort,
    /// Retry immediately with the backoff reset to its initial interval.
    FailButResetBackoff,
    /// Retry after the current backoff interval, or abandon.
    FailAndBackoff,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::FailureWithoutBackoff => write!(f, "failure-without-backoff"),
            Self::FailureWithBackoff => write!(f, "failure-with-backoff"),
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::FailButResetBackoff => write!(f, "fail-but-reset-backoff"),
            Self::FailAndBackoff => write!(f, "fail-and-backoff"),
        }
    }
}

/// A unit of asynchronous, fallible work the engine can retry.
///
/// Implementers define:
/// - How one attempt begins (`execute()`), without blocking on I/O
/// - How a completed result is judged (`check_result()`)
/// - How an asynchronous error is judged (`check_async_error()`)
/// - The two terminal callbacks
///
/// The engine guarantees that for one submission `on_success` and
/// `on_exceed_max_retries` are together called at most once, and that no two
/// attempts of the same submission overlap.
pub trait RetriableCommand: Send + Sync + 'static {
    /// Value produced by a completed attempt.
    type Output: Send + fmt::Debug + 'static;

    /// Error raised while awaiting a pending result.
    type Error: Send + fmt::Debug + 'static;

    /// Begins one attempt.
    ///
    /// Either returns a pending result immediately or fails synchronously
    /// with an [`ExecuteError`] that already carries its classification.
    fn execute(&self) -> Result<PendingResult<Self::Output, Self::Error>, ExecuteError>;

    /// Classifies a result that was obtained without error.
    fn check_result(&self, result: &Self::Output) -> ResultType;

    /// Classifies an error raised while awaiting the pending result.
    fn check_async_error(&self, error: &Self::Error) -> ErrorType;

    /// Called once when an attempt's result classifies as
    /// [`ResultType::Success`].
    fn on_success(&self, result: Self::Output);

    /// Called once when the patience budget is exhausted, or on the first
    /// failure with backoff when the submission carries no policy.
    fn on_exceed_max_retries(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifications_display_in_kebab_case() {
        assert_eq!(ResultType::FailureWithoutBackoff.to_string(), "failure-without-backoff");
        assert_eq!(ErrorType::FailButResetBackoff.to_string(), "fail-but-reset-backoff");
        assert_eq!(ErrorType::Abort.to_string(), "abort");
    }
}
