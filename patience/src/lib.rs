//! `Patience` - retry engine for asynchronous, fallible commands
//!
//! Callers hand the engine a [`RetriableCommand`] and an optional
//! [`RetryPolicy`]. The engine runs the command on a worker pool, classifies
//! what happens, and either finishes, retries at once with the backoff reset,
//! or waits an exponentially growing interval and tries again. A submission
//! whose patience budget has run out is abandoned instead of retried.
//!
//! Submitting returns nothing. Outcomes reach the caller through the command's
//! own `on_success` and `on_exceed_max_retries` callbacks, at most one of
//! which is ever called per submission, and through an optional
//! [`RetryObserver`].
//!
//! ```rust,ignore
//! use patience::{RetryPolicy, RetryingExecutor};
//!
//! let executor = RetryingExecutor::tokio();
//! executor.submit(PublishInvoice::new(invoice), RetryPolicy::default());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod attempt;
pub mod clock;
pub mod command;
pub mod errors;
pub mod executor;
pub mod observer;
pub mod policy;
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use command::{ErrorType, PendingResult, ResultType, RetriableCommand};
pub use errors::{AsyncError, BoxError, EngineError, ExecuteError, PolicyError};
pub use executor::{RetryingExecutor, RetryingExecutorBuilder};
pub use observer::{
    AttemptContext, BackoffContext, NoopObserver, RetryObserver, SubmissionId, Termination,
};
pub use policy::{
    FinallyFailAfterSeconds, InitialIntervalSeconds, IntervalMultiplier, MaxIntervalSeconds,
    RetryPolicy, RetryPolicyBuilder, RetryPolicyConfig,
};
pub use runtime::{DelayScheduler, Job, Task, TokioDelayScheduler, TokioWorkerPool, WorkerPool};
