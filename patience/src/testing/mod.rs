//! Testing utilities for code built on the retry engine.
//!
//! Enabled with the `testing` feature. Everything here is deterministic:
//! time only moves when a test moves it, and queued work only runs when a
//! test asks for it.
//!
//! # Overview
//!
//! - [`harness`]: manual clock, worker pool and scheduler, and a
//!   [`DeterministicHarness`] that ties them to an executor
//! - [`command`]: [`ScriptedCommand`], a command that plays back scripted steps
//! - [`observer`]: [`RecordingObserver`], which keeps everything it is told
//! - [`generators`]: `proptest` strategies for retry policies
//!
//! # Example Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use patience::testing::prelude::*;
//! use patience::{ExecuteError, RetryPolicy};
//!
//! let harness = DeterministicHarness::new();
//! let command = ScriptedCommand::repeating(|| Step::Fail(ExecuteError::backoff()));
//!
//! harness.submit(command.clone(), RetryPolicy::default());
//!
//! assert_eq!(harness.fire_next(), Some(Duration::from_secs(5)));
//! assert_eq!(harness.fire_next(), Some(Duration::from_secs(10)));
//! assert_eq!(command.executions(), 3);
//! ```

pub mod command;
pub mod generators;
pub mod harness;
pub mod observer;

pub use command::{ScriptedCommand, Step};
pub use harness::{DeterministicHarness, ManualClock, ManualScheduler, ManualWorkerPool};
pub use observer::RecordingObserver;

/// Prelude module for convenient imports.
///
/// Import everything needed for testing with:
/// ```rust,ignore
/// use patience::testing::prelude::*;
/// ```
pub mod prelude {
    pub use super::command::*;
    pub use super::generators::*;
    pub use super::harness::*;
    pub use super::observer::*;
}
