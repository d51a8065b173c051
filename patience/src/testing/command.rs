//! A command that plays back a script.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, FutureExt};
use parking_lot::Mutex;

use crate::command::{ErrorType, PendingResult, ResultType, RetriableCommand};
use crate::errors::{AsyncError, ExecuteError};

type Outcome = Result<ResultType, AsyncError<ErrorType>>;

/// What one call to `execute()` does.
#[derive(Debug)]
pub enum Step {
    /// `execute()` itself fails with this error.
    Fail(ExecuteError),
    /// The pending result resolves at once and classifies as given.
    Resolve(ResultType),
    /// The pending result fails at once and classifies as given.
    Reject(ErrorType),
    /// The pending result is cancelled.
    Cancel,
    /// The pending result never completes.
    Hang,
    /// The pending result resolves after a tokio sleep.
    ResolveAfter(Duration, ResultType),
    /// The pending result fails after a tokio sleep.
    RejectAfter(Duration, ErrorType),
}

impl Step {
    fn into_pending(self) -> Result<PendingResult<ResultType, ErrorType>, ExecuteError> {
        Ok(match self {
            Self::Fail(error) => return Err(error),
            Self::Resolve(result) => future::ready::<Outcome>(Ok(result)).boxed(),
            Self::Reject(error) => future::ready::<Outcome>(Err(AsyncError::Failed(error))).boxed(),
            Self::Cancel => future::ready::<Outcome>(Err(AsyncError::Cancelled)).boxed(),
            Self::Hang => future::pending::<Outcome>().boxed(),
            Self::ResolveAfter(delay, result) => async move {
                tokio::time::sleep(delay).await;
                Outcome::Ok(result)
            }
            .boxed(),
            Self::RejectAfter(delay, error) => async move {
                tokio::time::sleep(delay).await;
                Outcome::Err(AsyncError::Failed(error))
            }
            .boxed(),
        })
    }
}

enum Script {
    Steps(Mutex<VecDeque<Step>>),
    Repeating(Box<dyn Fn() -> Step + Send + Sync>),
}

#[derive(Default)]
struct Counters {
    executions: AtomicUsize,
    successes: AtomicUsize,
    exceeded: AtomicUsize,
}

/// A [`RetriableCommand`] whose attempts follow a script.
///
/// Results and async errors are their own classification, so
/// `Step::Resolve(ResultType::FailureWithBackoff)` classifies as
/// `FailureWithBackoff`. Clones share the script and the counters, so a test
/// can keep a clone after submitting.
///
/// A finite script that runs out aborts every further attempt.
#[derive(Clone)]
pub struct ScriptedCommand {
    script: Arc<Script>,
    counters: Arc<Counters>,
}

impl ScriptedCommand {
    /// Plays back `steps` in order, one per attempt.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self::from_script(Script::Steps(Mutex::new(steps.into_iter().collect())))
    }

    /// Makes a fresh step for every attempt.
    pub fn repeating(step: impl Fn() -> Step + Send + Sync + 'static) -> Self {
        Self::from_script(Script::Repeating(Box::new(step)))
    }

    fn from_script(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Calls to `execute()` so far.
    pub fn executions(&self) -> usize {
        self.counters.executions.load(Ordering::SeqCst)
    }

    /// Calls to `on_success` so far.
    pub fn successes(&self) -> usize {
        self.counters.successes.load(Ordering::SeqCst)
    }

    /// Calls to `on_exceed_max_retries` so far.
    pub fn exceeded(&self) -> usize {
        self.counters.exceeded.load(Ordering::SeqCst)
    }

    /// Terminal callbacks of either kind so far.
    pub fn callbacks(&self) -> usize {
        self.successes() + self.exceeded()
    }

    fn next_step(&self) -> Step {
        match &*self.script {
            Script::Steps(steps) => steps
                .lock()
                .pop_front()
                .unwrap_or(Step::Fail(ExecuteError::abort())),
            Script::Repeating(step) => step(),
        }
    }
}

impl fmt::Debug for ScriptedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedCommand")
            .field("executions", &self.executions())
            .field("successes", &self.successes())
            .field("exceeded", &self.exceeded())
            .finish_non_exhaustive()
    }
}

impl RetriableCommand for ScriptedCommand {
    type Output = ResultType;
    type Error = ErrorType;

    fn execute(&self) -> Result<PendingResult<ResultType, ErrorType>, ExecuteError> {
        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        self.next_step().into_pending()
    }

    fn check_result(&self, result: &ResultType) -> ResultType {
        *result
    }

    fn check_async_error(&self, error: &ErrorType) -> ErrorType {
        *error
    }

    fn on_success(&self, _result: ResultType) {
        self.counters.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exceed_max_retries(&self) {
        self.counters.exceeded.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_script_aborts() {
        let command = ScriptedCommand::new([Step::Resolve(ResultType::Success)]);

        assert!(command.execute().is_ok());
        assert!(matches!(command.execute(), Err(ExecuteError::Abort(None))));
        assert_eq!(command.executions(), 2);
    }

    #[test]
    fn clones_share_counters() {
        let command = ScriptedCommand::repeating(|| Step::Resolve(ResultType::Success));
        let clone = command.clone();

        clone.on_success(ResultType::Success);
        clone.on_exceed_max_retries();

        assert_eq!(command.successes(), 1);
        assert_eq!(command.exceeded(), 1);
        assert_eq!(command.callbacks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_steps_complete_after_their_delay() {
        let command = ScriptedCommand::new([Step::RejectAfter(
            Duration::from_secs(3),
            ErrorType::FailAndBackoff,
        )]);
        let start = tokio::time::Instant::now();

        let outcome = command.execute().expect("scripted step starts").await;

        assert!(matches!(outcome, Err(AsyncError::Failed(ErrorType::FailAndBackoff))));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
