//! An observer that remembers everything.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::observer::{AttemptContext, BackoffContext, RetryObserver, SubmissionId, Termination};

#[derive(Debug, Default)]
struct Recorded {
    attempts: Vec<AttemptContext>,
    backoffs: Vec<BackoffContext>,
    terminations: Vec<(SubmissionId, Termination)>,
}

/// A [`RetryObserver`] that records every notification in order.
///
/// Share it with the executor through an `Arc` and inspect it afterwards.
/// Under a tokio runtime, [`wait_for_terminations`](Self::wait_for_terminations)
/// lets a test wait for submissions to finish without polling.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    recorded: Mutex<Recorded>,
    changed: Notify,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt started, in order.
    pub fn attempts(&self) -> Vec<AttemptContext> {
        self.recorded.lock().attempts.clone()
    }

    /// Every backoff scheduled, in order.
    pub fn backoffs(&self) -> Vec<BackoffContext> {
        self.recorded.lock().backoffs.clone()
    }

    /// Every terminal outcome, in order.
    pub fn terminations(&self) -> Vec<(SubmissionId, Termination)> {
        self.recorded.lock().terminations.clone()
    }

    /// Terminal outcome of one submission, if it has finished.
    pub fn termination_of(&self, submission: SubmissionId) -> Option<Termination> {
        self.recorded
            .lock()
            .terminations
            .iter()
            .find(|(id, _)| *id == submission)
            .map(|(_, termination)| *termination)
    }

    /// Waits until at least `count` submissions have finished, or `timeout`
    /// passes. Returns the terminations recorded so far either way.
    pub async fn wait_for_terminations(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<(SubmissionId, Termination)> {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if self.recorded.lock().terminations.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
        self.terminations()
    }
}

impl RetryObserver for RecordingObserver {
    fn on_attempt(&self, ctx: &AttemptContext) {
        self.recorded.lock().attempts.push(ctx.clone());
    }

    fn on_backoff(&self, ctx: &BackoffContext) {
        self.recorded.lock().backoffs.push(ctx.clone());
    }

    fn on_terminal(&self, submission: SubmissionId, termination: Termination) {
        self.recorded.lock().terminations.push((submission, termination));
        self.changed.notify_waiters();
    }
}
