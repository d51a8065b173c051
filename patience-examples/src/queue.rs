//! Durable-style jobs retried through the engine.
//!
//! A job is recorded in a [`RecordStore`] before it runs and deleted once the
//! engine is done with it, whether it succeeded or ran out of patience. A
//! record that is still present therefore marks a job that has not finished.
//! The store here is in memory; a real deployment would back it with a
//! database.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use parking_lot::RwLock;
use patience::{
    AsyncError, ErrorType, ExecuteError, PendingResult, ResultType, RetriableCommand, RetryPolicy,
    RetryingExecutor,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Identifier of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// A fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job waiting to run or being retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRecord {
    /// Record id
    pub id: RecordId,
    /// Name of the job that processes the payload
    pub job: String,
    /// Job input
    pub payload: serde_json::Value,
    /// When the record was inserted
    pub enqueued_at: DateTime<Utc>,
}

/// In-memory store of queued records.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: RwLock<HashMap<RecordId, QueuedRecord>>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a job and returns its id.
    pub fn insert(&self, job: impl Into<String>, payload: serde_json::Value) -> RecordId {
        let record = QueuedRecord {
            id: RecordId::new(),
            job: job.into(),
            payload,
            enqueued_at: Utc::now(),
        };
        let id = record.id;
        self.records.write().insert(id, record);
        id
    }

    /// Looks up a record.
    pub fn get(&self, id: RecordId) -> Option<QueuedRecord> {
        self.records.read().get(&id).cloned()
    }

    /// Removes a record. Returns false, and logs, if it was already gone.
    pub fn delete(&self, id: RecordId) -> bool {
        let removed = self.records.write().remove(&id).is_some();
        if !removed {
            error!(record = %id, "could not find queued record for deletion");
        }
        removed
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when no records are present.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Why a job attempt failed.
#[derive(Debug, Error)]
pub enum JobError {
    /// The payload could not be decoded
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The job ran and failed
    #[error("job failed: {0}")]
    Failed(String),
}

/// Application work run from the queue.
#[async_trait]
pub trait QueuedJob: Send + Sync + 'static {
    /// Name stored with each record.
    fn name(&self) -> &str;

    /// Runs the job once.
    async fn run(&self, payload: serde_json::Value) -> Result<(), JobError>;
}

/// Runs one queued record; every failure backs off.
pub struct QueuedJobCommand {
    record: RecordId,
    store: Arc<RecordStore>,
    job: Arc<dyn QueuedJob>,
}

impl QueuedJobCommand {
    /// Creates a command for a record already in `store`.
    pub fn new(record: RecordId, store: Arc<RecordStore>, job: Arc<dyn QueuedJob>) -> Self {
        Self { record, store, job }
    }

    /// The record this command runs.
    pub const fn record(&self) -> RecordId {
        self.record
    }
}

impl fmt::Debug for QueuedJobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJobCommand")
            .field("record", &self.record)
            .field("job", &self.job.name())
            .finish_non_exhaustive()
    }
}

impl RetriableCommand for QueuedJobCommand {
    type Output = ();
    type Error = JobError;

    fn execute(&self) -> Result<PendingResult<(), JobError>, ExecuteError> {
        let Some(record) = self.store.get(self.record) else {
            warn!(record = %self.record, "queued record disappeared, not running job");
            return Err(ExecuteError::abort());
        };
        debug!(record = %self.record, job = %record.job, "running queued job");
        let job = Arc::clone(&self.job);
        Ok(async move { job.run(record.payload).await.map_err(AsyncError::Failed) }.boxed())
    }

    fn check_result(&self, _result: &()) -> ResultType {
        ResultType::Success
    }

    fn check_async_error(&self, error: &JobError) -> ErrorType {
        warn!(record = %self.record, %error, "queued job failed");
        ErrorType::FailAndBackoff
    }

    fn on_success(&self, _result: ()) {
        self.store.delete(self.record);
    }

    fn on_exceed_max_retries(&self) {
        error!(record = %self.record, job = self.job.name(), "queued job gave up");
        self.store.delete(self.record);
    }
}

/// Records jobs and hands them to the engine.
#[derive(Debug, Clone)]
pub struct JobQueue {
    store: Arc<RecordStore>,
    executor: RetryingExecutor,
}

impl JobQueue {
    /// Creates a queue over `store`.
    pub const fn new(store: Arc<RecordStore>, executor: RetryingExecutor) -> Self {
        Self { store, executor }
    }

    /// Records the job, then submits it for execution.
    pub fn enqueue(
        &self,
        job: Arc<dyn QueuedJob>,
        payload: serde_json::Value,
        policy: RetryPolicy,
    ) -> RecordId {
        let id = self.store.insert(job.name(), payload);
        debug!(record = %id, job = job.name(), "job enqueued");
        self.executor
            .submit(QueuedJobCommand::new(id, Arc::clone(&self.store), job), policy);
        id
    }

    /// The store backing this queue.
    pub const fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }
}
