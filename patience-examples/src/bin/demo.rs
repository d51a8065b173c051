//! Runs a flaky service and a flaky job through the retry engine with logging
//! on. Set `RUST_LOG` to change the verbosity, e.g. `RUST_LOG=patience=trace`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::FutureExt;
use patience::{MonotonicClock, RetryPolicy, RetryingExecutor};
use patience_examples::http::{
    HttpRequest, HttpResponse, ResponseCallback, ResponseFuture, RetryingHttpClient, Transport,
    TransportError, UrlProvider,
};
use patience_examples::queue::{JobError, JobQueue, QueuedJob, RecordStore};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Drops every request to the primary host; the replica answers 503 a few
/// times before recovering.
#[derive(Debug, Default)]
struct FlakyTransport {
    calls: AtomicUsize,
}

impl Transport for FlakyTransport {
    fn send(&self, url: &str, _request: &HttpRequest) -> Result<ResponseFuture, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let primary = url.starts_with("http://primary");
        Ok(async move {
            if primary {
                return Err(TransportError::Io("connection reset by peer".into()));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            let status = if call < 3 { 503 } else { 200 };
            Ok(HttpResponse {
                status,
                body: format!("call {call}"),
            })
        }
        .boxed())
    }
}

struct Report {
    name: &'static str,
    done: mpsc::UnboundedSender<String>,
}

impl ResponseCallback for Report {
    fn on_success(&self, response: HttpResponse) {
        let _ = self
            .done
            .send(format!("{}: {} ({})", self.name, response.status, response.body));
    }

    fn on_exceed_max_retries(&self) {
        let _ = self.done.send(format!("{}: gave up", self.name));
    }
}

struct SendReceipt {
    failures_left: AtomicUsize,
    done: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl QueuedJob for SendReceipt {
    fn name(&self) -> &str {
        "send-receipt"
    }

    async fn run(&self, payload: serde_json::Value) -> Result<(), JobError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(JobError::Failed("mail relay busy".into()));
        }
        let _ = self.done.send(format!("send-receipt: delivered {payload}"));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,patience=debug,patience_examples=debug")),
        )
        .init();

    let executor = RetryingExecutor::try_tokio().context("demo needs a tokio runtime")?;
    let policy = RetryPolicy::builder()
        .initial_interval(1)
        .multiplier(2.0)
        .max_interval(4)
        .finally_fail_after(30)
        .build()
        .context("demo retry policy")?;
    let (done, mut finished) = mpsc::unbounded_channel();

    let client = RetryingHttpClient::new(executor.clone(), Arc::new(FlakyTransport::default()));
    let urls = Arc::new(UrlProvider::with_clock(
        ["http://primary", "http://replica"],
        Duration::from_secs(2),
        Arc::new(MonotonicClock::new()),
    ));
    client.send_http_via(
        HttpRequest::get("/health"),
        urls,
        Some(Arc::new(Report {
            name: "health-check",
            done: done.clone(),
        })),
        policy,
    );

    let store = Arc::new(RecordStore::new());
    let queue = JobQueue::new(Arc::clone(&store), executor.clone());
    queue.enqueue(
        Arc::new(SendReceipt {
            failures_left: AtomicUsize::new(2),
            done,
        }),
        json!({ "order": 1042 }),
        policy,
    );

    for _ in 0..2 {
        let line = tokio::time::timeout(Duration::from_secs(60), finished.recv())
            .await
            .context("timed out waiting for submissions")?
            .context("callbacks dropped")?;
        info!("{line}");
    }
    info!(records_left = store.len(), "all submissions finished");

    executor.shutdown();
    Ok(())
}
