use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use patience::{Clock, ErrorType, ExecuteError, PendingResult, ResultType, RetriableCommand};
use thiserror::Error;
use tracing::debug;

use super::{
    HttpCommand, HttpMethod, HttpRequest, HttpResponse, ResponseCallback, Transport,
    TransportError, UrlProvider,
};

/// Failures arriving at least this long after the request was sent are
/// treated as the server or network dropping an idle poll.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Error building a [`LongPollCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("long polls must be GET requests, got {0}")]
pub struct NotAGetRequest(pub HttpMethod);

/// A GET that the server holds open until it has something to say.
///
/// Behaves like [`HttpCommand`] except that an error arriving after
/// [`IDLE_TIMEOUT`] retries at once with the backoff reset: a long poll that
/// times out has not failed.
pub struct LongPollCommand<T: Transport> {
    inner: HttpCommand<T>,
    clock: Arc<dyn Clock>,
    sent_at: AtomicU64,
}

impl<T: Transport> LongPollCommand<T> {
    /// Creates a long poll.
    ///
    /// # Errors
    ///
    /// Returns [`NotAGetRequest`] for anything but a GET.
    pub fn new(
        request: HttpRequest,
        urls: Arc<UrlProvider>,
        callback: Option<Arc<dyn ResponseCallback>>,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NotAGetRequest> {
        if request.method != HttpMethod::Get {
            return Err(NotAGetRequest(request.method));
        }
        Ok(Self {
            inner: HttpCommand::new(request, urls, callback, transport),
            sent_at: AtomicU64::new(clock.now_millis()),
            clock,
        })
    }
}

impl<T: Transport> fmt::Debug for LongPollCommand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LongPollCommand")
            .field("inner", &self.inner)
            .field("sent_at", &self.sent_at.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RetriableCommand for LongPollCommand<T> {
    type Output = HttpResponse;
    type Error = TransportError;

    fn execute(&self) -> Result<PendingResult<HttpResponse, TransportError>, ExecuteError> {
        self.sent_at.store(self.clock.now_millis(), Ordering::Release);
        self.inner.execute()
    }

    fn check_result(&self, response: &HttpResponse) -> ResultType {
        self.inner.check_result(response)
    }

    fn check_async_error(&self, error: &TransportError) -> ErrorType {
        let waited = self.clock.elapsed_since(self.sent_at.load(Ordering::Acquire));
        if waited < IDLE_TIMEOUT {
            return self.inner.check_async_error(error);
        }
        debug!(%error, waited_secs = waited.as_secs(), "long poll went idle, polling again");
        ErrorType::FailButResetBackoff
    }

    fn on_success(&self, response: HttpResponse) {
        self.inner.on_success(response);
    }

    fn on_exceed_max_retries(&self) {
        self.inner.on_exceed_max_retries();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::command::tests::CannedTransport;
    use patience::testing::ManualClock;

    fn long_poll(clock: &Arc<ManualClock>) -> LongPollCommand<CannedTransport> {
        LongPollCommand::new(
            HttpRequest::get("/events"),
            Arc::new(UrlProvider::new(["http://a", "http://b"])),
            None,
            CannedTransport::new([]),
            Arc::clone(clock) as Arc<dyn Clock>,
        )
        .expect("GET request")
    }

    #[test]
    fn rejects_post_requests() {
        let result = LongPollCommand::new(
            HttpRequest::post("/events", "{}"),
            Arc::new(UrlProvider::direct()),
            None,
            CannedTransport::new([]),
            Arc::new(ManualClock::new()) as Arc<dyn Clock>,
        );
        assert!(matches!(result, Err(NotAGetRequest(HttpMethod::Post))));
    }

    #[test]
    fn quick_failure_backs_off() {
        let clock = Arc::new(ManualClock::new());
        let command = long_poll(&clock);
        let _ = command.execute();

        clock.advance(Duration::from_secs(14));

        assert_eq!(
            command.check_async_error(&TransportError::Timeout),
            ErrorType::FailAndBackoff
        );
    }

    #[test]
    fn failure_after_idle_timeout_resets_backoff() {
        let clock = Arc::new(ManualClock::new());
        let command = long_poll(&clock);
        let _ = command.execute();

        clock.advance(IDLE_TIMEOUT);

        assert_eq!(
            command.check_async_error(&TransportError::Timeout),
            ErrorType::FailButResetBackoff
        );
    }

    #[test]
    fn idle_time_is_measured_from_the_latest_send() {
        let clock = Arc::new(ManualClock::new());
        let command = long_poll(&clock);

        clock.advance(Duration::from_secs(60));
        let _ = command.execute();
        clock.advance(Duration::from_secs(5));

        assert_eq!(
            command.check_async_error(&TransportError::Io("reset".into())),
            ErrorType::FailAndBackoff
        );
    }
}
