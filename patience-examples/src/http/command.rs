use std::fmt;
use std::sync::Arc;

use futures::future::FutureExt;
use parking_lot::Mutex;
use patience::{AsyncError, ErrorType, ExecuteError, PendingResult, ResultType, RetriableCommand};
use tracing::{debug, error, warn};

use super::{HttpRequest, HttpResponse, ResponseCallback, Transport, TransportError, UrlProvider};

/// One HTTP request, retried with failover across base URLs.
pub struct HttpCommand<T: Transport> {
    request: HttpRequest,
    urls: Arc<UrlProvider>,
    callback: Option<Arc<dyn ResponseCallback>>,
    transport: Arc<T>,
    base_url: Mutex<Option<String>>,
}

impl<T: Transport> HttpCommand<T> {
    /// Creates a command. Without a callback any response is a success.
    pub fn new(
        request: HttpRequest,
        urls: Arc<UrlProvider>,
        callback: Option<Arc<dyn ResponseCallback>>,
        transport: Arc<T>,
    ) -> Self {
        Self {
            request,
            urls,
            callback,
            transport,
            base_url: Mutex::new(None),
        }
    }

    /// The request this command sends.
    pub const fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Base URL used by the latest attempt.
    pub fn base_url(&self) -> Option<String> {
        self.base_url.lock().clone()
    }

    fn resolve_url(&self) -> Result<String, ExecuteError> {
        match self.urls.get() {
            Ok(base) => {
                let url = format!("{base}{}", self.request.path);
                *self.base_url.lock() = Some(base);
                Ok(url)
            }
            Err(error) => {
                if matches!(error, ExecuteError::Abort(_)) {
                    if let Some(callback) = &self.callback {
                        callback.on_abort_by_url_provider();
                    }
                }
                Err(error)
            }
        }
    }

    fn mark_base_url_failed(&self) {
        if let Some(base) = self.base_url.lock().as_deref() {
            self.urls.mark_as_failed(base);
        }
    }
}

impl<T: Transport> fmt::Debug for HttpCommand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCommand")
            .field("request", &self.request)
            .field("base_url", &self.base_url())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RetriableCommand for HttpCommand<T> {
    type Output = HttpResponse;
    type Error = TransportError;

    fn execute(&self) -> Result<PendingResult<HttpResponse, TransportError>, ExecuteError> {
        let url = self.resolve_url()?;
        debug!(method = %self.request.method, %url, "sending request");

        match self.transport.send(&url, &self.request) {
            Ok(response) => Ok(response
                .map(|outcome| {
                    outcome.map_err(|error| match error {
                        TransportError::Cancelled => AsyncError::Cancelled,
                        other => AsyncError::Failed(other),
                    })
                })
                .boxed()),
            // Presumably part of a shutdown.
            Err(TransportError::Interrupted) => {
                Err(ExecuteError::abort_with(TransportError::Interrupted))
            }
            // The base URL stays in rotation; only failed requests count against it.
            Err(error) => Err(ExecuteError::backoff_with(error)),
        }
    }

    fn check_result(&self, response: &HttpResponse) -> ResultType {
        debug!(status = response.status, "checking response");
        match &self.callback {
            Some(callback) if !callback.is_valid_response(response) => {
                self.mark_base_url_failed();
                ResultType::FailureWithBackoff
            }
            _ => ResultType::Success,
        }
    }

    fn check_async_error(&self, error: &TransportError) -> ErrorType {
        warn!(%error, base_url = ?self.base_url(), "request failed");
        self.mark_base_url_failed();
        ErrorType::FailAndBackoff
    }

    fn on_success(&self, response: HttpResponse) {
        debug!(status = response.status, "request succeeded");
        if let Some(callback) = &self.callback {
            callback.on_success(response);
        }
    }

    fn on_exceed_max_retries(&self) {
        error!(path = %self.request.path, "giving up on request");
        if let Some(callback) = &self.callback {
            callback.on_exceed_max_retries();
        }
    }
}
