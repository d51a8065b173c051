use std::sync::Arc;

use patience::{Clock, MonotonicClock, RetryPolicy, RetryingExecutor};
use tracing::debug;

use super::{
    HttpCommand, HttpRequest, LongPollCommand, NotAGetRequest, ResponseCallback, Transport,
    UrlProvider,
};

/// Fire-and-forget HTTP on top of a [`RetryingExecutor`].
///
/// Every send returns immediately; the outcome arrives through the
/// [`ResponseCallback`].
#[derive(Debug)]
pub struct RetryingHttpClient<T: Transport> {
    executor: RetryingExecutor,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    direct: Arc<UrlProvider>,
}

impl<T: Transport> RetryingHttpClient<T> {
    /// Creates a client sending through `transport`.
    pub fn new(executor: RetryingExecutor, transport: Arc<T>) -> Self {
        Self::with_clock(executor, transport, Arc::new(MonotonicClock::new()))
    }

    /// Creates a client whose long polls measure idle time on `clock`.
    pub fn with_clock(executor: RetryingExecutor, transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        Self {
            executor,
            transport,
            clock,
            direct: Arc::new(UrlProvider::direct()),
        }
    }

    /// Sends a request whose path is already an absolute URL.
    pub fn send_http(
        &self,
        request: HttpRequest,
        callback: Option<Arc<dyn ResponseCallback>>,
        policy: impl Into<Option<RetryPolicy>>,
    ) {
        self.send_http_via(request, Arc::clone(&self.direct), callback, policy);
    }

    /// Sends a request to whichever of `urls` is healthy.
    pub fn send_http_via(
        &self,
        request: HttpRequest,
        urls: Arc<UrlProvider>,
        callback: Option<Arc<dyn ResponseCallback>>,
        policy: impl Into<Option<RetryPolicy>>,
    ) {
        debug!(method = %request.method, path = %request.path, "sending http");
        let command = HttpCommand::new(request, urls, callback, Arc::clone(&self.transport));
        self.executor.submit(command, policy);
    }

    /// Starts a long poll against whichever of `urls` is healthy.
    ///
    /// # Errors
    ///
    /// Returns [`NotAGetRequest`] unless `request` is a GET.
    pub fn send_long_poll(
        &self,
        request: HttpRequest,
        urls: Arc<UrlProvider>,
        callback: Option<Arc<dyn ResponseCallback>>,
        policy: impl Into<Option<RetryPolicy>>,
    ) -> Result<(), NotAGetRequest> {
        debug!(path = %request.path, "starting long poll");
        let command = LongPollCommand::new(
            request,
            urls,
            callback,
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
        )?;
        self.executor.submit(command, policy);
        Ok(())
    }
}
