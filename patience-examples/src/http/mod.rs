//! HTTP requests retried through the engine.
//!
//! The engine never sees HTTP. These commands decide what a response or a
//! transport failure means for the retry:
//!
//! - [`HttpCommand`] backs off on transport errors and on responses the
//!   caller's [`ResponseCallback`] rejects. A request that fails or is
//!   rejected marks its base URL as failed so the next attempt can fail
//!   over; a request that could not be started leaves the URL in rotation.
//! - [`LongPollCommand`] treats a failure that arrives after a long wait as
//!   an idle timeout and retries at once with the backoff reset.
//!
//! The wire is behind the [`Transport`] trait so any client can be plugged in.

mod client;
mod command;
mod long_poll;
mod url_provider;

pub use client::RetryingHttpClient;
pub use command::HttpCommand;
pub use long_poll::{LongPollCommand, NotAGetRequest, IDLE_TIMEOUT};
pub use url_provider::{UrlProvider, DEFAULT_COOLDOWN};

use std::collections::BTreeMap;
use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST with a body
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A request relative to whichever base URL the attempt is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Method
    pub method: HttpMethod,
    /// Path appended to the base URL
    pub path: String,
    /// Body, sent only with POST
    pub body: Option<String>,
    /// Headers sent with every attempt
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    /// A GET request for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    /// A POST request for `path` carrying `body`.
    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body.into()),
            headers: BTreeMap::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A response as seen by the retry logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Body
    pub body: String,
}

impl HttpResponse {
    /// True for 2xx statuses.
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Errors a [`Transport`] reports, either when starting a request or while
/// waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request was interrupted, usually because the host is shutting down
    #[error("request interrupted")]
    Interrupted,

    /// The request was cancelled before a response arrived
    #[error("request cancelled")]
    Cancelled,

    /// Connection or protocol failure
    #[error("i/o error: {0}")]
    Io(String),

    /// No response within the transport's own deadline
    #[error("request timed out")]
    Timeout,
}

/// Response of a request in flight.
pub type ResponseFuture = BoxFuture<'static, Result<HttpResponse, TransportError>>;

/// Sends requests over the wire.
///
/// `send` only starts the request; failing to start it is reported
/// synchronously so the command can tell an interrupted start from one worth
/// retrying.
pub trait Transport: Send + Sync + 'static {
    /// Starts `request` against the absolute `url`.
    fn send(&self, url: &str, request: &HttpRequest) -> Result<ResponseFuture, TransportError>;
}

/// Caller hooks for one HTTP submission.
///
/// Without a callback, any response counts as success.
pub trait ResponseCallback: Send + Sync + 'static {
    /// Whether `response` is acceptable. Rejected responses are retried with
    /// backoff.
    fn is_valid_response(&self, response: &HttpResponse) -> bool {
        response.is_success()
    }

    /// Called once with the accepted response.
    fn on_success(&self, response: HttpResponse);

    /// Called once when the engine gives up.
    fn on_exceed_max_retries(&self);

    /// Called when the URL provider had no base URL to offer at all.
    fn on_abort_by_url_provider(&self) {}
}
