use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use patience::{Clock, ExecuteError, MonotonicClock};
use tracing::{debug, warn};

/// How long a base URL stays out of rotation after a failure.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Tracks which of several equivalent base URLs are currently healthy.
///
/// Shared by every command talking to the same service, so a failure seen by
/// one submission steers the others away from that URL too.
#[derive(Debug)]
pub struct UrlProvider {
    urls: Vec<String>,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    failed_at: Mutex<HashMap<String, u64>>,
    tracks_failures: bool,
}

impl UrlProvider {
    /// A provider rotating over `urls` in preference order.
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with_clock(urls, DEFAULT_COOLDOWN, Arc::new(MonotonicClock::new()))
    }

    /// A provider with an explicit cooldown and clock.
    pub fn with_clock(
        urls: impl IntoIterator<Item = impl Into<String>>,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            cooldown,
            clock,
            failed_at: Mutex::new(HashMap::new()),
            tracks_failures: true,
        }
    }

    /// A provider for requests whose path is already absolute: a single empty
    /// base that is never taken out of rotation.
    pub fn direct() -> Self {
        Self {
            tracks_failures: false,
            ..Self::new([String::new()])
        }
    }

    /// The most preferred healthy base URL.
    ///
    /// # Errors
    ///
    /// [`ExecuteError::Abort`] when there are no URLs at all, and
    /// [`ExecuteError::FailAndBackoff`] when every URL is cooling down.
    pub fn get(&self) -> Result<String, ExecuteError> {
        if self.urls.is_empty() {
            warn!("url provider has no base urls");
            return Err(ExecuteError::abort());
        }

        let now = self.clock.now_millis();
        let failed_at = self.failed_at.lock();
        self.urls
            .iter()
            .find(|url| {
                failed_at.get(*url).map_or(true, |&at| {
                    Duration::from_millis(now.saturating_sub(at)) >= self.cooldown
                })
            })
            .cloned()
            .ok_or_else(|| {
                debug!(urls = self.urls.len(), "every base url is cooling down");
                ExecuteError::backoff()
            })
    }

    /// Takes `url` out of rotation for the cooldown.
    pub fn mark_as_failed(&self, url: &str) {
        if !self.tracks_failures || !self.urls.iter().any(|known| known == url) {
            return;
        }
        debug!(url, cooldown_secs = self.cooldown.as_secs(), "base url marked as failed");
        self.failed_at
            .lock()
            .insert(url.to_owned(), self.clock.now_millis());
    }

    /// Number of configured base URLs.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// True when no base URLs are configured.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
