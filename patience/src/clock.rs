//! Time sources used to measure a submission's patience budget.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Source of the current time in milliseconds.
///
/// Only differences between readings are meaningful. Readings from one clock
/// should not go backwards; the engine saturates at zero if they do.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Milliseconds since this clock's origin.
    fn now_millis(&self) -> u64;

    /// Time elapsed since an earlier reading of this clock.
    fn elapsed_since(&self, earlier_millis: u64) -> Duration {
        Duration::from_millis(self.now_millis().saturating_sub(earlier_millis))
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// Monotonic clock backed by tokio's [`Instant`].
///
/// This is the engine's default. Under a paused tokio test runtime it follows
/// virtual time, so backoff and patience interact the way they do in
/// production.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Wall clock reporting milliseconds since the UNIX epoch.
///
/// Subject to wall-clock adjustments; prefer [`MonotonicClock`] unless the
/// readings need to line up with external timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}
