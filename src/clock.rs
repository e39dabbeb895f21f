//! Time sources.
//!
//! Every ledger and counter reads "now" through a [`Clock`] so that window
//! boundaries, pack expiry and store TTLs can be driven deterministically.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

/// A source of the current UTC time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// The current instant as unix seconds.
    fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }

    /// The current instant as unix milliseconds.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Create a clock frozen at the given unix millisecond timestamp.
    ///
    /// Out-of-range values fall back to the unix epoch.
    pub fn from_millis(ms: i64) -> Self {
        let now = Utc.timestamp_millis_opt(ms).single().unwrap_or_default();
        Self::new(now)
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
