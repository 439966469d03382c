//! Wall-clock abstraction (Unix seconds).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in Unix seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch.
    fn now_sec(&self) -> i64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_sec(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `now_sec`.
    #[must_use]
    pub fn new(now_sec: i64) -> Self {
        Self {
            now: AtomicI64::new(now_sec),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_sec: i64) {
        self.now.store(now_sec, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_sec(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
