use parking_lot::Mutex;
use std::time::{Duration, SystemTime};

use crate::entry::Timestamp;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time
    fn now(&self) -> Timestamp;
}

/// Wall clock anchored at construction and advanced by Tokio's clock.
///
/// Reading elapsed time through `tokio::time::Instant` keeps expiry checks in
/// step with timers, including when Tokio time is paused in tests.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Timestamp,
    started: tokio::time::Instant,
}

impl SystemClock {
    /// Creates a clock anchored at the current system time
    pub fn new() -> Self {
        Self {
            origin: Timestamp::from(SystemTime::now()),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        self.origin.saturating_add(self.started.elapsed())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `delta`
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now = now.saturating_add(delta);
    }

    /// Sets the clock to `at`
    pub fn set(&self, at: Timestamp) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
