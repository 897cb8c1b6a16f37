//! A [`Clock`] with a caller-controlled `now()`, for tests that assert on
//! recency weighting, session expiry, or retry backoff without sleeping.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prioritizer_core::clock::Clock;

/// Returns a fixed instant until advanced with [`FixedClock::advance`] or
/// [`FixedClock::set`].
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
