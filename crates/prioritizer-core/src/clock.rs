//! Injectable time source (§6 collaborators: "Clock: injectable to make
//! recency weighting and retry backoff testable").

use chrono::{DateTime, Utc};

/// A source of "now", injected rather than read from `Utc::now()` directly
/// so recency weighting (§4.5) and retry backoff (§4.3) are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
