use chrono::{DateTime, Utc};

/// Time source for expiry checks.
///
/// All expiry comparisons go through an injected clock so that validation is
/// deterministic under test. Production code uses [`SystemClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
