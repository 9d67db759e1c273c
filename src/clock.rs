//! Time injection. Refresh scheduling, quote staleness, and snapshot stamps
//! all read time through this seam so tests never have to sleep.

use chrono::{DateTime, Utc};

/// Source of the current instant. Production wiring passes `SystemClock`;
/// tests pin or step time instead.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock frozen at one instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}

/// Test clock that only moves when told to. Lets staleness and backoff
/// scenarios jump hours forward between refreshes.
#[derive(Debug)]
pub struct SteppingClock {
    current: std::sync::Mutex<DateTime<Utc>>,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut current = self.current.lock().expect("clock lock poisoned");
        *current = *current + delta;
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().expect("clock lock poisoned")
    }
}
