//! Refresh scheduling state machine.
//!
//! `idle -> fetching -> (success -> idle) | (failure -> backoff -> fetching)`.
//! Failures double the retry delay up to a capped maximum; success resets it.
//! The machine owns no timer: the service drives it from a scheduling port
//! and asks `next_delay()` how long to sleep before the next tick.

use std::time::Duration;

/// Tick/backoff parameters. Quote providers tolerate roughly one poll per
/// quarter hour, so both the nominal interval and the backoff cap default to
/// 15 minutes, with a one-minute initial retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub nominal: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self {
            nominal: Duration::from_secs(15 * 60),
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Fetching,
    Backoff,
}

#[derive(Debug, Clone)]
pub struct RefreshDriver {
    schedule: RefreshSchedule,
    state: RefreshState,
    retry_delay: Duration,
    consecutive_failures: u32,
}

impl RefreshDriver {
    pub fn new(schedule: RefreshSchedule) -> Self {
        Self {
            schedule,
            state: RefreshState::Idle,
            retry_delay: schedule.initial_backoff,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// How long to wait before the next tick.
    pub fn next_delay(&self) -> Duration {
        match self.state {
            RefreshState::Backoff => self.retry_delay,
            _ => self.schedule.nominal,
        }
    }

    /// A scheduled tick (or an on-demand trigger) arrived. Returns true when
    /// a fetch should start; false when one is already in flight.
    pub fn on_tick(&mut self) -> bool {
        match self.state {
            RefreshState::Fetching => false,
            _ => {
                self.state = RefreshState::Fetching;
                true
            }
        }
    }

    pub fn on_success(&mut self) {
        self.state = RefreshState::Idle;
        self.retry_delay = self.schedule.initial_backoff;
        self.consecutive_failures = 0;
    }

    /// Timeouts, rate limits, and vendor errors all land here.
    pub fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.state == RefreshState::Backoff || self.consecutive_failures > 1 {
            self.retry_delay = (self.retry_delay * 2).min(self.schedule.max_backoff);
        }
        self.state = RefreshState::Backoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> RefreshSchedule {
        RefreshSchedule {
            nominal: Duration::from_secs(900),
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(900),
        }
    }

    #[test]
    fn success_path_returns_to_idle_with_nominal_delay() {
        let mut driver = RefreshDriver::new(schedule());
        assert!(driver.on_tick());
        assert_eq!(driver.state(), RefreshState::Fetching);
        driver.on_success();
        assert_eq!(driver.state(), RefreshState::Idle);
        assert_eq!(driver.next_delay(), Duration::from_secs(900));
    }

    #[test]
    fn repeated_failures_double_delay_to_cap() {
        let mut driver = RefreshDriver::new(schedule());
        let mut delays = Vec::new();
        for _ in 0..6 {
            driver.on_tick();
            driver.on_failure();
            delays.push(driver.next_delay().as_secs());
        }
        assert_eq!(delays, vec![60, 120, 240, 480, 900, 900]);
        assert_eq!(driver.consecutive_failures(), 6);
    }

    #[test]
    fn success_resets_backoff() {
        let mut driver = RefreshDriver::new(schedule());
        for _ in 0..4 {
            driver.on_tick();
            driver.on_failure();
        }
        driver.on_tick();
        driver.on_success();
        driver.on_tick();
        driver.on_failure();
        assert_eq!(driver.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn tick_while_fetching_is_rejected() {
        let mut driver = RefreshDriver::new(schedule());
        assert!(driver.on_tick());
        assert!(!driver.on_tick());
    }
}
