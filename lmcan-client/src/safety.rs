//! Motor safety watchdog
//!
//! The owner of a session must keep feeding the watchdog (every call to
//! [`MotorController::set`](crate::MotorController::set) does so). A periodic
//! [`check_safety`](crate::MotorController::check_safety) finding the watchdog starved stops the
//! motor.
use std::time::Duration;

/// Default time allowed between feeds
pub const DEFAULT_EXPIRATION: Duration = Duration::from_millis(100);

/// Watchdog state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchdogState {
    /// Monitoring feeds
    #[default]
    Armed,
    /// Expired; the motor has been stopped and stays stopped until control is re-enabled
    Tripped,
}

/// Tracks the time since the last feed
#[derive(Debug, Clone, Copy)]
pub struct SafetyWatchdog {
    expiration: Duration,
    last_fed: Duration,
    enabled: bool,
    state: WatchdogState,
}

impl Default for SafetyWatchdog {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl SafetyWatchdog {
    /// Create a disabled watchdog, fed at `now`
    pub fn new(now: Duration) -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            last_fed: now,
            enabled: false,
            state: WatchdogState::Armed,
        }
    }

    /// Record a feed
    ///
    /// A tripped watchdog stays tripped; see [`rearm`](Self::rearm).
    pub fn feed(&mut self, now: Duration) {
        self.last_fed = now;
    }

    /// Return to the armed state after control has been re-enabled
    pub fn rearm(&mut self, now: Duration) {
        self.last_fed = now;
        self.state = WatchdogState::Armed;
    }

    /// Check for expiry
    ///
    /// Returns true exactly once per trip: when the watchdog is enabled, armed, and has not been
    /// fed within the expiration time. The caller must then stop the motor.
    pub fn check(&mut self, now: Duration) -> bool {
        if !self.enabled || self.state == WatchdogState::Tripped {
            return false;
        }
        if now.saturating_sub(self.last_fed) > self.expiration {
            self.state = WatchdogState::Tripped;
            true
        } else {
            false
        }
    }

    /// Returns false if the watchdog is enabled and has expired
    pub fn is_alive(&self, now: Duration) -> bool {
        !self.enabled
            || (self.state == WatchdogState::Armed
                && now.saturating_sub(self.last_fed) <= self.expiration)
    }

    /// Enable or disable checking
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns true if checking is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the time allowed between feeds
    pub fn set_expiration(&mut self, expiration: Duration) {
        self.expiration = expiration;
    }

    /// The time allowed between feeds
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// The current state
    pub fn state(&self) -> WatchdogState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_disabled_never_trips() {
        let mut wd = SafetyWatchdog::new(ms(0));
        assert!(!wd.check(ms(10_000)));
        assert!(wd.is_alive(ms(10_000)));
        assert_eq!(WatchdogState::Armed, wd.state());
    }

    #[test]
    fn test_regular_feeding_stays_armed() {
        let mut wd = SafetyWatchdog::new(ms(0));
        wd.set_enabled(true);
        for t in (0..1000).step_by(50) {
            wd.feed(ms(t));
            assert!(!wd.check(ms(t + 49)));
        }
        assert_eq!(WatchdogState::Armed, wd.state());
    }

    #[test]
    fn test_trips_once() {
        let mut wd = SafetyWatchdog::new(ms(0));
        wd.set_enabled(true);
        assert!(!wd.check(ms(100)));
        assert!(wd.check(ms(101)));
        assert_eq!(WatchdogState::Tripped, wd.state());
        assert!(!wd.check(ms(500)));
        assert!(!wd.is_alive(ms(500)));

        // Feeding alone does not re-arm
        wd.feed(ms(500));
        assert_eq!(WatchdogState::Tripped, wd.state());
        assert!(!wd.check(ms(1000)));

        wd.rearm(ms(1000));
        assert!(wd.is_alive(ms(1050)));
        assert!(wd.check(ms(1101)));
    }
}
