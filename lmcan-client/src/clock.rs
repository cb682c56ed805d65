//! Time source used by sessions for polling delays and the safety watchdog
use std::{
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// A monotonic time source with a blocking sleep
pub trait Clock: Debug + Send + Sync {
    /// Time elapsed since an arbitrary fixed epoch
    fn now(&self) -> Duration;
    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// The wall clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Create a clock whose epoch is now
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock which only moves when told to
///
/// `sleep` advances the clock by the requested duration and returns immediately, so retry loops
/// run without real delays. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += duration;
    }

    /// Set the current time
    pub fn set(&self, time: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        let shared = clock.clone();
        assert_eq!(Duration::ZERO, clock.now());
        clock.sleep(Duration::from_millis(5));
        shared.advance(Duration::from_millis(10));
        assert_eq!(Duration::from_millis(15), clock.now());
        clock.set(Duration::from_secs(1));
        assert_eq!(Duration::from_secs(1), shared.now());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now() > a);
    }
}
