//! Time source and sleep abstraction.
//!
//! Retry backoff and TTL bookkeeping go through a [`Clock`] so tests can
//! advance time without waiting.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Source of the current time and of blocking waits.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual time: `sleep` returns immediately and advances `now`.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    slept: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                slept: Duration::ZERO,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.now += chrono::Duration::milliseconds(duration.as_millis() as i64);
    }

    /// Total time spent in `sleep`.
    pub fn total_slept(&self) -> Duration {
        self.lock().slept
    }

    /// Every individual `sleep` call, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A poisoned clock still holds a consistent timestamp.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.now += chrono::Duration::milliseconds(duration.as_millis() as i64);
        state.slept += duration;
        state.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_sleep_advances_time() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_millis(100));
        clock.sleep(Duration::from_millis(200));

        assert_eq!(clock.total_slept(), Duration::from_millis(300));
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!((clock.now() - start).num_milliseconds(), 300);
    }

    #[test]
    fn test_manual_clock_advance_is_not_sleep() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.advance(Duration::from_secs(60));

        assert_eq!(clock.total_slept(), Duration::ZERO);
        assert_eq!((clock.now() - start).num_seconds(), 60);
    }
}
