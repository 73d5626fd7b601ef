#![forbid(unsafe_code)]

//! Host-driven monotonic time.
//!
//! The engine never reads a wall clock. The embedding host advances a
//! [`DeterministicClock`] from its own time source (`performance.now()` in a
//! browser, explicit steps in tests), which keeps every timer decision
//! reproducible.

use web_time::Duration;

/// Deterministic monotonic clock controlled by the host.
#[derive(Debug, Default, Clone)]
pub struct DeterministicClock {
    now: Duration,
}

impl DeterministicClock {
    /// Create a clock starting at `0`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: Duration::ZERO,
        }
    }

    /// Current monotonic time.
    #[must_use]
    pub const fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock to `now`. Time never goes backwards; earlier values are ignored.
    pub fn set(&mut self, now: Duration) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Advance monotonic time by `dt`.
    pub fn advance(&mut self, dt: Duration) {
        self.now = self.now.saturating_add(dt);
    }

    /// Convert a host millisecond timestamp (possibly NaN or negative) into a `Duration`.
    #[must_use]
    pub fn duration_from_millis_f64(ms: f64) -> Option<Duration> {
        if ms.is_finite() && ms >= 0.0 {
            Some(Duration::from_secs_f64(ms / 1000.0))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let mut clock = DeterministicClock::new();
        clock.set(Duration::from_millis(50));
        clock.set(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(50));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(55));
    }

    #[test]
    fn host_millis_rejects_invalid_inputs() {
        assert_eq!(DeterministicClock::duration_from_millis_f64(f64::NAN), None);
        assert_eq!(DeterministicClock::duration_from_millis_f64(-1.0), None);
        assert_eq!(
            DeterministicClock::duration_from_millis_f64(1500.0),
            Some(Duration::from_millis(1500))
        );
    }
}
