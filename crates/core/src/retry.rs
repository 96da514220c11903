use std::time::Duration;

use crate::sleep::Clock;

/// Bounded retry policy: at most `attempts` tries, sleeping `delay` between
/// them (scaled by `backoff` after each failed try).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retry {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl Retry {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay, backoff: 1.0 }
    }

    pub fn with_backoff(mut self, factor: f64) -> Self {
        self.backoff = factor.max(1.0);
        self
    }

    /// Delay before attempt `n + 1` (0-based `n` is the failed attempt).
    pub fn delay_after(&self, n: u32) -> Duration {
        if self.backoff == 1.0 || n == 0 {
            return self.delay;
        }
        self.delay.mul_f64(self.backoff.powi(n as i32))
    }

    /// Run `op` until it yields `Some`, returning `None` once every attempt
    /// has been used. `op` receives the 0-based attempt index.
    pub fn run<T>(&self, clock: &dyn Clock, mut op: impl FnMut(u32) -> Option<T>) -> Option<T> {
        let attempts = self.attempts.max(1);
        for n in 0..attempts {
            if let Some(v) = op(n) {
                return Some(v);
            }
            if n + 1 < attempts {
                clock.sleep(self.delay_after(n));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep::VirtualClock;

    #[test]
    fn test_run_stops_at_first_success() {
        let clock = VirtualClock::new();
        let mut calls = 0;
        let out = Retry::fixed(3, Duration::from_millis(100)).run(&clock, |n| {
            calls += 1;
            (n == 1).then_some("ok")
        });
        assert_eq!(out, Some("ok"));
        assert_eq!(calls, 2);
        assert_eq!(clock.elapsed(), Duration::from_millis(100));
    }

    #[test]
    fn test_run_exhausts_without_trailing_sleep() {
        let clock = VirtualClock::new();
        let out: Option<()> = Retry::fixed(3, Duration::from_millis(200)).run(&clock, |_| None);
        assert_eq!(out, None);
        assert_eq!(clock.elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_grows_delay() {
        let clock = VirtualClock::new();
        let last = Retry::fixed(3, Duration::from_millis(100))
            .with_backoff(2.0)
            .run(&clock, |n| (n == 2).then_some(n));
        assert_eq!(last, Some(2));
        assert_eq!(clock.elapsed(), Duration::from_millis(300));
    }
}
