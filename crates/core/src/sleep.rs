use rand::Rng;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Source of time for every wait in the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    fn sleep_ms(&self, ms: u64) {
        self.sleep(Duration::from_millis(ms));
    }
}

/// Wall clock backed by `std::thread::sleep`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Deterministic clock: sleeping advances virtual time and returns at once.
pub struct VirtualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), elapsed: Mutex::new(Duration::ZERO) }
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    pub fn advance(&self, d: Duration) {
        *self.elapsed.lock().unwrap() += d;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// `secs` with +/-30% random jitter, never below 10ms.
pub fn jittered(secs: f64) -> Duration {
    let jitter = secs * 0.3;
    let actual = if jitter > 0.0 {
        secs + rand::thread_rng().gen_range(-jitter..jitter)
    } else {
        secs
    };
    Duration::from_secs_f64(actual.max(0.01))
}
