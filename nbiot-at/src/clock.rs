//! Monotonic tick sources for timeout arithmetic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;

    /// Called once per iteration of a polling wait.
    fn idle(&self) {}
}

/// Wall-clock time from [`Instant`], sleeping briefly between polls.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    poll_interval: Duration,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::with_poll_interval(Duration::from_millis(1))
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            poll_interval,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn idle(&self) {
        if !self.poll_interval.is_zero() {
            std::thread::sleep(self.poll_interval);
        }
    }
}

/// Simulated clock that advances a fixed step on every idle poll.
///
/// Clones share the same time, so a test can keep a handle while the
/// session owns another.
#[derive(Debug, Clone)]
pub struct StepClock {
    now: Arc<AtomicU64>,
    step_ms: u64,
}

impl StepClock {
    pub fn new(step_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(0)),
            step_ms,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn idle(&self) {
        self.advance(self.step_ms);
    }
}
