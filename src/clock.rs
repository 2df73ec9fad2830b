//! Monotonic time source shared by the poll loop and the interrupt handlers.
//!
//! All timing in the controller is expressed as `f64` seconds since an
//! arbitrary origin. Timeouts are evaluated by comparing against a fresh
//! reading every poll.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Seconds on a monotonic clock.
pub type Timestamp = f64;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock backed by [`Instant`], counting from construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for deterministic tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: Timestamp) {
        *self.now.lock() = t;
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
