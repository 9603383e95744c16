//! Injectable time source.
//!
//! Letting the scheduler take its clock as a trait object means tests can
//! freeze or fast-forward wall-clock time without real sleeps.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A source of [`Instant`]s for the scheduler to use instead of calling
/// `Instant::now()` directly.
pub trait Clock: Send + Sync {
    /// The current time, per this clock.
    fn now(&self) -> Instant;
}

/// The default clock: real wall-clock time via `Instant::now()`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock a test can freeze and advance on demand.
///
/// Starts at the real `Instant::now()` (an arbitrary but valid base) and
/// only moves forward when [`ManualClock::advance`] is called.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a manual clock frozen at the current real time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Moves this clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().expect("mlfq: manual clock lock poisoned");
        *now += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("mlfq: manual clock lock poisoned")
    }
}
