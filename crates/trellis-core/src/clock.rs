#![forbid(unsafe_code)]

//! Time sources for the scheduler's debounce timer.
//!
//! In production the scheduler reads `web_time::Instant::now()` and sleeps
//! the calling thread until its timer fires. Tests use a [`ManualClock`]
//! instead: sleeping advances the clock to the deadline immediately, so a
//! whole debounce window settles without real waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

/// A manually advanceable clock for deterministic tests.
///
/// All clones share the same offset.
#[derive(Debug, Clone)]
pub struct ManualClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a manual clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Advance the clock so that `now() >= target`. Never moves backwards.
    pub fn advance_to(&self, target: Instant) {
        let now = self.now();
        if target > now {
            self.advance(target - now);
        }
    }

    /// Current manual time.
    #[must_use]
    pub fn now(&self) -> Instant {
        let offset = Duration::from_micros(self.offset_us.load(Ordering::Acquire));
        self.epoch + offset
    }

    /// Total time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::Acquire))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the scheduler gets time from.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// Real wall-clock time.
    #[default]
    System,
    /// Manually advanced time.
    Manual(ManualClock),
}

impl Clock {
    /// Wrap a manual clock.
    #[must_use]
    pub fn manual(clock: &ManualClock) -> Self {
        Self::Manual(clock.clone())
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::System => Instant::now(),
            Self::Manual(clock) => clock.now(),
        }
    }

    /// Block until `deadline` has passed.
    ///
    /// A manual clock jumps straight to the deadline.
    pub fn sleep_until(&self, deadline: Instant) {
        match self {
            Self::System => {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
            Self::Manual(clock) => clock.advance_to(deadline),
        }
    }
}
