//! Device clocks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Time source of the device.
pub trait Clock: Send + Sync {
    /// Milliseconds since process start. Never goes backwards.
    fn monotonic_ms(&self) -> u64;

    /// Seconds since the Unix epoch, if the wall clock has been synced.
    fn wall_clock_secs(&self) -> Option<u64>;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn monotonic_ms(&self) -> u64 {
        (**self).monotonic_ms()
    }

    fn wall_clock_secs(&self) -> Option<u64> {
        (**self).wall_clock_secs()
    }
}

/// The host clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    /// Creates a clock whose monotonic time starts now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn wall_clock_secs(&self) -> Option<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|elapsed| elapsed.as_secs())
    }
}

/// A hand-driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    monotonic_ms: AtomicU64,
    wall_clock_secs: Mutex<Option<u64>>,
}

impl ManualClock {
    /// Creates a clock at `monotonic_ms` with no wall clock.
    pub fn new(monotonic_ms: u64) -> Self {
        Self {
            monotonic_ms: AtomicU64::new(monotonic_ms),
            wall_clock_secs: Mutex::new(None),
        }
    }

    /// Moves monotonic time forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.monotonic_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Sets or clears the wall clock.
    pub fn set_wall_clock(&self, secs: Option<u64>) {
        *self.wall_clock_secs.lock() = secs;
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> u64 {
        self.monotonic_ms.load(Ordering::SeqCst)
    }

    fn wall_clock_secs(&self) -> Option<u64> {
        *self.wall_clock_secs.lock()
    }
}
