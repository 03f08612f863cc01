//! Monotonic nanosecond time source (C1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Abstract monotonic clock. All timestamps in this crate are nanoseconds
/// since some unspecified but fixed epoch (never wall-clock, never UTC).
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Real clock, backed by `std::time::Instant`.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// Settable clock for tests: avoids real sleeps in timer/reset tests.
/// Test-only: never part of the crate's public API.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct FakeClock {
    now: Arc<AtomicU64>,
}

#[cfg(test)]
impl FakeClock {
    pub(crate) fn new(start_ns: u64) -> Self {
        FakeClock {
            now: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    pub(crate) fn set(&self, ns: u64) {
        self.now.store(ns, Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, delta_ns: u64) {
        self.now.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clk = FakeClock::new(100);
        assert_eq!(clk.now_ns(), 100);
        clk.advance(50);
        assert_eq!(clk.now_ns(), 150);
        clk.set(0);
        assert_eq!(clk.now_ns(), 0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clk = SystemClock::new();
        let a = clk.now_ns();
        let b = clk.now_ns();
        assert!(b >= a);
    }
}
