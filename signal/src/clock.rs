//! Clock service: wall-clock timestamps and device-tick conversion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;

/// Nanoseconds in one second.
const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Process-wide monotonic epoch; all `SystemClock` timestamps are relative
/// to the first clock use in this process.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Source of wall-clock time and device clock-domain conversion.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current monotonic wall-clock time in nanoseconds.
    fn now_ns(&self) -> u64;

    /// Convert a device-tick count to wall-clock nanoseconds.
    fn ticks_to_ns(&self, ticks: u64) -> u64;
}

/// Monotonic system clock.
///
/// `ticks_per_second` describes the device clock domain; the default of
/// 1 GHz makes device ticks and nanoseconds coincide.
#[derive(Debug, Clone)]
pub struct SystemClock {
    ticks_per_second: u64,
}

impl SystemClock {
    /// Create a clock for a device domain running at `ticks_per_second`.
    pub fn new(ticks_per_second: u64) -> Self {
        Self { ticks_per_second }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { ticks_per_second: NANOS_PER_SECOND as u64 }
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        EPOCH.elapsed().as_nanos() as u64
    }

    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        // 128-bit intermediate: tick counts near u64::MAX must not overflow
        (ticks as u128 * NANOS_PER_SECOND / self.ticks_per_second as u128) as u64
    }
}

/// Deterministic clock for replay and tests.
///
/// Time advances only through [`ManualClock::set`] and
/// [`ManualClock::advance`]; device ticks convert one-to-one.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `now` nanoseconds.
    pub fn new(now: u64) -> Self {
        Self { now: AtomicU64::new(now) }
    }

    /// Set the current time.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::Release);
    }

    /// Advance the current time by `delta` nanoseconds.
    pub fn advance(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        ticks
    }
}
