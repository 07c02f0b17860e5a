//! Wall-clock access for idle-detection and the receiver-clock timestamp
//! fallback.
//!
//! Production code reads [`std::time::SystemTime`]; tests substitute
//! [`FakeClock`] so idle timeouts and receiver-clock substitution can be
//! exercised deterministically without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock time, abstracted so tests can control it.
pub trait WallClock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Current time in epoch microseconds, used as the receiver-clock
    /// fallback when an incoming row's timestamp is the null sentinel.
    fn now_us(&self) -> i64;
}

/// Production clock backed by [`quanta`]'s calibrated monotonic counter.
///
/// Every row on the hot path may read the clock once (for the
/// receiver-timestamp fallback) and every maintenance tick reads it again
/// (for idle detection), so this avoids `SystemTime::now()`'s syscall on
/// every call: an epoch anchor is captured once at construction and every
/// subsequent reading is `anchor + quanta's cheap monotonic elapsed()`,
/// the same anchor-plus-monotonic-delta trick `quanta` itself documents for
/// deriving wall-clock-like timestamps from its `Instant`.
pub struct RealClock {
    clock: quanta::Clock,
    anchor: quanta::Instant,
    anchor_epoch_us: i64,
}

impl Default for RealClock {
    fn default() -> Self {
        RealClock::new()
    }
}

impl RealClock {
    /// Creates a new real clock, anchoring `quanta`'s monotonic counter
    /// against the current wall-clock epoch time.
    pub fn new() -> Self {
        let clock = quanta::Clock::new();
        let anchor = clock.now();
        let anchor_epoch_us = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        RealClock {
            clock,
            anchor,
            anchor_epoch_us,
        }
    }
}

impl WallClock for RealClock {
    fn now_ms(&self) -> i64 {
        self.now_us() / 1_000
    }

    fn now_us(&self) -> i64 {
        let elapsed_us = self.clock.now().duration_since(self.anchor).as_micros() as i64;
        self.anchor_epoch_us + elapsed_us
    }
}

/// A clock whose value is set explicitly, for deterministic tests of idle
/// release and receiver-clock substitution.
pub struct FakeClock {
    ms: AtomicI64,
}

impl FakeClock {
    /// Creates a fake clock starting at the given epoch-millisecond value.
    pub fn new(start_ms: i64) -> Self {
        FakeClock {
            ms: AtomicI64::new(start_ms),
        }
    }

    /// Advances the clock by `delta_ms` milliseconds.
    pub fn advance_ms(&self, delta_ms: i64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute epoch-millisecond value.
    pub fn set_ms(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }
}

impl WallClock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }

    fn now_us(&self) -> i64 {
        self.ms.load(Ordering::SeqCst) * 1_000
    }
}
