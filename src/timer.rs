//! The silence timer: a signed millisecond delta since the bus was last
//! heard from, shared between the receive path (which resets it on every
//! octet) and the tick path (which reads and ages it).

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic "time since last octet" counter, in milliseconds.
///
/// Represented as a signed delta rather than an unsigned one so a
/// transmit can pre-charge it negative and have it read as zero (not
/// underflow) once the charged time has elapsed — see [`SilenceTimer::charge`].
#[derive(Debug, Default)]
pub struct SilenceTimer(AtomicI64);

impl SilenceTimer {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Reset to zero — a fresh octet was just observed.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    /// Charge the timer with a (typically negative) value to account for
    /// time already known to have elapsed, such as the duration of a
    /// transmit the engine itself just performed.
    pub fn charge(&self, value_ms: i64) {
        self.0.store(value_ms, Ordering::Relaxed);
    }

    /// Advance the timer by the time elapsed since the previous tick.
    pub fn tick(&self, elapsed_ms: i64) {
        self.0.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    /// Read the current value. Relaxed ordering is fine here: a status
    /// reader observing a value that's stale by a tick or two is the
    /// documented tradeoff for a lock-free read.
    #[must_use]
    pub fn load(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}
