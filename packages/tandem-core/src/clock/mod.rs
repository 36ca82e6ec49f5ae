//! Local and reference clocks.
//!
//! - [`LocalClock`]: this device's millisecond clock
//! - [`MonotonicClock`]: wall-clock anchor advanced by a monotonic instant
//! - [`ClockSync`]: estimates the offset to the relay's reference clock

mod sync;

pub use sync::{ClockStats, ClockSync};

use crate::utils::now_millis;

/// A millisecond clock on this device.
pub trait LocalClock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall-clock anchor advanced by `tokio::time::Instant`.
///
/// Never steps backwards when the OS adjusts the system clock, and follows
/// tokio's paused clock in tests, so timer-driven code is deterministic.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_ms: i64,
    started: tokio::time::Instant,
}

impl MonotonicClock {
    /// Anchored at the current system time.
    #[must_use]
    pub fn system() -> Self {
        Self::starting_at(now_millis() as i64)
    }

    /// Anchored at an arbitrary value. Peers with different anchors model
    /// skewed device clocks.
    #[must_use]
    pub fn starting_at(anchor_ms: i64) -> Self {
        Self {
            anchor_ms,
            started: tokio::time::Instant::now(),
        }
    }
}

impl LocalClock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.anchor_ms + self.started.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_paused_time() {
        let clock = MonotonicClock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
    }
}
