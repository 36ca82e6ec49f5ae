//! General utilities shared across the library.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts a millisecond span to seconds of track position.
#[must_use]
pub fn ms_to_secs(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

/// Milliseconds from `now_ms` until `target_ms`, floored at zero.
///
/// Used to turn a reference-clock instant into a local timer delay: a target
/// already in the past yields zero so the caller fires immediately.
#[must_use]
pub fn delay_until(target_ms: i64, now_ms: i64) -> u64 {
    target_ms.saturating_sub(now_ms).max(0) as u64
}
