//! Fixed timing constants shared by every peer in a listening group.
//!
//! Peers only converge when they agree on these values, so changing them
//! means changing every client at once. Per-client tunables live in
//! [`SyncConfig`](crate::state::SyncConfig) and default to these.

// ─────────────────────────────────────────────────────────────────────────────
// Scheduling
// ─────────────────────────────────────────────────────────────────────────────

/// Margin added to "now" when scheduling a locally initiated action (ms).
///
/// Covers relay delivery plus peer clock error while still feeling instant.
pub const DEFAULT_LOOKAHEAD_MS: u64 = 300;

/// Margin used when broadcasting the stop that follows a natural track end (ms).
pub const QUEUE_ENDED_EPSILON_MS: u64 = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Clock Sync
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between time-sync probes (ms).
pub const PROBE_INTERVAL_MS: u64 = 5000;

/// EMA smoothing factor applied to offset samples after the first.
pub const CLOCK_SMOOTHING: f64 = 0.3;

/// Largest single adjustment applied to the offset by one sample (ms).
pub const MAX_CLOCK_STEP_MS: f64 = 50.0;

/// Samples with a round trip above this are discarded (ms).
pub const MAX_PROBE_RTT_MS: i64 = 2000;

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the UI event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
