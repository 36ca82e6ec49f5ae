//! Core client state types.
//!
//! This module provides [`SyncConfig`], the per-client tunables, and
//! [`ClientState`], the mutable state shared by the playback and membership
//! services of one client.
//!
//! # Concurrency design
//!
//! Everything a state transition reads or writes (group session, playback
//! intent, pending apply handle) sits behind one `parking_lot::Mutex` per
//! client, so an inbound event, a local action and a scheduled firing can
//! never interleave halfway. The lock is never held across an `.await`:
//! services decide under the lock and call the audio engine after releasing
//! it. The clock offset is a lone scalar read on every schedule computation
//! and lives behind its own lock in [`ClockSync`](crate::clock::ClockSync).

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{TandemError, TandemResult};
use crate::protocol_constants::{
    CLOCK_SMOOTHING, DEFAULT_LOOKAHEAD_MS, EVENT_CHANNEL_CAPACITY, MAX_CLOCK_STEP_MS,
    MAX_PROBE_RTT_MS, PROBE_INTERVAL_MS, QUEUE_ENDED_EPSILON_MS,
};
use crate::services::group_membership::GroupSession;
use crate::services::playback_session::PlaybackCore;

/// Configuration for one sync client.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    // Scheduling
    /// Margin added to "now" for locally initiated actions (milliseconds).
    pub lookahead_ms: u64,

    /// Margin for the stop broadcast after a natural track end (milliseconds).
    pub queue_ended_epsilon_ms: u64,

    // Clock sync
    /// Interval between time-sync probes (milliseconds).
    pub probe_interval_ms: u64,

    /// EMA factor for offset samples after the first, in `(0, 1]`.
    /// `1.0` adopts every sample as-is.
    pub clock_smoothing: f64,

    /// Largest offset adjustment from a single sample (milliseconds).
    pub max_clock_step_ms: f64,

    /// Probes with a longer round trip are discarded (milliseconds).
    pub max_rtt_ms: i64,

    // Events
    /// Capacity of the UI event broadcast channel.
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`TandemError::Configuration`] naming the first bad field.
    pub fn validate(&self) -> TandemResult<()> {
        if self.probe_interval_ms == 0 {
            return Err(TandemError::Configuration(
                "probe_interval_ms must be >= 1".to_string(),
            ));
        }
        if !(self.clock_smoothing > 0.0 && self.clock_smoothing <= 1.0) {
            return Err(TandemError::Configuration(format!(
                "clock_smoothing must be in (0, 1], got {}",
                self.clock_smoothing
            )));
        }
        if !(self.max_clock_step_ms > 0.0) {
            return Err(TandemError::Configuration(
                "max_clock_step_ms must be > 0".to_string(),
            ));
        }
        if self.max_rtt_ms <= 0 {
            return Err(TandemError::Configuration(
                "max_rtt_ms must be > 0".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(TandemError::Configuration(
                "event_channel_capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
            queue_ended_epsilon_ms: QUEUE_ENDED_EPSILON_MS,
            probe_interval_ms: PROBE_INTERVAL_MS,
            clock_smoothing: CLOCK_SMOOTHING,
            max_clock_step_ms: MAX_CLOCK_STEP_MS,
            max_rtt_ms: MAX_PROBE_RTT_MS,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Client State
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable state of one client, guarded as a unit.
#[derive(Debug, Default)]
pub struct ClientState {
    /// Active listening group, if any.
    pub(crate) group: Option<GroupSession>,
    /// Playback state machine data.
    pub(crate) playback: PlaybackCore,
}

impl ClientState {
    /// Id of the active group.
    pub(crate) fn group_id(&self) -> Option<&str> {
        self.group.as_ref().map(|g| g.group_id.as_str())
    }
}

/// Handle to the single state lock of a client.
pub type SharedClientState = Arc<Mutex<ClientState>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lookahead_ms, 300);
        assert_eq!(config.probe_interval_ms, 5000);
    }

    #[test]
    fn rejects_zero_probe_interval() {
        let config = SyncConfig {
            probe_interval_ms: 0,
            ..SyncConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "configuration_error");
        assert_eq!(
            err.to_string(),
            "Configuration error: probe_interval_ms must be >= 1"
        );
    }

    #[test]
    fn rejects_smoothing_outside_unit_interval() {
        for smoothing in [0.0, -0.5, 1.5, f64::NAN] {
            let config = SyncConfig {
                clock_smoothing: smoothing,
                ..SyncConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {smoothing}");
        }
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{ "lookahead_ms": 500 }"#).unwrap();
        assert_eq!(config.lookahead_ms, 500);
        assert_eq!(config.max_rtt_ms, 2000);
    }
}
