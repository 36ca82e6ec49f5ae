//! Event system for UI-facing notifications.
//!
//! This module provides:
//! - [`EventEmitter`] trait for services to emit events
//! - [`BroadcastEventBridge`] for fanning events out to subscribers
//! - Event types for the playback and group domains
//!
//! These events describe what the user should see (phase, current intent,
//! roster, toasts). They are separate from relay events, which travel
//! between peers.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::protocol::GroupMember;
use crate::services::playback_session::{PlaybackIntent, SessionPhase};

/// Events broadcast to UI subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Playback state machine events.
    Session(SessionEvent),

    /// Group lifecycle and roster events.
    Group(GroupEvent),
}

/// Events from the playback state machine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The state machine moved to another phase.
    PhaseChanged {
        phase: SessionPhase,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The playback intent was replaced.
    IntentChanged {
        /// `None` once the group is left.
        intent: Option<PlaybackIntent>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A non-fatal failure the user should hear about.
    Error {
        /// Machine-readable error code.
        code: String,
        message: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Why a group session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCloseReason {
    /// The local user left.
    Left,
    /// The owner closed the group.
    Disbanded,
    /// The local user was removed.
    Kicked,
    /// The client shut down.
    Shutdown,
}

/// Events about the active group.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GroupEvent {
    /// A group session started (created or joined).
    Entered {
        #[serde(rename = "groupId")]
        group_id: String,
        name: String,
        #[serde(rename = "ownerId")]
        owner_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A listener joined.
    MemberJoined {
        member: GroupMember,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A listener left.
    MemberLeft {
        #[serde(rename = "userId")]
        user_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The group session ended.
    Closed {
        #[serde(rename = "groupId")]
        group_id: String,
        reason: GroupCloseReason,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}
