//! Relay wire protocol.
//!
//! Payload shapes for every named event exchanged with the relay. Field
//! names are camelCase on the wire. Times named `*_time` / `scheduled_time`
//! are reference-clock milliseconds; `current_time` is a track position in
//! seconds.
//!
//! Event names and the typed [`OutboundEvent`] / [`InboundEvent`] enums live
//! in [`events`].

pub mod events;

pub use events::{names, InboundEvent, OutboundEvent};

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// A playable track as carried in `song` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    /// Catalog identifier, stable across peers.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Stream URL handed to the audio engine.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback (emit)
// ─────────────────────────────────────────────────────────────────────────────

/// `music-playback`: play/pause toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackCommand {
    pub group_id: String,
    pub is_playing: bool,
    pub current_time: f64,
    pub scheduled_time: i64,
}

/// `music-seek`: jump to a position, keeping the play state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekCommand {
    pub group_id: String,
    pub current_time: f64,
    pub scheduled_time: i64,
    pub is_playing: bool,
}

/// `music-change`: switch the group to another track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicChangeCommand {
    pub group_id: String,
    pub song: Song,
    pub current_time: f64,
    pub scheduled_time: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback (receive)
// ─────────────────────────────────────────────────────────────────────────────

/// `playback-update`: another peer toggled or seeked.
///
/// `seq` is stamped by relays that order playback events per group; when
/// present, events that are not newer than the last applied one are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackUpdate {
    pub is_playing: bool,
    pub current_time: f64,
    pub scheduled_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// `music-update`: another peer changed the track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicUpdate {
    pub song: Song,
    pub current_time: f64,
    pub scheduled_time: i64,
    /// Track changes start playing unless the sender says otherwise.
    #[serde(default = "default_true")]
    pub is_playing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Groups
// ─────────────────────────────────────────────────────────────────────────────

/// `create-music-group` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

/// `join-music-group` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroupRequest {
    pub group_id: String,
}

/// `leave-group` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveGroupRequest {
    pub group_id: String,
}

/// `group-created` payload and the `group` field of `group-joined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    /// User id of the owner.
    pub created_by: String,
}

/// A listener in a group. Equality of membership is by `user_id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user_id: String,
    pub display_name: String,
    #[serde(rename = "avatar", default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl GroupMember {
    /// Creates a member without an avatar.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }
}

/// Group playback as last recorded by the relay.
///
/// `current_time` was the track position at reference time
/// `last_update_reference_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    #[serde(default)]
    pub song: Option<Song>,
    pub current_time: f64,
    pub is_playing: bool,
    pub last_update_reference_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// `group-joined` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupJoined {
    pub group: GroupInfo,
    #[serde(default)]
    pub members: Vec<GroupMember>,
    #[serde(default)]
    pub playback_state: Option<PlaybackSnapshot>,
}

/// `member-left` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLeft {
    pub user_id: String,
}

/// `error` payload sent by the relay when it rejects a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayErrorPayload {
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Clock Sync
// ─────────────────────────────────────────────────────────────────────────────

/// `time-sync-request`: carries the sender's local clock at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncRequest {
    pub client_time: i64,
}

/// `time-sync-response`: echoes `client_time` and adds the relay's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncResponse {
    pub client_time: i64,
    pub server_time: i64,
}
