//! Named relay events.
//!
//! The relay speaks Socket.IO-style `(name, payload)` pairs. Outbound events
//! are built as [`OutboundEvent`] and flattened with [`OutboundEvent::name`]
//! and [`OutboundEvent::payload`]; inbound pairs are lifted into
//! [`InboundEvent`] with [`InboundEvent::decode`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult, TransportError, TransportResult};

use super::{
    CreateGroupRequest, GroupInfo, GroupJoined, GroupMember, JoinGroupRequest, LeaveGroupRequest,
    MemberLeft, MusicChangeCommand, MusicUpdate, PlaybackCommand, PlaybackUpdate,
    RelayErrorPayload, SeekCommand, TimeSyncRequest, TimeSyncResponse,
};

/// Wire names of relay events.
pub mod names {
    pub const MUSIC_PLAYBACK: &str = "music-playback";
    pub const MUSIC_SEEK: &str = "music-seek";
    pub const MUSIC_CHANGE: &str = "music-change";
    pub const PLAYBACK_UPDATE: &str = "playback-update";
    pub const MUSIC_UPDATE: &str = "music-update";
    pub const CREATE_MUSIC_GROUP: &str = "create-music-group";
    pub const GROUP_CREATED: &str = "group-created";
    pub const JOIN_MUSIC_GROUP: &str = "join-music-group";
    pub const GROUP_JOINED: &str = "group-joined";
    pub const MEMBER_JOINED: &str = "member-joined";
    pub const MEMBER_LEFT: &str = "member-left";
    pub const LEAVE_GROUP: &str = "leave-group";
    pub const GROUP_DISBANDED: &str = "group-disbanded";
    pub const KICKED: &str = "kicked";
    pub const TIME_SYNC_REQUEST: &str = "time-sync-request";
    pub const TIME_SYNC_RESPONSE: &str = "time-sync-response";
    pub const ERROR: &str = "error";
}

/// Events this client emits to its group through the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    MusicPlayback(PlaybackCommand),
    MusicSeek(SeekCommand),
    MusicChange(MusicChangeCommand),
    CreateMusicGroup(CreateGroupRequest),
    JoinMusicGroup(JoinGroupRequest),
    LeaveGroup(LeaveGroupRequest),
    TimeSyncRequest(TimeSyncRequest),
}

impl OutboundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MusicPlayback(_) => names::MUSIC_PLAYBACK,
            Self::MusicSeek(_) => names::MUSIC_SEEK,
            Self::MusicChange(_) => names::MUSIC_CHANGE,
            Self::CreateMusicGroup(_) => names::CREATE_MUSIC_GROUP,
            Self::JoinMusicGroup(_) => names::JOIN_MUSIC_GROUP,
            Self::LeaveGroup(_) => names::LEAVE_GROUP,
            Self::TimeSyncRequest(_) => names::TIME_SYNC_REQUEST,
        }
    }

    /// Serializes the payload for the wire.
    pub fn payload(&self) -> TransportResult<Value> {
        let result = match self {
            Self::MusicPlayback(p) => serde_json::to_value(p),
            Self::MusicSeek(p) => serde_json::to_value(p),
            Self::MusicChange(p) => serde_json::to_value(p),
            Self::CreateMusicGroup(p) => serde_json::to_value(p),
            Self::JoinMusicGroup(p) => serde_json::to_value(p),
            Self::LeaveGroup(p) => serde_json::to_value(p),
            Self::TimeSyncRequest(p) => serde_json::to_value(p),
        };
        result.map_err(|source| TransportError::Encode {
            event: self.name(),
            source,
        })
    }
}

/// Events the relay delivers to this client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    PlaybackUpdate(PlaybackUpdate),
    MusicUpdate(MusicUpdate),
    GroupCreated(GroupInfo),
    GroupJoined(GroupJoined),
    MemberJoined(GroupMember),
    MemberLeft(MemberLeft),
    GroupDisbanded,
    Kicked,
    TimeSyncResponse(TimeSyncResponse),
    Error(RelayErrorPayload),
}

impl InboundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaybackUpdate(_) => names::PLAYBACK_UPDATE,
            Self::MusicUpdate(_) => names::MUSIC_UPDATE,
            Self::GroupCreated(_) => names::GROUP_CREATED,
            Self::GroupJoined(_) => names::GROUP_JOINED,
            Self::MemberJoined(_) => names::MEMBER_JOINED,
            Self::MemberLeft(_) => names::MEMBER_LEFT,
            Self::GroupDisbanded => names::GROUP_DISBANDED,
            Self::Kicked => names::KICKED,
            Self::TimeSyncResponse(_) => names::TIME_SYNC_RESPONSE,
            Self::Error(_) => names::ERROR,
        }
    }

    /// Lifts a raw `(name, payload)` pair into a typed event.
    ///
    /// `group-disbanded` and `kicked` ignore their payload.
    pub fn decode(name: &str, payload: Value) -> ProtocolResult<Self> {
        let event = match name {
            names::PLAYBACK_UPDATE => {
                Self::PlaybackUpdate(parse(names::PLAYBACK_UPDATE, payload)?)
            }
            names::MUSIC_UPDATE => Self::MusicUpdate(parse(names::MUSIC_UPDATE, payload)?),
            names::GROUP_CREATED => Self::GroupCreated(parse(names::GROUP_CREATED, payload)?),
            names::GROUP_JOINED => Self::GroupJoined(parse(names::GROUP_JOINED, payload)?),
            names::MEMBER_JOINED => Self::MemberJoined(parse(names::MEMBER_JOINED, payload)?),
            names::MEMBER_LEFT => Self::MemberLeft(parse(names::MEMBER_LEFT, payload)?),
            names::GROUP_DISBANDED => Self::GroupDisbanded,
            names::KICKED => Self::Kicked,
            names::TIME_SYNC_RESPONSE => {
                Self::TimeSyncResponse(parse(names::TIME_SYNC_RESPONSE, payload)?)
            }
            names::ERROR => Self::Error(parse(names::ERROR, payload)?),
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

fn parse<T: DeserializeOwned>(event: &'static str, payload: Value) -> ProtocolResult<T> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::Malformed { event, source })
}
