//! Client services.
//!
//! - [`PlaybackSessionState`]: the playback state machine
//! - [`GroupMembership`]: group lifecycle and roster

pub mod group_membership;
pub mod playback_session;

pub use group_membership::{GroupMembership, GroupSession, GroupSnapshot};
pub use playback_session::{IntentStatus, PlaybackIntent, PlaybackSessionState, SessionPhase};
