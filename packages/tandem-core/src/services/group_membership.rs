//! Group lifecycle and roster tracking.
//!
//! [`GroupMembership`] creates, joins and leaves listening groups, keeps the
//! member list current, and hands a late joiner's playback snapshot to the
//! playback state machine so it starts at the group's position rather than
//! from zero.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::ClockSync;
use crate::error::{TandemError, TandemResult};
use crate::events::{EventEmitter, GroupCloseReason, GroupEvent};
use crate::protocol::{
    CreateGroupRequest, GroupInfo, GroupJoined, GroupMember, JoinGroupRequest, LeaveGroupRequest,
    MusicUpdate, OutboundEvent, PlaybackSnapshot,
};
use crate::state::SharedClientState;
use crate::transport::RelayTransport;
use crate::utils::{ms_to_secs, now_millis};

use super::playback_session::{PlaybackIntent, PlaybackSessionState, SessionPhase};

/// The group this client is in.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSession {
    pub group_id: String,
    pub name: String,
    pub owner_id: String,
    /// Keyed by user id, so re-adding a member is a no-op.
    members: BTreeMap<String, GroupMember>,
}

impl GroupSession {
    pub fn new(info: &GroupInfo) -> Self {
        Self {
            group_id: info.id.clone(),
            name: info.name.clone(),
            owner_id: info.created_by.clone(),
            members: BTreeMap::new(),
        }
    }

    /// Adds `member`; returns `false` if that user was already present.
    pub fn add_member(&mut self, member: GroupMember) -> bool {
        if self.members.contains_key(&member.user_id) {
            return false;
        }
        self.members.insert(member.user_id.clone(), member);
        true
    }

    /// Removes a member; returns `false` if the user was not present.
    pub fn remove_member(&mut self, user_id: &str) -> bool {
        self.members.remove(user_id).is_some()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn members(&self) -> Vec<GroupMember> {
        self.members.values().cloned().collect()
    }
}

/// Point-in-time view of the active group, for UIs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub group_id: String,
    pub name: String,
    pub owner_id: String,
    pub members: Vec<GroupMember>,
    pub phase: SessionPhase,
    pub intent: Option<PlaybackIntent>,
}

/// Position a late joiner should start at, and when.
///
/// Returns `(position_secs, apply_at_ms)`. A snapshot whose reference time
/// is still ahead (a change scheduled but not yet applied) is applied at
/// that time, unmoved.
pub(crate) fn catch_up(snapshot: &PlaybackSnapshot, now_ms: i64) -> (f64, i64) {
    let reference = snapshot.last_update_reference_time;
    if reference >= now_ms {
        return (snapshot.current_time, reference);
    }
    let position = if snapshot.is_playing {
        snapshot.current_time + ms_to_secs(now_ms - reference)
    } else {
        snapshot.current_time
    };
    (position, now_ms)
}

/// Membership service of one client.
pub struct GroupMembership {
    local_user: GroupMember,
    state: SharedClientState,
    transport: Arc<dyn RelayTransport>,
    clock: Arc<ClockSync>,
    playback: Arc<PlaybackSessionState>,
    emitter: Arc<dyn EventEmitter>,
}

impl GroupMembership {
    pub fn new(
        local_user: GroupMember,
        state: SharedClientState,
        transport: Arc<dyn RelayTransport>,
        clock: Arc<ClockSync>,
        playback: Arc<PlaybackSessionState>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            local_user,
            state,
            transport,
            clock,
            playback,
            emitter,
        }
    }

    pub fn local_user(&self) -> &GroupMember {
        &self.local_user
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Asks the relay for a new group owned by this user.
    ///
    /// The session starts when `group-created` comes back.
    pub fn create_group(&self, name: &str) -> TandemResult<()> {
        log::info!("[Group] Creating group '{}'", name);
        self.transport
            .emit(OutboundEvent::CreateMusicGroup(CreateGroupRequest {
                name: name.to_string(),
            }))?;
        Ok(())
    }

    /// Asks the relay to join `group_id`.
    ///
    /// The session starts when `group-joined` comes back. Joining the group
    /// already active is a no-op.
    pub fn join_group(&self, group_id: &str) -> TandemResult<()> {
        if self.state.lock().group_id() == Some(group_id) {
            log::debug!("[Group] Already in group {}", group_id);
            return Ok(());
        }
        log::info!("[Group] Joining group {}", group_id);
        self.transport
            .emit(OutboundEvent::JoinMusicGroup(JoinGroupRequest {
                group_id: group_id.to_string(),
            }))?;
        Ok(())
    }

    /// Leaves the active group and stops local playback.
    ///
    /// Local state is torn down even if the relay could not be told.
    pub async fn leave_group(&self) -> TandemResult<()> {
        let group_id = self
            .state
            .lock()
            .group_id()
            .map(str::to_owned)
            .ok_or(TandemError::NotInGroup)?;

        log::info!("[Group] Leaving group {}", group_id);
        if let Err(e) = self
            .transport
            .emit(OutboundEvent::LeaveGroup(LeaveGroupRequest { group_id }))
        {
            log::warn!("[Group] Failed to notify relay of leave: {}", e);
        }

        self.close(GroupCloseReason::Left).await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound events
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts a session for a group this user just created.
    pub async fn on_group_created(&self, info: GroupInfo) {
        self.enter(&info, vec![self.local_user.clone()]);
        self.playback.enter_group(None);
    }

    /// Starts a session for a joined group, catching up on its playback.
    pub async fn on_group_joined(&self, joined: GroupJoined) {
        let mut members = joined.members;
        if !members.iter().any(|m| m.user_id == self.local_user.user_id) {
            members.push(self.local_user.clone());
        }
        self.enter(&joined.group, members);

        let Some(snapshot) = joined.playback_state else {
            self.playback.enter_group(None);
            return;
        };
        let Some(song) = snapshot.song.clone() else {
            self.playback.enter_group(snapshot.seq);
            return;
        };

        let (position, apply_at) = catch_up(&snapshot, self.clock.now());
        log::info!(
            "[Group] Catching up to {} at {:.2}s ({}), apply at ref {}",
            song.id,
            position,
            if snapshot.is_playing { "playing" } else { "paused" },
            apply_at
        );

        self.playback.enter_group(None);
        self.playback
            .on_music_update(MusicUpdate {
                song,
                current_time: position,
                scheduled_time: apply_at,
                is_playing: snapshot.is_playing,
                seq: snapshot.seq,
            })
            .await;
    }

    pub fn on_member_joined(&self, member: GroupMember) {
        let added = {
            let mut state = self.state.lock();
            match state.group.as_mut() {
                Some(group) => group.add_member(member.clone()),
                None => {
                    log::debug!("[Group] Ignoring member-joined outside a group");
                    return;
                }
            }
        };
        if !added {
            log::debug!("[Group] {} already a member", member.user_id);
            return;
        }

        log::info!("[Group] {} joined", member.display_name);
        self.emitter.emit_group(GroupEvent::MemberJoined {
            member,
            timestamp: now_millis(),
        });
    }

    pub fn on_member_left(&self, user_id: &str) {
        let removed = {
            let mut state = self.state.lock();
            state
                .group
                .as_mut()
                .is_some_and(|group| group.remove_member(user_id))
        };
        if !removed {
            log::debug!("[Group] Ignoring member-left for unknown {}", user_id);
            return;
        }

        log::info!("[Group] {} left", user_id);
        self.emitter.emit_group(GroupEvent::MemberLeft {
            user_id: user_id.to_string(),
            timestamp: now_millis(),
        });
    }

    /// The owner closed the group.
    pub async fn on_group_disbanded(&self) {
        self.close(GroupCloseReason::Disbanded).await;
    }

    /// The relay removed this user from the group.
    pub async fn on_kicked(&self) {
        self.close(GroupCloseReason::Kicked).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_in_group(&self) -> bool {
        self.state.lock().group.is_some()
    }

    pub fn members(&self) -> Vec<GroupMember> {
        self.state
            .lock()
            .group
            .as_ref()
            .map(GroupSession::members)
            .unwrap_or_default()
    }

    /// Snapshot of the active group, or `None` outside a group.
    pub fn session(&self) -> Option<GroupSnapshot> {
        let group = self.state.lock().group.clone()?;
        Some(GroupSnapshot {
            members: group.members(),
            group_id: group.group_id,
            name: group.name,
            owner_id: group.owner_id,
            phase: self.playback.phase(),
            intent: self.playback.intent(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn enter(&self, info: &GroupInfo, members: Vec<GroupMember>) {
        let mut session = GroupSession::new(info);
        for member in members {
            session.add_member(member);
        }

        let previous = self.state.lock().group.replace(session);
        if let Some(previous) = previous {
            if previous.group_id != info.id {
                log::warn!(
                    "[Group] Entered {} while still in {}, dropping the old session",
                    info.id,
                    previous.group_id
                );
                self.emitter.emit_group(GroupEvent::Closed {
                    group_id: previous.group_id,
                    reason: GroupCloseReason::Left,
                    timestamp: now_millis(),
                });
            }
        }

        log::info!("[Group] Entered group {} ('{}')", info.id, info.name);
        self.emitter.emit_group(GroupEvent::Entered {
            group_id: info.id.clone(),
            name: info.name.clone(),
            owner_id: info.created_by.clone(),
            timestamp: now_millis(),
        });
    }

    /// Drops the session and returns playback to `Idle`.
    pub(crate) async fn close(&self, reason: GroupCloseReason) {
        let Some(session) = self.state.lock().group.take() else {
            log::debug!("[Group] No session to close ({:?})", reason);
            return;
        };

        log::info!("[Group] Session {} closed: {:?}", session.group_id, reason);
        self.playback.exit_group().await;
        self.emitter.emit_group(GroupEvent::Closed {
            group_id: session.group_id,
            reason,
            timestamp: now_millis(),
        });
    }
}
