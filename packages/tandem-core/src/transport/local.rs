//! In-process relay for tests and the simulator.
//!
//! [`LocalRelay`] plays the part of the real relay server: it owns the
//! reference clock, answers time-sync probes, keeps one room per group with
//! the last playback snapshot, and fans playback events out to the other
//! members stamped with a per-group sequence number.
//!
//! Each direction of every message is delayed by `delivery_delay`, so a
//! probe sees a round trip of twice that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::clock::LocalClock;
use crate::error::{TransportError, TransportResult};
use crate::protocol::{
    GroupInfo, GroupJoined, GroupMember, InboundEvent, MemberLeft, MusicChangeCommand,
    MusicUpdate, OutboundEvent, PlaybackSnapshot, PlaybackUpdate, RelayErrorPayload,
    TimeSyncResponse,
};
use crate::runtime::{TaskSpawner, TokioSpawner};

struct PeerLink {
    member: GroupMember,
    inbox: mpsc::UnboundedSender<InboundEvent>,
    group_id: Option<String>,
}

struct GroupRoom {
    info: GroupInfo,
    members: Vec<GroupMember>,
    snapshot: PlaybackSnapshot,
    seq: u64,
}

impl GroupRoom {
    fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    fn others(&self, user_id: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.user_id != user_id)
            .map(|m| m.user_id.clone())
            .collect()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.snapshot.seq = Some(self.seq);
        self.seq
    }
}

struct RelayInner {
    clock: Arc<dyn LocalClock>,
    delivery_delay: Duration,
    spawner: TokioSpawner,
    peers: DashMap<String, PeerLink>,
    rooms: DashMap<String, GroupRoom>,
    next_group: AtomicU64,
}

/// An in-process stand-in for the relay server.
#[derive(Clone)]
pub struct LocalRelay {
    inner: Arc<RelayInner>,
}

impl LocalRelay {
    /// Creates a relay whose reference clock is `clock`.
    pub fn new(clock: Arc<dyn LocalClock>, delivery_delay: Duration, spawner: TokioSpawner) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                clock,
                delivery_delay,
                spawner,
                peers: DashMap::new(),
                rooms: DashMap::new(),
                next_group: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a peer and returns its send half and inbox.
    ///
    /// Connecting an already connected user replaces the old link.
    pub fn connect(
        &self,
        member: GroupMember,
    ) -> (RelayConnection, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let user_id = member.user_id.clone();
        log::info!("[Relay] {} connected", user_id);

        if let Some(old) = self.inner.peers.insert(
            user_id.clone(),
            PeerLink {
                member,
                inbox: tx,
                group_id: None,
            },
        ) {
            if let Some(group_id) = old.group_id {
                self.inner.remove_from_group(&user_id, &group_id, Departure::Left);
            }
        }

        (
            RelayConnection {
                user_id,
                relay: Arc::clone(&self.inner),
            },
            rx,
        )
    }

    /// Drops a peer, leaving its group as if it had sent `leave-group`.
    pub fn disconnect(&self, user_id: &str) {
        if let Some((_, link)) = self.inner.peers.remove(user_id) {
            log::info!("[Relay] {} disconnected", user_id);
            if let Some(group_id) = link.group_id {
                self.inner.remove_from_group(user_id, &group_id, Departure::Left);
            }
        }
    }

    /// Removes a user from their group and tells them with `kicked`.
    ///
    /// Returns `false` if the user was not in a group.
    pub fn kick(&self, user_id: &str) -> bool {
        let group_id = self
            .inner
            .peers
            .get(user_id)
            .and_then(|link| link.group_id.clone());
        match group_id {
            Some(group_id) => {
                log::info!("[Relay] Kicking {} from {}", user_id, group_id);
                self.inner.remove_from_group(user_id, &group_id, Departure::Kicked);
                true
            }
            None => false,
        }
    }

    /// Last playback snapshot recorded for a group.
    pub fn snapshot(&self, group_id: &str) -> Option<PlaybackSnapshot> {
        self.inner.rooms.get(group_id).map(|room| room.snapshot.clone())
    }

    /// Ids of the open groups.
    pub fn group_ids(&self) -> Vec<String> {
        self.inner.rooms.iter().map(|r| r.key().clone()).collect()
    }

    /// Current time on the reference clock.
    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }
}

/// One peer's send half of a [`LocalRelay`].
pub struct RelayConnection {
    user_id: String,
    relay: Arc<RelayInner>,
}

impl RelayConnection {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl super::RelayTransport for RelayConnection {
    fn emit(&self, event: OutboundEvent) -> TransportResult<()> {
        if !self.relay.peers.contains_key(&self.user_id) {
            return Err(TransportError::NotConnected);
        }

        let relay = Arc::clone(&self.relay);
        let sender = self.user_id.clone();
        let delay = relay.delivery_delay;
        self.relay.spawner.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            relay.handle(&sender, event);
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Left,
    Kicked,
}

impl RelayInner {
    fn handle(self: &Arc<Self>, sender: &str, event: OutboundEvent) {
        log::trace!("[Relay] {} from {}", event.name(), sender);

        match event {
            OutboundEvent::TimeSyncRequest(request) => {
                let response = TimeSyncResponse {
                    client_time: request.client_time,
                    server_time: self.clock.now_ms(),
                };
                self.deliver(sender, InboundEvent::TimeSyncResponse(response));
            }
            OutboundEvent::CreateMusicGroup(request) => self.create_group(sender, request.name),
            OutboundEvent::JoinMusicGroup(request) => self.join_group(sender, &request.group_id),
            OutboundEvent::LeaveGroup(request) => {
                self.remove_from_group(sender, &request.group_id, Departure::Left);
            }
            OutboundEvent::MusicPlayback(cmd) => self.fan_out_playback(
                sender,
                &cmd.group_id,
                cmd.is_playing,
                cmd.current_time,
                cmd.scheduled_time,
            ),
            OutboundEvent::MusicSeek(cmd) => self.fan_out_playback(
                sender,
                &cmd.group_id,
                cmd.is_playing,
                cmd.current_time,
                cmd.scheduled_time,
            ),
            OutboundEvent::MusicChange(cmd) => self.fan_out_change(sender, cmd),
        }
    }

    fn create_group(self: &Arc<Self>, sender: &str, name: String) {
        let Some(member) = self.peers.get(sender).map(|link| link.member.clone()) else {
            return;
        };
        self.leave_current(sender);

        let group_id = format!("group-{}", self.next_group.fetch_add(1, Ordering::Relaxed));
        let info = GroupInfo {
            id: group_id.clone(),
            name,
            created_by: sender.to_string(),
        };
        self.rooms.insert(
            group_id.clone(),
            GroupRoom {
                info: info.clone(),
                members: vec![member],
                snapshot: PlaybackSnapshot {
                    song: None,
                    current_time: 0.0,
                    is_playing: false,
                    last_update_reference_time: self.clock.now_ms(),
                    seq: None,
                },
                seq: 0,
            },
        );
        self.set_peer_group(sender, Some(group_id.clone()));

        log::info!("[Relay] {} created {} ('{}')", sender, group_id, info.name);
        self.deliver(sender, InboundEvent::GroupCreated(info));
    }

    fn join_group(self: &Arc<Self>, sender: &str, group_id: &str) {
        let Some(member) = self.peers.get(sender).map(|link| link.member.clone()) else {
            return;
        };
        if !self.rooms.contains_key(group_id) {
            self.reject(sender, format!("Group {} not found", group_id));
            return;
        }
        let current = self.peers.get(sender).and_then(|link| link.group_id.clone());
        if current.as_deref() != Some(group_id) {
            self.leave_current(sender);
        }

        let (joined, others) = {
            let Some(mut room) = self.rooms.get_mut(group_id) else {
                return;
            };
            let others = room.others(sender);
            if !room.has_member(sender) {
                room.members.push(member.clone());
            }
            let joined = GroupJoined {
                group: room.info.clone(),
                members: room.members.clone(),
                playback_state: Some(room.snapshot.clone()),
            };
            (joined, others)
        };
        self.set_peer_group(sender, Some(group_id.to_string()));

        log::info!("[Relay] {} joined {}", sender, group_id);
        self.deliver(sender, InboundEvent::GroupJoined(joined));
        for peer in others {
            self.deliver(&peer, InboundEvent::MemberJoined(member.clone()));
        }
    }

    fn leave_current(self: &Arc<Self>, user_id: &str) {
        let current = self.peers.get(user_id).and_then(|link| link.group_id.clone());
        if let Some(group_id) = current {
            self.remove_from_group(user_id, &group_id, Departure::Left);
        }
    }

    /// Removes `user_id` from a room. The owner leaving closes the room.
    fn remove_from_group(self: &Arc<Self>, user_id: &str, group_id: &str, departure: Departure) {
        let (was_owner, others) = {
            let Some(mut room) = self.rooms.get_mut(group_id) else {
                return;
            };
            if !room.has_member(user_id) {
                return;
            }
            room.members.retain(|m| m.user_id != user_id);
            (room.info.created_by == user_id, room.others(user_id))
        };
        self.set_peer_group(user_id, None);

        if departure == Departure::Kicked {
            self.deliver(user_id, InboundEvent::Kicked);
        }

        if was_owner && departure == Departure::Left {
            log::info!("[Relay] Owner {} left, disbanding {}", user_id, group_id);
            self.rooms.remove(group_id);
            for peer in others {
                self.set_peer_group(&peer, None);
                self.deliver(&peer, InboundEvent::GroupDisbanded);
            }
            return;
        }

        for peer in others {
            self.deliver(
                &peer,
                InboundEvent::MemberLeft(MemberLeft {
                    user_id: user_id.to_string(),
                }),
            );
        }
    }

    fn fan_out_playback(
        self: &Arc<Self>,
        sender: &str,
        group_id: &str,
        is_playing: bool,
        current_time: f64,
        scheduled_time: i64,
    ) {
        let stamped = match self.rooms.get_mut(group_id) {
            Some(mut room) if room.has_member(sender) => {
                room.snapshot.current_time = current_time;
                room.snapshot.is_playing = is_playing;
                room.snapshot.last_update_reference_time = scheduled_time;
                Some((room.next_seq(), room.others(sender)))
            }
            _ => None,
        };
        let Some((seq, others)) = stamped else {
            self.reject(sender, format!("Not a member of {}", group_id));
            return;
        };

        for peer in others {
            self.deliver(
                &peer,
                InboundEvent::PlaybackUpdate(PlaybackUpdate {
                    is_playing,
                    current_time,
                    scheduled_time,
                    seq: Some(seq),
                }),
            );
        }
    }

    fn fan_out_change(self: &Arc<Self>, sender: &str, cmd: MusicChangeCommand) {
        let stamped = match self.rooms.get_mut(&cmd.group_id) {
            Some(mut room) if room.has_member(sender) => {
                room.snapshot.song = Some(cmd.song.clone());
                room.snapshot.current_time = cmd.current_time;
                room.snapshot.is_playing = true;
                room.snapshot.last_update_reference_time = cmd.scheduled_time;
                Some((room.next_seq(), room.others(sender)))
            }
            _ => None,
        };
        let Some((seq, others)) = stamped else {
            self.reject(sender, format!("Not a member of {}", cmd.group_id));
            return;
        };

        for peer in others {
            self.deliver(
                &peer,
                InboundEvent::MusicUpdate(MusicUpdate {
                    song: cmd.song.clone(),
                    current_time: cmd.current_time,
                    scheduled_time: cmd.scheduled_time,
                    is_playing: true,
                    seq: Some(seq),
                }),
            );
        }
    }

    fn set_peer_group(&self, user_id: &str, group_id: Option<String>) {
        if let Some(mut link) = self.peers.get_mut(user_id) {
            link.group_id = group_id;
        }
    }

    fn reject(self: &Arc<Self>, user_id: &str, message: String) {
        log::debug!("[Relay] Rejecting request from {}: {}", user_id, message);
        self.deliver(user_id, InboundEvent::Error(RelayErrorPayload { message }));
    }

    /// Sends `event` to a peer after the delivery delay.
    fn deliver(self: &Arc<Self>, user_id: &str, event: InboundEvent) {
        let Some(inbox) = self.peers.get(user_id).map(|link| link.inbox.clone()) else {
            return;
        };
        let delay = self.delivery_delay;
        self.spawner.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // A closed inbox means the peer went away; nothing to do.
            let _ = inbox.send(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::protocol::{
        CreateGroupRequest, JoinGroupRequest, LeaveGroupRequest, PlaybackCommand, TimeSyncRequest,
    };
    use crate::test_support::{sleep_ms, song};
    use crate::transport::RelayTransport;

    fn relay(delay_ms: u64) -> LocalRelay {
        LocalRelay::new(
            Arc::new(MonotonicClock::starting_at(50_000)),
            Duration::from_millis(delay_ms),
            TokioSpawner::current(),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Owner `a` in a fresh group with `b` joined; inboxes drained.
    async fn room_of_two(
        relay: &LocalRelay,
    ) -> (
        (RelayConnection, mpsc::UnboundedReceiver<InboundEvent>),
        (RelayConnection, mpsc::UnboundedReceiver<InboundEvent>),
        String,
    ) {
        let (a, mut a_rx) = relay.connect(GroupMember::new("a", "Ann"));
        let (b, mut b_rx) = relay.connect(GroupMember::new("b", "Bo"));
        a.emit(OutboundEvent::CreateMusicGroup(CreateGroupRequest {
            name: "room".into(),
        }))
        .unwrap();
        sleep_ms(50).await;
        let group_id = relay.group_ids().pop().unwrap();
        b.emit(OutboundEvent::JoinMusicGroup(JoinGroupRequest {
            group_id: group_id.clone(),
        }))
        .unwrap();
        sleep_ms(50).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        ((a, a_rx), (b, b_rx), group_id)
    }

    #[tokio::test(start_paused = true)]
    async fn time_sync_is_stamped_on_arrival() {
        let relay = relay(20);
        let (conn, mut rx) = relay.connect(GroupMember::new("a", "Ann"));

        conn.emit(OutboundEvent::TimeSyncRequest(TimeSyncRequest { client_time: 7 }))
            .unwrap();
        sleep_ms(39).await;
        assert!(drain(&mut rx).is_empty());

        sleep_ms(2).await;
        assert_eq!(
            drain(&mut rx),
            vec![InboundEvent::TimeSyncResponse(TimeSyncResponse {
                client_time: 7,
                server_time: 50_020,
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn playback_fans_out_to_others_with_sequence() {
        let relay = relay(0);
        let ((a, mut a_rx), (_b, mut b_rx), group_id) = room_of_two(&relay).await;

        for is_playing in [true, false] {
            a.emit(OutboundEvent::MusicPlayback(PlaybackCommand {
                group_id: group_id.clone(),
                is_playing,
                current_time: 4.0,
                scheduled_time: 60_000,
            }))
            .unwrap();
        }
        sleep_ms(1).await;

        let seqs: Vec<_> = drain(&mut b_rx)
            .into_iter()
            .map(|e| match e {
                InboundEvent::PlaybackUpdate(update) => update.seq,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(seqs, vec![Some(1), Some(2)]);
        assert!(drain(&mut a_rx).is_empty(), "sender got its own echo");

        let snapshot = relay.snapshot(&group_id).unwrap();
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.last_update_reference_time, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn joiner_gets_snapshot_and_others_see_member() {
        let relay = relay(0);
        let ((a, mut a_rx), _, group_id) = room_of_two(&relay).await;
        a.emit(OutboundEvent::MusicChange(MusicChangeCommand {
            group_id: group_id.clone(),
            song: song("s1"),
            current_time: 0.0,
            scheduled_time: 50_500,
        }))
        .unwrap();
        sleep_ms(1).await;

        let (c, mut c_rx) = relay.connect(GroupMember::new("c", "Cy"));
        c.emit(OutboundEvent::JoinMusicGroup(JoinGroupRequest {
            group_id: group_id.clone(),
        }))
        .unwrap();
        sleep_ms(1).await;

        match drain(&mut c_rx).as_slice() {
            [InboundEvent::GroupJoined(joined)] => {
                assert_eq!(joined.members.len(), 3);
                let state = joined.playback_state.as_ref().unwrap();
                assert_eq!(state.song.as_ref().unwrap().id, "s1");
                assert_eq!(state.seq, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            drain(&mut a_rx),
            vec![InboundEvent::MemberJoined(GroupMember::new("c", "Cy"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn owner_leaving_disbands_group() {
        let relay = relay(0);
        let ((a, _), (_b, mut b_rx), group_id) = room_of_two(&relay).await;

        a.emit(OutboundEvent::LeaveGroup(LeaveGroupRequest {
            group_id: group_id.clone(),
        }))
        .unwrap();
        sleep_ms(1).await;

        assert_eq!(drain(&mut b_rx), vec![InboundEvent::GroupDisbanded]);
        assert!(relay.snapshot(&group_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn kicked_member_is_told_and_others_see_leave() {
        let relay = relay(0);
        let ((_a, mut a_rx), (_b, mut b_rx), _) = room_of_two(&relay).await;

        assert!(relay.kick("b"));
        sleep_ms(1).await;

        assert_eq!(drain(&mut b_rx), vec![InboundEvent::Kicked]);
        assert_eq!(
            drain(&mut a_rx),
            vec![InboundEvent::MemberLeft(MemberLeft {
                user_id: "b".into()
            })]
        );
        assert!(!relay.kick("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_group_is_rejected() {
        let relay = relay(0);
        let (conn, mut rx) = relay.connect(GroupMember::new("a", "Ann"));

        conn.emit(OutboundEvent::JoinMusicGroup(JoinGroupRequest {
            group_id: "nope".into(),
        }))
        .unwrap();
        sleep_ms(1).await;

        assert!(matches!(drain(&mut rx).as_slice(), [InboundEvent::Error(_)]));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_peer_cannot_send() {
        let relay = relay(0);
        let (conn, _rx) = relay.connect(GroupMember::new("a", "Ann"));
        relay.disconnect("a");

        let err = conn
            .emit(OutboundEvent::TimeSyncRequest(TimeSyncRequest { client_time: 0 }))
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
