//! Client bootstrap and dependency wiring.
//!
//! This module contains the composition root: the single place where the
//! services of one sync client are instantiated and wired together. Hosts
//! supply the platform pieces (audio engine, relay transport, local clock)
//! through [`ClientDeps`] and get back a [`SyncClient`] to drive.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::audio::AudioEngine;
use crate::clock::{ClockSync, LocalClock};
use crate::error::{AudioEngineError, TandemResult};
use crate::events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, GroupCloseReason, SessionEvent,
};
use crate::protocol::{GroupMember, InboundEvent, Song};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::scheduler::ScheduledActionQueue;
use crate::services::{GroupMembership, GroupSnapshot, PlaybackSessionState};
use crate::state::{ClientState, SyncConfig};
use crate::transport::RelayTransport;
use crate::utils::now_millis;

/// Platform pieces a client is built from.
pub struct ClientDeps {
    /// Who this client is in group rosters.
    pub local_user: GroupMember,
    pub engine: Arc<dyn AudioEngine>,
    pub transport: Arc<dyn RelayTransport>,
    pub clock: Arc<dyn LocalClock>,
    /// Extra consumer of UI events besides broadcast subscribers.
    pub external_emitter: Option<Arc<dyn EventEmitter>>,
}

/// One group-listening client with all of its services wired.
#[derive(Clone)]
pub struct SyncClient {
    /// Reference clock estimate.
    pub clock: Arc<ClockSync>,
    /// Timers for scheduled applies.
    pub scheduler: ScheduledActionQueue,
    /// Playback state machine.
    pub playback: Arc<PlaybackSessionState>,
    /// Group lifecycle and roster.
    pub membership: Arc<GroupMembership>,
    /// Fan-out of UI events.
    pub event_bridge: Arc<BroadcastEventBridge>,
    spawner: TokioSpawner,
    cancel_token: CancellationToken,
}

/// Bootstraps one client.
///
/// Wiring order follows the dependencies:
///
/// 1. Event bridge and shared client state
/// 2. Clock sync (needs the transport for probes)
/// 3. Scheduler (needs the clock)
/// 4. Playback session (needs all of the above)
/// 5. Group membership (drives the playback session)
///
/// # Errors
///
/// Returns [`TandemError::Configuration`](crate::TandemError::Configuration)
/// if `config` does not validate.
pub fn bootstrap_client(
    config: &SyncConfig,
    deps: ClientDeps,
    spawner: TokioSpawner,
) -> TandemResult<SyncClient> {
    config.validate()?;

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    if let Some(external) = deps.external_emitter {
        event_bridge.set_external_emitter(external);
    }
    let emitter = Arc::clone(&event_bridge) as Arc<dyn EventEmitter>;

    let state = Arc::new(Mutex::new(ClientState::default()));
    let cancel_token = CancellationToken::new();

    let clock = Arc::new(ClockSync::new(
        deps.clock,
        Arc::clone(&deps.transport),
        config,
    ));

    let scheduler = ScheduledActionQueue::new(Arc::clone(&clock), spawner.clone());

    let playback = Arc::new(PlaybackSessionState::new(
        Arc::clone(&state),
        deps.engine,
        Arc::clone(&deps.transport),
        Arc::clone(&clock),
        scheduler.clone(),
        Arc::clone(&emitter),
        config,
    ));

    let membership = Arc::new(GroupMembership::new(
        deps.local_user,
        state,
        deps.transport,
        Arc::clone(&clock),
        Arc::clone(&playback),
        emitter,
    ));

    Ok(SyncClient {
        clock,
        scheduler,
        playback,
        membership,
        event_bridge,
        spawner,
        cancel_token,
    })
}

impl SyncClient {
    /// Starts the clock probe loop.
    pub fn start(&self) {
        log::info!(
            "[Client] Starting for {}",
            self.membership.local_user().user_id
        );
        let clock = Arc::clone(&self.clock);
        self.spawner
            .spawn(clock.run_probe_loop(self.cancel_token.child_token()));
    }

    /// Feeds every event from `inbox` to [`dispatch`](Self::dispatch), in
    /// order, until the inbox closes or the client shuts down.
    pub fn attach_inbox(&self, mut inbox: mpsc::UnboundedReceiver<InboundEvent>) {
        let client = self.clone();
        let cancel = self.cancel_token.child_token();
        self.spawner.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = inbox.recv() => match event {
                        Some(event) => client.dispatch(event).await,
                        None => break,
                    },
                }
            }
            log::debug!("[Client] Inbox closed");
        });
    }

    /// Initiates graceful shutdown.
    ///
    /// Leaves the active group locally, stops the probe loop and cancels
    /// every scheduled action.
    pub async fn shutdown(&self) {
        log::info!("[Client] Beginning graceful shutdown...");

        self.membership.close(GroupCloseReason::Shutdown).await;
        self.cancel_token.cancel();

        let cancelled = self.scheduler.cancel_all();
        log::info!(
            "[Client] Shutdown complete ({} scheduled action(s) cancelled)",
            cancelled
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Routes one relay event to the owning service.
    pub async fn dispatch(&self, event: InboundEvent) {
        log::trace!("[Client] Dispatching {}", event.name());

        match event {
            InboundEvent::PlaybackUpdate(update) => self.playback.on_playback_update(update).await,
            InboundEvent::MusicUpdate(update) => self.playback.on_music_update(update).await,
            InboundEvent::GroupCreated(info) => self.membership.on_group_created(info).await,
            InboundEvent::GroupJoined(joined) => self.membership.on_group_joined(joined).await,
            InboundEvent::MemberJoined(member) => self.membership.on_member_joined(member),
            InboundEvent::MemberLeft(left) => self.membership.on_member_left(&left.user_id),
            InboundEvent::GroupDisbanded => self.membership.on_group_disbanded().await,
            InboundEvent::Kicked => self.membership.on_kicked().await,
            InboundEvent::TimeSyncResponse(response) => {
                self.clock
                    .on_probe_response(response.server_time, response.client_time);
            }
            InboundEvent::Error(error) => {
                log::warn!("[Client] Relay error: {}", error.message);
                self.event_bridge.emit_session(SessionEvent::Error {
                    code: "relay_error".to_string(),
                    message: error.message,
                    timestamp: now_millis(),
                });
            }
        }
    }

    /// Decodes a raw `(name, payload)` pair and dispatches it.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for unknown names or malformed payloads;
    /// the event is dropped.
    pub async fn dispatch_raw(&self, name: &str, payload: Value) -> TandemResult<()> {
        let event = InboundEvent::decode(name, payload).map_err(|e| {
            log::warn!("[Client] Dropping inbound {}: {}", name, e);
            e
        })?;
        self.dispatch(event).await;
        Ok(())
    }

    /// Engine callback: the track reached its natural end.
    pub fn on_queue_ended(&self) {
        self.playback.on_queue_ended();
    }

    /// Engine callback: an asynchronous player failure.
    pub fn on_audio_error(&self, err: AudioEngineError) {
        self.playback.on_engine_error(err);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local actions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn toggle_play(&self) -> TandemResult<()> {
        self.playback.toggle_play().await
    }

    pub fn seek(&self, target_secs: f64) -> TandemResult<()> {
        self.playback.seek(target_secs)
    }

    pub async fn change_track(&self, song: Song) -> TandemResult<()> {
        self.playback.change_track(song).await
    }

    pub fn create_group(&self, name: &str) -> TandemResult<()> {
        self.membership.create_group(name)
    }

    pub fn join_group(&self, group_id: &str) -> TandemResult<()> {
        self.membership.join_group(group_id)
    }

    pub async fn leave_group(&self) -> TandemResult<()> {
        self.membership.leave_group().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Active group with its roster, phase and intent.
    pub fn snapshot(&self) -> Option<GroupSnapshot> {
        self.membership.session()
    }

    /// Subscribes to UI events.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.event_bridge.subscribe()
    }

    pub fn user_id(&self) -> &str {
        &self.membership.local_user().user_id
    }
}
