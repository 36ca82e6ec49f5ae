//! Playback state machine for group listening.
//!
//! [`PlaybackSessionState`] turns local user actions and inbound relay
//! events into a consistent sequence of audio engine calls, all converging
//! on one [`PlaybackIntent`].
//!
//! # Phases
//!
//! `Idle` (no group) → `Loading` (track change or join sync in flight) →
//! `Ready` (intent established, engine matches or is converging) → back to
//! `Loading` on every track change → `Idle` on leave/disband/kick.
//!
//! # Scheduling
//!
//! Every change is applied at a reference-clock instant. Local actions pick
//! `now + lookahead`, emit that instant to the group, and self-schedule the
//! same apply, so the initiator flips together with its peers instead of
//! running ahead. Inbound events carry their own instant.
//!
//! There is one apply slot: arming a new apply cancels the pending one, and
//! a generation counter makes any apply that raced its cancellation a no-op.

use std::sync::Arc;

use serde::Serialize;

use crate::audio::AudioEngine;
use crate::clock::ClockSync;
use crate::error::{AudioEngineError, ErrorCode, TandemError, TandemResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::protocol::{
    MusicChangeCommand, MusicUpdate, OutboundEvent, PlaybackCommand, PlaybackUpdate, SeekCommand,
    Song,
};
use crate::scheduler::{ActionHandle, ScheduledActionQueue};
use crate::state::{SharedClientState, SyncConfig};
use crate::transport::RelayTransport;
use crate::utils::{ms_to_secs, now_millis};

/// Phase of the playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Not in a group.
    #[default]
    Idle,
    /// A track is loading or the join sync has not converged yet.
    Loading,
    /// The engine matches the intent or is converging on it.
    Ready,
}

/// Whether an intent has been applied yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Initiated locally; shown to the user before its scheduled apply.
    Tentative,
    /// Applied at its scheduled time, or received from the group.
    Confirmed,
}

/// How playback should look, as of a reference instant.
///
/// Replaced wholesale on every accepted change, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackIntent {
    pub track: Song,
    /// Track position (seconds) at `reference_ms`.
    pub position_secs: f64,
    /// Reference-clock instant the position applies to.
    pub reference_ms: i64,
    pub is_playing: bool,
    pub status: IntentStatus,
}

impl PlaybackIntent {
    /// Position every peer should be at, at reference time `now_ms`.
    ///
    /// Frozen while paused and before `reference_ms` is reached.
    pub fn expected_position(&self, now_ms: i64) -> f64 {
        if self.is_playing {
            self.position_secs + ms_to_secs((now_ms - self.reference_ms).max(0))
        } else {
            self.position_secs
        }
    }

    fn confirmed(self) -> Self {
        Self {
            status: IntentStatus::Confirmed,
            ..self
        }
    }
}

/// What a scheduled apply does when it fires.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ApplyStep {
    /// Play or pause in place.
    Transport { is_playing: bool },
    /// Move the play head, keeping the play state.
    Seek { position_secs: f64 },
    /// Seek to the intent's expected position and play if it says so.
    Start,
    /// Pause and rewind after a natural end of track.
    Stop,
}

impl ApplyStep {
    fn label(self) -> &'static str {
        match self {
            Self::Transport { .. } => "apply-transport",
            Self::Seek { .. } => "apply-seek",
            Self::Start => "apply-start",
            Self::Stop => "apply-stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EngineOp {
    Play,
    Pause,
    SeekTo(f64),
}

/// Playback fields of [`ClientState`](crate::state::ClientState).
#[derive(Debug, Default)]
pub(crate) struct PlaybackCore {
    phase: SessionPhase,
    intent: Option<PlaybackIntent>,
    /// Track id the engine finished loading.
    loaded_track: Option<String>,
    /// Whether the loaded track has been brought to the intent once.
    started: bool,
    pending_apply: Option<ActionHandle>,
    apply_generation: u64,
    last_applied_seq: Option<u64>,
    /// Set once the stop for a natural end has been broadcast.
    end_latched: bool,
}

impl PlaybackCore {
    /// Records `seq` if it is newer than the last applied one.
    ///
    /// Events without a sequence number are always accepted.
    fn accept_seq(&mut self, seq: Option<u64>) -> bool {
        match (seq, self.last_applied_seq) {
            (Some(seq), Some(last)) if seq <= last => false,
            (Some(seq), _) => {
                self.last_applied_seq = Some(seq);
                true
            }
            (None, _) => true,
        }
    }

    /// Whether the engine has the intent's track loaded.
    fn intent_loaded(&self) -> bool {
        match (&self.intent, &self.loaded_track) {
            (Some(intent), Some(loaded)) => intent.track.id == *loaded,
            _ => false,
        }
    }
}

/// Side effects collected under the state lock and flushed after it.
#[derive(Default)]
struct Effects {
    events: Vec<SessionEvent>,
    outbound: Option<OutboundEvent>,
}

/// The playback state machine of one client.
pub struct PlaybackSessionState {
    state: SharedClientState,
    engine: Arc<dyn AudioEngine>,
    transport: Arc<dyn RelayTransport>,
    clock: Arc<ClockSync>,
    scheduler: ScheduledActionQueue,
    emitter: Arc<dyn EventEmitter>,
    lookahead_ms: i64,
    queue_ended_epsilon_ms: i64,
}

impl PlaybackSessionState {
    pub fn new(
        state: SharedClientState,
        engine: Arc<dyn AudioEngine>,
        transport: Arc<dyn RelayTransport>,
        clock: Arc<ClockSync>,
        scheduler: ScheduledActionQueue,
        emitter: Arc<dyn EventEmitter>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            state,
            engine,
            transport,
            clock,
            scheduler,
            emitter,
            lookahead_ms: config.lookahead_ms as i64,
            queue_ended_epsilon_ms: config.queue_ended_epsilon_ms as i64,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().playback.phase
    }

    pub fn intent(&self) -> Option<PlaybackIntent> {
        self.state.lock().playback.intent.clone()
    }

    /// Where playback should be right now, if a track is set.
    pub fn expected_position(&self) -> Option<f64> {
        let now = self.clock.now();
        self.state
            .lock()
            .playback
            .intent
            .as_ref()
            .map(|intent| intent.expected_position(now))
    }

    /// Whether an apply is armed and has not fired.
    pub fn has_pending_apply(&self) -> bool {
        self.state.lock().playback.pending_apply.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Flips play/pause for the whole group at `now + lookahead`.
    ///
    /// A no-op when no track is set, or when asked to play a track the
    /// engine has not loaded.
    pub async fn toggle_play(self: &Arc<Self>) -> TandemResult<()> {
        let position = self.read_position().await;
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            let group_id = state
                .group_id()
                .map(str::to_owned)
                .ok_or(TandemError::NotInGroup)?;
            let core = &mut state.playback;

            let Some(current) = core.intent.clone() else {
                log::info!("[Session] Ignoring play toggle: no track selected");
                return Ok(());
            };
            let is_playing = !current.is_playing;
            if is_playing && !core.intent_loaded() {
                log::info!(
                    "[Session] Ignoring play: track {} is not loaded",
                    current.track.id
                );
                return Ok(());
            }

            let now = self.clock.now();
            let scheduled = now + self.lookahead_ms;
            let position = position.unwrap_or_else(|| current.expected_position(now));

            log::info!(
                "[Session] Local {} at {:.2}s, scheduled for ref {}",
                if is_playing { "play" } else { "pause" },
                position,
                scheduled
            );

            self.replace_intent(
                core,
                &mut fx,
                PlaybackIntent {
                    track: current.track,
                    position_secs: position,
                    reference_ms: scheduled,
                    is_playing,
                    status: IntentStatus::Tentative,
                },
            );
            self.arm_apply(core, scheduled, ApplyStep::Transport { is_playing });
            fx.outbound = Some(OutboundEvent::MusicPlayback(PlaybackCommand {
                group_id,
                is_playing,
                current_time: position,
                scheduled_time: scheduled,
            }));
        }
        self.flush(fx);
        Ok(())
    }

    /// Moves the whole group to `target_secs` at `now + lookahead`.
    ///
    /// Clamping to the track length is left to the engine.
    pub fn seek(self: &Arc<Self>, target_secs: f64) -> TandemResult<()> {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            let group_id = state
                .group_id()
                .map(str::to_owned)
                .ok_or(TandemError::NotInGroup)?;
            let core = &mut state.playback;

            let Some(current) = core.intent.clone() else {
                log::info!("[Session] Ignoring seek: no track selected");
                return Ok(());
            };

            let scheduled = self.clock.now() + self.lookahead_ms;
            let is_playing = current.is_playing;

            log::info!(
                "[Session] Local seek to {:.2}s, scheduled for ref {}",
                target_secs,
                scheduled
            );

            self.replace_intent(
                core,
                &mut fx,
                PlaybackIntent {
                    track: current.track,
                    position_secs: target_secs,
                    reference_ms: scheduled,
                    is_playing,
                    status: IntentStatus::Tentative,
                },
            );
            self.arm_apply(
                core,
                scheduled,
                ApplyStep::Seek {
                    position_secs: target_secs,
                },
            );
            fx.outbound = Some(OutboundEvent::MusicSeek(SeekCommand {
                group_id,
                current_time: target_secs,
                scheduled_time: scheduled,
                is_playing,
            }));
        }
        self.flush(fx);
        Ok(())
    }

    /// Switches the group to `song`, starting from zero at `now + lookahead`.
    ///
    /// The intent is updated immediately as `Tentative` so the UI shows the
    /// new track before the group has switched.
    pub async fn change_track(self: &Arc<Self>, song: Song) -> TandemResult<()> {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            let group_id = state
                .group_id()
                .map(str::to_owned)
                .ok_or(TandemError::NotInGroup)?;
            let core = &mut state.playback;

            let scheduled = self.clock.now() + self.lookahead_ms;

            log::info!(
                "[Session] Local track change to {} ({}), scheduled for ref {}",
                song.id,
                song.title,
                scheduled
            );

            core.loaded_track = None;
            core.started = false;
            self.set_phase(core, &mut fx, SessionPhase::Loading);
            self.replace_intent(
                core,
                &mut fx,
                PlaybackIntent {
                    track: song.clone(),
                    position_secs: 0.0,
                    reference_ms: scheduled,
                    is_playing: true,
                    status: IntentStatus::Tentative,
                },
            );
            self.arm_apply(core, scheduled, ApplyStep::Start);
            fx.outbound = Some(OutboundEvent::MusicChange(MusicChangeCommand {
                group_id,
                song: song.clone(),
                current_time: 0.0,
                scheduled_time: scheduled,
            }));
        }
        self.flush(fx);
        self.prepare_track(&song).await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound events
    // ─────────────────────────────────────────────────────────────────────────

    /// Applies a peer's play/pause/seek.
    ///
    /// Seeks immediately so the play head is in place, then flips play state
    /// at the event's scheduled time (at once if that time has passed).
    pub async fn on_playback_update(self: &Arc<Self>, update: PlaybackUpdate) {
        let mut fx = Effects::default();
        let seek_now = {
            let mut state = self.state.lock();
            if state.group.is_none() {
                log::debug!("[Session] Ignoring playback-update outside a group");
                return;
            }
            let core = &mut state.playback;

            let Some(current) = core.intent.clone() else {
                log::debug!("[Session] Ignoring playback-update: no track selected");
                return;
            };
            if !core.accept_seq(update.seq) {
                log::debug!(
                    "[Session] Dropping stale playback-update (seq {:?}, last {:?})",
                    update.seq,
                    core.last_applied_seq
                );
                return;
            }

            log::info!(
                "[Session] Peer {} at {:.2}s, scheduled for ref {} (now {})",
                if update.is_playing { "play" } else { "pause" },
                update.current_time,
                update.scheduled_time,
                self.clock.now()
            );

            self.replace_intent(
                core,
                &mut fx,
                PlaybackIntent {
                    track: current.track,
                    position_secs: update.current_time,
                    reference_ms: update.scheduled_time,
                    is_playing: update.is_playing,
                    status: IntentStatus::Confirmed,
                },
            );
            self.arm_apply(
                core,
                update.scheduled_time,
                ApplyStep::Transport {
                    is_playing: update.is_playing,
                },
            );
            core.intent_loaded()
        };
        self.flush(fx);

        if seek_now {
            self.run_engine_ops(&[EngineOp::SeekTo(update.current_time)])
                .await;
        }
    }

    /// Applies a peer's track change.
    ///
    /// Moves to `Loading`, loads the track, and seeks/plays at the scheduled
    /// time. A failed load stays in `Loading` and surfaces an error; retrying
    /// is the engine's business.
    pub async fn on_music_update(self: &Arc<Self>, update: MusicUpdate) {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            if state.group.is_none() {
                log::debug!("[Session] Ignoring music-update outside a group");
                return;
            }
            let core = &mut state.playback;

            if !core.accept_seq(update.seq) {
                log::debug!(
                    "[Session] Dropping stale music-update (seq {:?}, last {:?})",
                    update.seq,
                    core.last_applied_seq
                );
                return;
            }

            log::info!(
                "[Session] Peer track change to {} at {:.2}s, scheduled for ref {}",
                update.song.id,
                update.current_time,
                update.scheduled_time
            );

            core.loaded_track = None;
            core.started = false;
            self.set_phase(core, &mut fx, SessionPhase::Loading);
            self.replace_intent(
                core,
                &mut fx,
                PlaybackIntent {
                    track: update.song.clone(),
                    position_secs: update.current_time,
                    reference_ms: update.scheduled_time,
                    is_playing: update.is_playing,
                    status: IntentStatus::Confirmed,
                },
            );
            self.arm_apply(core, update.scheduled_time, ApplyStep::Start);
        }
        self.flush(fx);
        self.prepare_track(&update.song).await;
    }

    /// Handles the engine reaching the natural end of the track.
    ///
    /// Broadcasts a stop at position zero so no peer keeps looping alone.
    /// Repeated end signals for the same track are ignored until the intent
    /// changes again.
    pub fn on_queue_ended(self: &Arc<Self>) {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            let Some(group_id) = state.group_id().map(str::to_owned) else {
                return;
            };
            let core = &mut state.playback;

            if core.end_latched {
                log::debug!("[Session] Ignoring repeated end-of-track signal");
                return;
            }
            let Some(current) = core.intent.clone() else {
                return;
            };

            let scheduled = self.clock.now() + self.queue_ended_epsilon_ms;
            log::info!(
                "[Session] Track {} ended, broadcasting stop for ref {}",
                current.track.id,
                scheduled
            );

            self.replace_intent(
                core,
                &mut fx,
                PlaybackIntent {
                    track: current.track,
                    position_secs: 0.0,
                    reference_ms: scheduled,
                    is_playing: false,
                    status: IntentStatus::Confirmed,
                },
            );
            core.end_latched = true;
            self.arm_apply(core, scheduled, ApplyStep::Stop);
            fx.outbound = Some(OutboundEvent::MusicPlayback(PlaybackCommand {
                group_id,
                is_playing: false,
                current_time: 0.0,
                scheduled_time: scheduled,
            }));
        }
        self.flush(fx);
    }

    /// Surfaces an asynchronous engine failure without touching the intent.
    pub fn on_engine_error(&self, err: AudioEngineError) {
        self.report_audio_error(err);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Group lifecycle (driven by GroupMembership)
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts a fresh state machine for a newly entered group with no track.
    pub(crate) fn enter_group(&self, seq: Option<u64>) {
        let mut fx = Effects::default();
        {
            let mut state = self.state.lock();
            let core = &mut state.playback;
            self.clear(core, &mut fx);
            core.last_applied_seq = seq;
            self.set_phase(core, &mut fx, SessionPhase::Ready);
        }
        self.flush(fx);
    }

    /// Resets to `Idle` and stops the engine.
    pub(crate) async fn exit_group(&self) {
        let mut fx = Effects::default();
        let had_track = {
            let mut state = self.state.lock();
            let core = &mut state.playback;
            // A load may still be in flight, so any intent means the engine
            // may hold a track.
            let had_track = core.intent.is_some() || core.loaded_track.is_some();
            self.clear(core, &mut fx);
            self.set_phase(core, &mut fx, SessionPhase::Idle);
            had_track
        };
        self.flush(fx);

        if had_track {
            if let Err(e) = self.engine.reset().await {
                self.report_audio_error(e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Resets and loads `song`, then converges if its start already fired.
    async fn prepare_track(self: &Arc<Self>, song: &Song) {
        if let Err(e) = self.engine.reset().await {
            self.report_audio_error(e);
        }
        if let Err(e) = self.engine.load(song).await {
            log::warn!("[Session] Track {} failed to load, staying in Loading", song.id);
            self.report_audio_error(e);
            return;
        }

        let mut fx = Effects::default();
        let ops = {
            let mut state = self.state.lock();
            let core = &mut state.playback;

            match &core.intent {
                Some(intent) if intent.track.id == song.id => {
                    core.loaded_track = Some(song.id.clone());
                    if core.pending_apply.is_some() {
                        // The armed apply converges when it fires.
                        Some(Vec::new())
                    } else {
                        log::info!(
                            "[Session] Track {} loaded after its start time, catching up",
                            song.id
                        );
                        Some(self.converge_ops(core, &mut fx))
                    }
                }
                Some(_) => {
                    log::debug!("[Session] Load of {} superseded, ignoring", song.id);
                    return;
                }
                // Left the group while loading.
                None => None,
            }
        };
        self.flush(fx);

        match ops {
            Some(ops) => self.run_engine_ops(&ops).await,
            None => {
                log::debug!("[Session] Unloading {}, no longer in a session", song.id);
                if let Err(e) = self.engine.reset().await {
                    self.report_audio_error(e);
                }
            }
        }
    }

    /// Ops that bring a freshly loaded engine to the intent, marking `Ready`.
    fn converge_ops(&self, core: &mut PlaybackCore, fx: &mut Effects) -> Vec<EngineOp> {
        let Some(intent) = core.intent.clone() else {
            return Vec::new();
        };
        let mut ops = vec![EngineOp::SeekTo(intent.expected_position(self.clock.now()))];
        if intent.is_playing {
            ops.push(EngineOp::Play);
        }
        core.started = true;
        self.set_phase(core, fx, SessionPhase::Ready);
        ops
    }

    /// Cancels the pending apply and arms `step` at `fire_at_ms`.
    fn arm_apply(self: &Arc<Self>, core: &mut PlaybackCore, fire_at_ms: i64, step: ApplyStep) {
        if let Some(previous) = core.pending_apply.take() {
            self.scheduler.cancel(&previous);
        }
        core.apply_generation += 1;
        let generation = core.apply_generation;

        let this = Arc::clone(self);
        let handle = self.scheduler.schedule(fire_at_ms, step.label(), async move {
            this.fire_apply(generation, step).await;
        });
        core.pending_apply = Some(handle);
    }

    async fn fire_apply(self: Arc<Self>, generation: u64, step: ApplyStep) {
        let mut fx = Effects::default();
        let ops = {
            let mut state = self.state.lock();
            let core = &mut state.playback;

            if core.apply_generation != generation {
                log::debug!("[Session] Skipping superseded {}", step.label());
                return;
            }
            core.pending_apply = None;

            if let Some(intent) = core.intent.clone() {
                if intent.status == IntentStatus::Tentative {
                    core.intent = Some(intent.confirmed());
                    fx.events.push(SessionEvent::IntentChanged {
                        intent: core.intent.clone(),
                        timestamp: now_millis(),
                    });
                }
            }

            if !core.intent_loaded() {
                log::debug!(
                    "[Session] {} fired with no loaded track, nothing to apply",
                    step.label()
                );
                Vec::new()
            } else if !core.started {
                // A later step replaced the start; bring the engine to the
                // intent instead of applying only the step's delta.
                self.converge_ops(core, &mut fx)
            } else {
                let ops = match step {
                    ApplyStep::Transport { is_playing: true } => vec![EngineOp::Play],
                    ApplyStep::Transport { is_playing: false } => vec![EngineOp::Pause],
                    ApplyStep::Seek { position_secs } => vec![EngineOp::SeekTo(position_secs)],
                    ApplyStep::Stop => vec![EngineOp::Pause, EngineOp::SeekTo(0.0)],
                    ApplyStep::Start => self.converge_ops(core, &mut fx),
                };
                self.set_phase(core, &mut fx, SessionPhase::Ready);
                ops
            }
        };
        self.flush(fx);
        self.run_engine_ops(&ops).await;
    }

    /// Runs engine ops in order, stopping at the first failure.
    async fn run_engine_ops(&self, ops: &[EngineOp]) {
        for op in ops {
            let result = match *op {
                EngineOp::Play => self.engine.play().await,
                EngineOp::Pause => self.engine.pause().await,
                EngineOp::SeekTo(position) => self.engine.seek_to(position).await,
            };
            if let Err(e) = result {
                self.report_audio_error(e);
                break;
            }
        }
    }

    async fn read_position(&self) -> Option<f64> {
        match self.engine.position().await {
            Ok(position) => Some(position),
            Err(e) => {
                log::debug!("[Session] Position unavailable, using intent: {}", e);
                None
            }
        }
    }

    fn replace_intent(&self, core: &mut PlaybackCore, fx: &mut Effects, intent: PlaybackIntent) {
        core.intent = Some(intent);
        core.end_latched = false;
        fx.events.push(SessionEvent::IntentChanged {
            intent: core.intent.clone(),
            timestamp: now_millis(),
        });
    }

    fn set_phase(&self, core: &mut PlaybackCore, fx: &mut Effects, phase: SessionPhase) {
        if core.phase == phase {
            return;
        }
        log::debug!("[Session] Phase {:?} -> {:?}", core.phase, phase);
        core.phase = phase;
        fx.events.push(SessionEvent::PhaseChanged {
            phase,
            timestamp: now_millis(),
        });
    }

    /// Drops the intent and any pending apply, keeping the phase.
    fn clear(&self, core: &mut PlaybackCore, fx: &mut Effects) {
        if let Some(previous) = core.pending_apply.take() {
            self.scheduler.cancel(&previous);
        }
        core.apply_generation += 1;
        core.loaded_track = None;
        core.started = false;
        core.last_applied_seq = None;
        core.end_latched = false;
        if core.intent.take().is_some() {
            fx.events.push(SessionEvent::IntentChanged {
                intent: None,
                timestamp: now_millis(),
            });
        }
    }

    fn report_audio_error(&self, err: AudioEngineError) {
        log::warn!("[Session] {}", err);
        self.emitter.emit_session(SessionEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            timestamp: now_millis(),
        });
    }

    fn flush(&self, fx: Effects) {
        for event in fx.events {
            self.emitter.emit_session(event);
        }
        if let Some(event) = fx.outbound {
            let name = event.name();
            if let Err(e) = self.transport.emit(event) {
                log::warn!("[Session] Failed to send {}: {}", name, e);
            }
        }
    }
}
