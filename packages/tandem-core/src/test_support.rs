//! Shared test doubles and fixtures.
//!
//! Recording implementations of the engine and transport traits, plus a
//! harness that wires a full client around them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::audio::AudioEngine;
use crate::bootstrap::{bootstrap_client, ClientDeps, SyncClient};
use crate::clock::{ClockSync, LocalClock, MonotonicClock};
use crate::error::{AudioEngineError, AudioResult, TransportResult};
use crate::events::BroadcastEventBridge;
use crate::protocol::{GroupInfo, GroupMember, OutboundEvent, Song};
use crate::runtime::TokioSpawner;
use crate::services::{GroupMembership, PlaybackSessionState};
use crate::state::SyncConfig;
use crate::transport::RelayTransport;

/// Sleeps on tokio's (paused) clock.
pub(crate) async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub(crate) fn song(id: &str) -> Song {
    Song {
        id: id.to_string(),
        title: format!("Track {id}"),
        artist: Some("Test Artist".to_string()),
        url: format!("https://cdn.example.test/{id}.mp3"),
        duration_secs: Some(240.0),
        artwork: None,
    }
}

pub(crate) fn group_info(id: &str, owner: &str) -> GroupInfo {
    GroupInfo {
        id: id.to_string(),
        name: format!("{id} room"),
        created_by: owner.to_string(),
    }
}

/// A `ClockSync` on a paused monotonic clock starting at `anchor_ms`.
pub(crate) fn test_clock_sync(anchor_ms: i64) -> (Arc<ClockSync>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let clock = Arc::new(ClockSync::new(
        Arc::new(MonotonicClock::starting_at(anchor_ms)),
        Arc::clone(&transport) as Arc<dyn RelayTransport>,
        &SyncConfig::default(),
    ));
    (clock, transport)
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport that keeps every emitted event.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().clear();
    }
}

impl RelayTransport for RecordingTransport {
    fn emit(&self, event: OutboundEvent) -> TransportResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audio engine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EngineCall {
    Reset,
    Load(String),
    Play,
    Pause,
    SeekTo(f64),
}

impl EngineCall {
    pub(crate) fn is_play(&self) -> bool {
        matches!(self, Self::Play)
    }

    pub(crate) fn is_pause(&self) -> bool {
        matches!(self, Self::Pause)
    }
}

/// Engine that records each command with the time it was issued.
///
/// `position()` is not recorded.
pub(crate) struct RecordingEngine {
    clock: Arc<dyn LocalClock>,
    calls: Mutex<Vec<(i64, EngineCall)>>,
    position: Mutex<f64>,
    load_delay_ms: AtomicU64,
    fail_loads: AtomicBool,
    fail_plays: AtomicBool,
}

impl RecordingEngine {
    pub(crate) fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::starting_at(0)))
    }

    /// Timestamps calls with `clock`, typically the relay's reference clock.
    pub(crate) fn with_clock(clock: Arc<dyn LocalClock>) -> Self {
        Self {
            clock,
            calls: Mutex::new(Vec::new()),
            position: Mutex::new(0.0),
            load_delay_ms: AtomicU64::new(0),
            fail_loads: AtomicBool::new(false),
            fail_plays: AtomicBool::new(false),
        }
    }

    pub(crate) fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    pub(crate) fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|(_, c)| pred(c)).count()
    }

    /// Time of the first call matching `pred`.
    pub(crate) fn first_at(&self, pred: impl Fn(&EngineCall) -> bool) -> Option<i64> {
        self.calls
            .lock()
            .iter()
            .find(|(_, c)| pred(c))
            .map(|(at, _)| *at)
    }

    pub(crate) fn clear(&self) {
        self.calls.lock().clear();
    }

    pub(crate) fn set_position(&self, secs: f64) {
        *self.position.lock() = secs;
    }

    pub(crate) fn set_load_delay_ms(&self, ms: u64) {
        self.load_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_plays(&self) {
        self.fail_plays.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push((self.clock.now_ms(), call));
    }
}

#[async_trait]
impl AudioEngine for RecordingEngine {
    async fn reset(&self) -> AudioResult<()> {
        self.record(EngineCall::Reset);
        Ok(())
    }

    async fn load(&self, song: &Song) -> AudioResult<()> {
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep_ms(delay).await;
        }
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(AudioEngineError::Load {
                track_id: song.id.clone(),
                reason: "unsupported format".to_string(),
            });
        }
        self.record(EngineCall::Load(song.id.clone()));
        Ok(())
    }

    async fn play(&self) -> AudioResult<()> {
        if self.fail_plays.load(Ordering::SeqCst) {
            return Err(AudioEngineError::Play("output device busy".to_string()));
        }
        self.record(EngineCall::Play);
        Ok(())
    }

    async fn pause(&self) -> AudioResult<()> {
        self.record(EngineCall::Pause);
        Ok(())
    }

    async fn seek_to(&self, position_secs: f64) -> AudioResult<()> {
        self.record(EngineCall::SeekTo(position_secs));
        Ok(())
    }

    async fn position(&self) -> AudioResult<f64> {
        Ok(*self.position.lock())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

/// A full client for user `me` on recording doubles.
pub(crate) struct TestHarness {
    pub(crate) client: SyncClient,
    pub(crate) playback: Arc<PlaybackSessionState>,
    pub(crate) membership: Arc<GroupMembership>,
    pub(crate) clock: Arc<ClockSync>,
    pub(crate) engine: Arc<RecordingEngine>,
    pub(crate) transport: Arc<RecordingTransport>,
    pub(crate) bridge: Arc<BroadcastEventBridge>,
}

impl TestHarness {
    /// Not in a group; local clock anchored at `anchor_ms`.
    pub(crate) fn new(anchor_ms: i64) -> Self {
        let engine = Arc::new(RecordingEngine::with_clock(Arc::new(
            MonotonicClock::starting_at(anchor_ms),
        )));
        let transport = Arc::new(RecordingTransport::new());
        let client = bootstrap_client(
            &SyncConfig::default(),
            ClientDeps {
                local_user: GroupMember::new("me", "Me"),
                engine: Arc::clone(&engine) as Arc<dyn AudioEngine>,
                transport: Arc::clone(&transport) as Arc<dyn RelayTransport>,
                clock: Arc::new(MonotonicClock::starting_at(anchor_ms)),
                external_emitter: None,
            },
            TokioSpawner::current(),
        )
        .expect("default config is valid");

        Self {
            playback: Arc::clone(&client.playback),
            membership: Arc::clone(&client.membership),
            clock: Arc::clone(&client.clock),
            bridge: Arc::clone(&client.event_bridge),
            client,
            engine,
            transport,
        }
    }

    /// Owner of group `g1` with no track; recorded calls cleared.
    pub(crate) async fn in_group(anchor_ms: i64) -> Self {
        let harness = Self::new(anchor_ms);
        harness
            .membership
            .on_group_created(group_info("g1", "me"))
            .await;
        harness.transport.clear();
        harness.engine.clear();
        harness
    }
}
