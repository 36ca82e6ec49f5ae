//! Simulated audio engine.
//!
//! Keeps a virtual play head and records every command with the reference
//! time it ran at, so the report can show how closely peers lined up.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_core::{AudioEngine, AudioEngineError, AudioResult, LocalClock, Song};
use tokio::time::Instant;

/// One engine command as it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRecord {
    /// Reference-clock time the command ran at.
    pub reference_ms: i64,
    pub command: EngineCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Reset,
    Load(String),
    Play,
    Pause,
    Seek(f64),
}

#[derive(Debug, Default)]
struct PlayerState {
    track: Option<Song>,
    /// Play head when playback last started or stopped.
    base_position: f64,
    /// Set while playing.
    resumed_at: Option<Instant>,
}

impl PlayerState {
    fn position(&self) -> f64 {
        let running = self
            .resumed_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let position = self.base_position + running;
        match self.track.as_ref().and_then(|t| t.duration_secs) {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}

/// Player that only moves a virtual play head.
pub struct SimulatedAudioEngine {
    peer: String,
    reference: Arc<dyn LocalClock>,
    state: Mutex<PlayerState>,
    records: Mutex<Vec<EngineRecord>>,
}

impl SimulatedAudioEngine {
    /// Creates an engine for `peer`, stamping records with `reference`.
    pub fn new(peer: impl Into<String>, reference: Arc<dyn LocalClock>) -> Self {
        Self {
            peer: peer.into(),
            reference,
            state: Mutex::new(PlayerState::default()),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<EngineRecord> {
        self.records.lock().clone()
    }

    /// Reference time of the last `play` command.
    pub fn last_play_ms(&self) -> Option<i64> {
        self.records
            .lock()
            .iter()
            .rev()
            .find(|r| r.command == EngineCommand::Play)
            .map(|r| r.reference_ms)
    }

    fn record(&self, command: EngineCommand) {
        let reference_ms = self.reference.now_ms();
        log::info!("[Engine:{}] {:?} at ref {}", self.peer, command, reference_ms);
        self.records.lock().push(EngineRecord {
            reference_ms,
            command,
        });
    }
}

#[async_trait]
impl AudioEngine for SimulatedAudioEngine {
    async fn reset(&self) -> AudioResult<()> {
        *self.state.lock() = PlayerState::default();
        self.record(EngineCommand::Reset);
        Ok(())
    }

    async fn load(&self, song: &Song) -> AudioResult<()> {
        if song.url.is_empty() {
            return Err(AudioEngineError::Load {
                track_id: song.id.clone(),
                reason: "empty stream url".to_string(),
            });
        }
        *self.state.lock() = PlayerState {
            track: Some(song.clone()),
            ..PlayerState::default()
        };
        self.record(EngineCommand::Load(song.id.clone()));
        Ok(())
    }

    async fn play(&self) -> AudioResult<()> {
        {
            let mut state = self.state.lock();
            if state.track.is_none() {
                return Err(AudioEngineError::Play("nothing loaded".to_string()));
            }
            if state.resumed_at.is_none() {
                state.resumed_at = Some(Instant::now());
            }
        }
        self.record(EngineCommand::Play);
        Ok(())
    }

    async fn pause(&self) -> AudioResult<()> {
        {
            let mut state = self.state.lock();
            state.base_position = state.position();
            state.resumed_at = None;
        }
        self.record(EngineCommand::Pause);
        Ok(())
    }

    async fn seek_to(&self, position_secs: f64) -> AudioResult<()> {
        let clamped = {
            let mut state = self.state.lock();
            let max = state
                .track
                .as_ref()
                .and_then(|t| t.duration_secs)
                .unwrap_or(f64::MAX);
            let clamped = position_secs.clamp(0.0, max);
            state.base_position = clamped;
            if state.resumed_at.is_some() {
                state.resumed_at = Some(Instant::now());
            }
            clamped
        };
        self.record(EngineCommand::Seek(clamped));
        Ok(())
    }

    async fn position(&self) -> AudioResult<f64> {
        Ok(self.state.lock().position())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tandem_core::MonotonicClock;

    use super::*;

    fn song(duration: f64) -> Song {
        Song {
            id: "t1".to_string(),
            title: "T".to_string(),
            artist: None,
            url: "https://cdn.example.com/t1.mp3".to_string(),
            duration_secs: Some(duration),
            artwork: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn play_head_advances_only_while_playing() {
        let engine = SimulatedAudioEngine::new("p1", Arc::new(MonotonicClock::starting_at(0)));
        engine.load(&song(100.0)).await.unwrap();
        engine.seek_to(10.0).await.unwrap();

        engine.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        engine.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        assert_eq!(engine.position().await.unwrap(), 12.5);
        assert_eq!(engine.last_play_ms(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_is_clamped_to_track() {
        let engine = SimulatedAudioEngine::new("p1", Arc::new(MonotonicClock::starting_at(0)));
        engine.load(&song(60.0)).await.unwrap();

        engine.seek_to(500.0).await.unwrap();
        assert_eq!(engine.position().await.unwrap(), 60.0);

        engine.seek_to(-3.0).await.unwrap();
        assert_eq!(engine.position().await.unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn play_without_track_fails() {
        let engine = SimulatedAudioEngine::new("p1", Arc::new(MonotonicClock::starting_at(0)));
        let err = engine.play().await.unwrap_err();
        assert!(matches!(err, AudioEngineError::Play(_)));
    }
}
