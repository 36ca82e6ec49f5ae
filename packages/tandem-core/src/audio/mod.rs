//! Audio engine abstraction.
//!
//! The real player (decoder, output device, platform media session) lives
//! outside this crate. The session layer drives it only through
//! [`AudioEngine`], so the engine can be swapped for a mock in tests or a
//! simulated player in the simulator.

use async_trait::async_trait;

use crate::error::AudioResult;
use crate::protocol::Song;

/// Trait for the player primitives the sync core needs.
///
/// Calls are issued from scheduled tasks and are not strictly awaited
/// before the next scheduled point. Implementations should clamp seeks to
/// `[0, duration]` themselves and own any retry policy for loads.
///
/// Natural end of track and asynchronous player failures are reported back
/// through [`SyncClient::on_queue_ended`](crate::SyncClient::on_queue_ended)
/// and [`SyncClient::on_audio_error`](crate::SyncClient::on_audio_error).
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Stops playback and clears the queue.
    async fn reset(&self) -> AudioResult<()>;

    /// Loads a track, leaving the player paused at position zero.
    ///
    /// # Arguments
    /// * `song` - Track to load; `song.url` is the stream location
    async fn load(&self, song: &Song) -> AudioResult<()>;

    /// Starts or resumes playback of the loaded track.
    async fn play(&self) -> AudioResult<()>;

    /// Pauses playback, keeping the position.
    async fn pause(&self) -> AudioResult<()>;

    /// Moves the play head.
    ///
    /// # Arguments
    /// * `position_secs` - Target position in seconds from track start
    async fn seek_to(&self, position_secs: f64) -> AudioResult<()>;

    /// Returns the current play head position in seconds.
    async fn position(&self) -> AudioResult<f64>;
}
