//! Centralized error types for the Tandem core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types per collaborator using `thiserror`
//! - Gives every error a machine-readable code via [`ErrorCode`]
//! - Folds collaborator errors into the serializable [`TandemError`]
//!
//! Errors from the audio engine never cross the session layer: they are
//! caught there, logged and surfaced as UI events. Relay send failures are
//! logged and not retried. Clock-sync failures are silent.

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for UI and log consumers.
    fn code(&self) -> &'static str;
}

/// Failures while handing an event to the relay.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The relay connection is gone.
    #[error("Relay not connected")]
    NotConnected,

    /// The relay refused or dropped the event.
    #[error("Failed to send {event}: {reason}")]
    SendFailed {
        /// Wire name of the event.
        event: &'static str,
        /// Underlying reason.
        reason: String,
    },

    /// The payload could not be serialized.
    #[error("Failed to encode {event}: {source}")]
    Encode {
        /// Wire name of the event.
        event: &'static str,
        /// Serializer error.
        #[source]
        source: serde_json::Error,
    },
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "relay_not_connected",
            Self::SendFailed { .. } => "relay_send_failed",
            Self::Encode { .. } => "relay_encode_failed",
        }
    }
}

/// Failures reported by the audio engine adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioEngineError {
    #[error("Failed to reset player: {0}")]
    Reset(String),

    #[error("Failed to load track {track_id}: {reason}")]
    Load { track_id: String, reason: String },

    #[error("Failed to start playback: {0}")]
    Play(String),

    #[error("Failed to pause playback: {0}")]
    Pause(String),

    #[error("Failed to seek: {0}")]
    Seek(String),

    #[error("Failed to read position: {0}")]
    Position(String),
}

impl ErrorCode for AudioEngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Reset(_) => "audio_reset_failed",
            Self::Load { .. } => "audio_load_failed",
            Self::Play(_) => "audio_play_failed",
            Self::Pause(_) => "audio_pause_failed",
            Self::Seek(_) => "audio_seek_failed",
            Self::Position(_) => "audio_position_failed",
        }
    }
}

/// Failures while decoding inbound relay events.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The relay delivered an event name this client does not handle.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The payload did not match the expected shape.
    #[error("Malformed {event} payload: {source}")]
    Malformed {
        /// Wire name of the event.
        event: &'static str,
        /// Deserializer error.
        #[source]
        source: serde_json::Error,
    },
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownEvent(_) => "unknown_event",
            Self::Malformed { .. } => "malformed_payload",
        }
    }
}

/// Application-wide error type for the Tandem client.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum TandemError {
    /// Sending to the relay failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The audio engine rejected a command.
    #[error("Audio engine error: {0}")]
    AudioEngine(String),

    /// An inbound event could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The operation needs an active listening group.
    #[error("Not in a listening group")]
    NotInGroup,

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TandemError {
    /// Returns a machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::AudioEngine(_) => "audio_engine_error",
            Self::Protocol(_) => "protocol_error",
            Self::NotInGroup => "not_in_group",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a relay send.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result of an audio engine command.
pub type AudioResult<T> = Result<T, AudioEngineError>;

/// Result of decoding a relay event.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Convenient Result alias for application-wide operations.
pub type TandemResult<T> = Result<T, TandemError>;

impl From<TransportError> for TandemError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<AudioEngineError> for TandemError {
    fn from(err: AudioEngineError) -> Self {
        Self::AudioEngine(err.to_string())
    }
}

impl From<ProtocolError> for TandemError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
