//! Tandem Core - synchronized group playback.
//!
//! This crate keeps several listeners' audio players playing the same track
//! at the same position at the same moment. Peers agree on a shared reference
//! clock (the relay's), express every playback change as "do X at reference
//! time T", and reconcile inbound changes into one authoritative intent per
//! group.
//!
//! # Architecture
//!
//! - [`clock`]: Local clocks and round-trip offset estimation ([`ClockSync`])
//! - [`scheduler`]: Runs actions at reference-clock instants
//! - [`services`]: The playback state machine and group membership
//! - [`protocol`]: Relay event names and camelCase wire payloads
//! - [`transport`]: Relay transport trait and an in-process relay
//! - [`audio`]: The audio engine trait the state machine drives
//! - [`events`]: UI-facing event fan-out
//! - [`bootstrap`]: Composition root building a [`SyncClient`]
//! - [`state`]: Configuration and the per-client state lock
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate never talks to a socket, a decoder or a system clock directly:
//!
//! - [`AudioEngine`](audio::AudioEngine): Player primitives
//! - [`RelayTransport`](transport::RelayTransport): Fire-and-forget relay sends
//! - [`LocalClock`](clock::LocalClock): This device's millisecond clock
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting UI events

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod audio;
pub mod bootstrap;
pub mod clock;
pub mod error;
pub mod events;
pub mod protocol;
pub mod protocol_constants;
pub mod runtime;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at the crate root
pub use audio::AudioEngine;
pub use bootstrap::{bootstrap_client, ClientDeps, SyncClient};
pub use clock::{ClockStats, ClockSync, LocalClock, MonotonicClock};
pub use error::{
    AudioEngineError, AudioResult, ErrorCode, ProtocolError, TandemError, TandemResult,
    TransportError, TransportResult,
};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, GroupCloseReason, GroupEvent,
    LoggingEventEmitter, NoopEventEmitter, SessionEvent,
};
pub use protocol::{GroupMember, InboundEvent, OutboundEvent, Song};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use scheduler::{ActionHandle, ScheduledActionQueue};
pub use services::{GroupSnapshot, IntentStatus, PlaybackIntent, SessionPhase};
pub use state::SyncConfig;
pub use transport::{LocalRelay, LoggingTransport, RelayConnection, RelayTransport};
pub use utils::now_millis;
