//! Relay transport abstraction.
//!
//! The relay fans events out to the other members of a group. This crate
//! only emits through [`RelayTransport`]; inbound events are handed to
//! [`SyncClient::dispatch`](crate::SyncClient::dispatch) by whatever owns the
//! socket. Sends are fire-and-forget: no response is awaited before control
//! returns to the caller.

pub mod local;

pub use local::{LocalRelay, RelayConnection};

use crate::error::TransportResult;
use crate::protocol::OutboundEvent;

/// Trait for emitting named events to the relay.
///
/// Delivery is assumed at-least-once and unordered. Implementations must
/// not block; a failed send is reported and never retried by the caller.
pub trait RelayTransport: Send + Sync {
    /// Hands an event to the relay.
    fn emit(&self, event: OutboundEvent) -> TransportResult<()>;
}

/// Transport that logs every event with its wire payload before handing it
/// to the wrapped transport.
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T: RelayTransport> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: RelayTransport> RelayTransport for LoggingTransport<T> {
    fn emit(&self, event: OutboundEvent) -> TransportResult<()> {
        let payload = event.payload()?;
        tracing::debug!(event = event.name(), %payload, "relay_emit");
        self.inner.emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CreateGroupRequest;
    use crate::test_support::RecordingTransport;

    #[test]
    fn logging_transport_forwards_events() {
        let transport = LoggingTransport::new(RecordingTransport::new());
        let event = OutboundEvent::CreateMusicGroup(CreateGroupRequest {
            name: "Den".to_string(),
        });

        transport.emit(event.clone()).unwrap();

        assert_eq!(transport.inner.events(), vec![event]);
    }
}
