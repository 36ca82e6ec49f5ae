//! Bridge implementation that maps domain events to a broadcast channel.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between the sync
//! services and whatever renders their state. Any number of subscribers
//! (UI, logging, the simulator report) can listen.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, GroupEvent, SessionEvent};

/// Bridges domain events to a `tokio::sync::broadcast` channel.
///
/// For host-specific delivery (e.g. a mobile UI bridge), the bridge also
/// forwards to an optional external emitter that can be set after
/// construction.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    /// Optional external emitter for host-specific event delivery
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every event before broadcast.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_session, SessionEvent, Session);
    impl_emit!(emit_group, GroupEvent, Group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GroupCloseReason;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();

        bridge.emit_group(GroupEvent::Closed {
            group_id: "g1".to_string(),
            reason: GroupCloseReason::Disbanded,
            timestamp: 7,
        });

        match rx.recv().await.unwrap() {
            BroadcastEvent::Group(GroupEvent::Closed { reason, .. }) => {
                assert_eq!(reason, GroupCloseReason::Disbanded);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(1);
        bridge.emit_session(SessionEvent::Error {
            code: "audio_play_failed".to_string(),
            message: "device busy".to_string(),
            timestamp: 0,
        });
    }

    #[test]
    fn serializes_with_category_and_type() {
        let event = BroadcastEvent::Group(GroupEvent::MemberLeft {
            user_id: "u9".to_string(),
            timestamp: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "group");
        assert_eq!(json["type"], "memberLeft");
        assert_eq!(json["userId"], "u9");
    }
}
