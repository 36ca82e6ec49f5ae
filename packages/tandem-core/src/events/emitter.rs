//! Event emitter abstraction for decoupling services from delivery.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative delivery (a mobile
//! bridge, a CLI printer).

use super::{GroupEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of delivery.
pub trait EventEmitter: Send + Sync {
    /// Emits a playback state machine event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a group lifecycle or roster event.
    fn emit_group(&self, event: GroupEvent);
}

/// No-op emitter for headless use or testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}

    fn emit_group(&self, _event: GroupEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_group(&self, event: GroupEvent) {
        tracing::debug!(?event, "group_event");
    }
}
