//! Reference-time action scheduling.
//!
//! [`ScheduledActionQueue`] runs a future at a reference-clock instant. The
//! instant is converted to a local delay once, at schedule time, as
//! `max(0, fire_at - ClockSync::now())` and armed as a one-shot tokio timer.
//!
//! - A fire time already in the past fires immediately rather than being
//!   dropped, so a late event still takes effect.
//! - Each action fires at most once. Firing and [`cancel`](ScheduledActionQueue::cancel)
//!   race on removing the pending entry; whichever removes it wins.
//! - The queue does not dedupe by content. Callers owning a logical slot
//!   (such as "apply playback state") cancel the previous handle first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::ClockSync;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::delay_until;

/// Handle to a scheduled action, used to cancel it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionHandle {
    id: Uuid,
    fire_at_ms: i64,
    label: &'static str,
}

impl ActionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Reference time the action was scheduled for.
    pub fn fire_at_ms(&self) -> i64 {
        self.fire_at_ms
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

/// Runs futures at reference-clock instants.
#[derive(Clone)]
pub struct ScheduledActionQueue {
    clock: Arc<ClockSync>,
    spawner: TokioSpawner,
    pending: Arc<DashMap<Uuid, CancellationToken>>,
}

impl ScheduledActionQueue {
    pub fn new(clock: Arc<ClockSync>, spawner: TokioSpawner) -> Self {
        Self {
            clock,
            spawner,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Schedules `action` to run at reference time `fire_at_ms`.
    ///
    /// # Arguments
    /// * `fire_at_ms` - Reference-clock instant; past instants fire immediately
    /// * `label` - Short name for logs
    /// * `action` - Work to run; it must contain its own errors
    pub fn schedule<F>(&self, fire_at_ms: i64, label: &'static str, action: F) -> ActionHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let delay_ms = delay_until(fire_at_ms, self.clock.now());
        let token = CancellationToken::new();
        self.pending.insert(id, token.clone());

        log::debug!(
            "[Scheduler] Armed {} ({}) at ref {} (in {}ms)",
            label,
            id,
            fire_at_ms,
            delay_ms
        );

        let pending = Arc::clone(&self.pending);
        self.spawner.spawn_until_cancelled(token, async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            // Claim the entry; a concurrent cancel that got here first wins.
            // Once claimed, nothing cancels the token again.
            if pending.remove(&id).is_none() {
                return;
            }

            log::trace!("[Scheduler] Firing {} ({})", label, id);
            action.await;
        });

        ActionHandle {
            id,
            fire_at_ms,
            label,
        }
    }

    /// Cancels a pending action.
    ///
    /// Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self, handle: &ActionHandle) -> bool {
        match self.pending.remove(&handle.id) {
            Some((_, token)) => {
                token.cancel();
                log::debug!("[Scheduler] Cancelled {} ({})", handle.label, handle.id);
                true
            }
            None => false,
        }
    }

    /// Cancels every pending action. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.pending.iter().map(|r| *r.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|(_, token)| token.cancel())
            .count()
    }

    /// Number of actions armed and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
