//! Task spawning abstraction for runtime independence.
//!
//! Scheduled playback actions and the clock probe loop run as background
//! tasks. They are spawned through [`TaskSpawner`] so the library does not
//! reach for a global runtime, and a host embedding the client in its own
//! runtime can hand over that runtime's handle.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// Tasks are detached: the spawner provides no join handle. Cancellation is
/// cooperative through [`CancellationToken`]s, see
/// [`spawn_until_cancelled`](TaskSpawner::spawn_until_cancelled).
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a future that is dropped as soon as `token` is cancelled.
    ///
    /// The future is not polled again after cancellation, so any work after
    /// its last `.await` point is skipped.
    fn spawn_until_cancelled<F>(&self, token: CancellationToken, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = future => {}
            }
        });
    }
}

/// Tokio-based spawner used by the client and the simulator.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
