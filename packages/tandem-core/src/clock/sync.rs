//! Round-trip clock offset estimation against the relay's reference clock.
//!
//! # Estimation
//!
//! Each probe carries the local send time. When the response arrives:
//!
//! - `rtt = local_receive - original_send`
//! - `sample = server_time + rtt / 2 - local_receive`
//!
//! The first accepted sample is adopted as-is. Later samples move the offset
//! by an exponential moving average step, capped at `max_clock_step_ms`. A
//! backwards step is further capped at `rtt / 2`, so reference time never
//! jumps back by more than one probe's round-trip error.
//!
//! Until a probe lands the offset is zero and callers get the local clock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::protocol::{OutboundEvent, TimeSyncRequest};
use crate::state::SyncConfig;
use crate::transport::RelayTransport;

use super::LocalClock;

/// Diagnostics for the current offset estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockStats {
    /// `reference - local`, in milliseconds.
    pub offset_ms: f64,
    /// Round trip of the last accepted probe.
    pub last_rtt_ms: Option<i64>,
    /// Accepted samples since the last reset.
    pub samples: u64,
}

#[derive(Debug, Default)]
struct OffsetState {
    offset_ms: Option<f64>,
    last_rtt_ms: Option<i64>,
    samples: u64,
}

/// Estimates `reference_now - local_now` from time-sync probes.
pub struct ClockSync {
    clock: Arc<dyn LocalClock>,
    transport: Arc<dyn RelayTransport>,
    smoothing: f64,
    max_step_ms: f64,
    max_rtt_ms: i64,
    probe_interval: Duration,
    state: RwLock<OffsetState>,
}

impl ClockSync {
    /// Creates an estimator with no samples (offset zero).
    pub fn new(
        clock: Arc<dyn LocalClock>,
        transport: Arc<dyn RelayTransport>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            clock,
            transport,
            smoothing: config.clock_smoothing,
            max_step_ms: config.max_clock_step_ms,
            max_rtt_ms: config.max_rtt_ms,
            probe_interval: Duration::from_millis(config.probe_interval_ms),
            state: RwLock::new(OffsetState::default()),
        }
    }

    /// Sends a `time-sync-request` stamped with the local clock.
    ///
    /// Send failures are logged only; the next probe retries naturally.
    pub fn probe(&self) {
        let client_time = self.clock.now_ms();
        let event = OutboundEvent::TimeSyncRequest(TimeSyncRequest { client_time });
        if let Err(e) = self.transport.emit(event) {
            log::debug!("[ClockSync] Probe send failed: {}", e);
        }
    }

    /// Folds a `time-sync-response` into the estimate.
    ///
    /// Returns the new offset if the sample was accepted.
    pub fn on_probe_response(&self, server_time: i64, original_send_time: i64) -> Option<f64> {
        let local_receive = self.clock.now_ms();
        let rtt = local_receive - original_send_time;

        if rtt < 0 {
            log::warn!(
                "[ClockSync] Discarding probe with negative rtt ({}ms): response predates request",
                rtt
            );
            return None;
        }
        if rtt > self.max_rtt_ms {
            log::debug!(
                "[ClockSync] Discarding probe with rtt {}ms (limit {}ms)",
                rtt,
                self.max_rtt_ms
            );
            return None;
        }

        let half_rtt = rtt as f64 / 2.0;
        let sample = server_time as f64 + half_rtt - local_receive as f64;

        let mut state = self.state.write();
        let next = match state.offset_ms {
            None => sample,
            Some(current) => {
                let step = ((sample - current) * self.smoothing)
                    .clamp(-self.max_step_ms, self.max_step_ms)
                    .max(-half_rtt);
                current + step
            }
        };
        state.offset_ms = Some(next);
        state.last_rtt_ms = Some(rtt);
        state.samples += 1;

        log::debug!(
            "[ClockSync] rtt={}ms sample={:.1}ms offset={:.1}ms (samples={})",
            rtt,
            sample,
            next,
            state.samples
        );

        Some(next)
    }

    /// Current time on the reference clock, in milliseconds.
    pub fn now(&self) -> i64 {
        self.clock.now_ms() + self.offset_ms().round() as i64
    }

    /// Current time on the local clock.
    pub fn local_now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Current offset estimate; zero before the first sample.
    pub fn offset_ms(&self) -> f64 {
        self.state.read().offset_ms.unwrap_or(0.0)
    }

    /// Whether at least one probe has completed.
    pub fn is_synced(&self) -> bool {
        self.state.read().offset_ms.is_some()
    }

    pub fn stats(&self) -> ClockStats {
        let state = self.state.read();
        ClockStats {
            offset_ms: state.offset_ms.unwrap_or(0.0),
            last_rtt_ms: state.last_rtt_ms,
            samples: state.samples,
        }
    }

    /// Forgets the estimate, falling back to the local clock.
    pub fn reset(&self) {
        *self.state.write() = OffsetState::default();
    }

    /// Probes immediately and then every `probe_interval` until cancelled.
    pub async fn run_probe_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "[ClockSync] Probe loop started (interval {}ms)",
            self.probe_interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.probe(),
            }
        }

        log::info!("[ClockSync] Probe loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::test_support::RecordingTransport;

    fn clock_sync(anchor_ms: i64, config: &SyncConfig) -> (ClockSync, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let sync = ClockSync::new(
            Arc::new(MonotonicClock::starting_at(anchor_ms)),
            Arc::clone(&transport) as Arc<dyn RelayTransport>,
            config,
        );
        (sync, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn defaults_to_local_clock_before_first_probe() {
        let (sync, _) = clock_sync(5_000, &SyncConfig::default());

        assert!(!sync.is_synced());
        assert_eq!(sync.offset_ms(), 0.0);
        assert_eq!(sync.now(), 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_stamps_local_send_time() {
        let (sync, transport) = clock_sync(1_000, &SyncConfig::default());

        sync.probe();

        assert_eq!(
            transport.events(),
            vec![OutboundEvent::TimeSyncRequest(TimeSyncRequest {
                client_time: 1_000
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn one_probe_converges_within_half_rtt() {
        // Reference clock runs 750ms ahead; 80ms round trip split 30/50.
        let skew = 750;
        let (sync, _) = clock_sync(1_000, &SyncConfig::default());

        let sent = sync.local_now();
        tokio::time::advance(Duration::from_millis(30)).await;
        let server_time = sync.local_now() + skew;
        tokio::time::advance(Duration::from_millis(50)).await;

        sync.on_probe_response(server_time, sent).expect("accepted");

        let error = (sync.now() - (sync.local_now() + skew)).abs();
        assert!(error <= 40, "error {error}ms exceeds rtt/2");
        assert_eq!(sync.stats().last_rtt_ms, Some(80));
    }

    #[tokio::test(start_paused = true)]
    async fn symmetric_rtt_recovers_exact_skew() {
        let (sync, _) = clock_sync(0, &SyncConfig::default());

        let sent = sync.local_now();
        tokio::time::advance(Duration::from_millis(20)).await;
        let server_time = sync.local_now() - 200;
        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(sync.on_probe_response(server_time, sent), Some(-200.0));
        assert_eq!(sync.now(), sync.local_now() - 200);
    }

    #[tokio::test(start_paused = true)]
    async fn later_samples_are_smoothed_and_capped() {
        let config = SyncConfig {
            clock_smoothing: 0.5,
            max_clock_step_ms: 40.0,
            ..SyncConfig::default()
        };
        let (sync, _) = clock_sync(0, &config);

        // Zero-rtt samples so the arithmetic is exact.
        sync.on_probe_response(100, 0).unwrap();
        assert_eq!(sync.offset_ms(), 100.0);

        // Half of +60 is +30, under the cap.
        sync.on_probe_response(160, 0).unwrap();
        assert_eq!(sync.offset_ms(), 130.0);

        // Half of +470 is +235, capped at +40.
        sync.on_probe_response(600, 0).unwrap();
        assert_eq!(sync.offset_ms(), 170.0);
    }

    #[tokio::test(start_paused = true)]
    async fn backwards_step_is_bounded_by_half_rtt() {
        let config = SyncConfig {
            clock_smoothing: 1.0,
            max_clock_step_ms: 1_000.0,
            ..SyncConfig::default()
        };
        let (sync, _) = clock_sync(0, &config);
        sync.on_probe_response(500, 0).unwrap();

        // Sample says the offset dropped to ~0, but this probe's rtt is 40ms.
        let sent = sync.local_now();
        tokio::time::advance(Duration::from_millis(40)).await;
        let server_time = sync.local_now() - 20;
        sync.on_probe_response(server_time, sent).unwrap();

        assert_eq!(sync.offset_ms(), 480.0);
    }

    #[tokio::test(start_paused = true)]
    async fn discards_slow_and_impossible_samples() {
        let config = SyncConfig {
            max_rtt_ms: 500,
            ..SyncConfig::default()
        };
        let (sync, _) = clock_sync(10_000, &config);

        // Response claims to answer a request from the future.
        assert_eq!(sync.on_probe_response(20_000, 10_050), None);

        let sent = sync.local_now();
        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(sync.on_probe_response(99_999, sent), None);

        assert!(!sync.is_synced());
        assert_eq!(sync.stats().samples, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_local_clock() {
        let (sync, _) = clock_sync(0, &SyncConfig::default());
        sync.on_probe_response(1_000, 0).unwrap();
        assert!(sync.is_synced());

        sync.reset();

        assert!(!sync.is_synced());
        assert_eq!(sync.now(), sync.local_now());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_ticks_until_cancelled() {
        let config = SyncConfig {
            probe_interval_ms: 1_000,
            ..SyncConfig::default()
        };
        let (sync, transport) = clock_sync(0, &config);
        let sync = Arc::new(sync);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Arc::clone(&sync).run_probe_loop(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(transport.events().len(), 3);

        cancel.cancel();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(transport.events().len(), 3);
    }
}
