//! Scripted group session.
//!
//! Runs N clients with skewed clocks against one [`LocalRelay`] through a
//! fixed script (create, join, play, pause, seek, late join, track change,
//! natural end) and reports when each peer's engine actually played.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tandem_core::{
    bootstrap_client, ClientDeps, GroupMember, LocalClock, LocalRelay, LoggingEventEmitter,
    LoggingTransport, MonotonicClock, SyncClient, TokioSpawner,
};

use crate::config::SimConfig;
use crate::engine::SimulatedAudioEngine;

/// A simulated listener.
pub struct Peer {
    pub name: String,
    pub skew_ms: i64,
    pub client: SyncClient,
    pub engine: Arc<SimulatedAudioEngine>,
}

/// How closely the peers' last `play` calls lined up.
#[derive(Debug)]
pub struct SyncReport {
    /// `(peer, reference time of last play)` for peers that played.
    pub plays: Vec<(String, i64)>,
    /// Largest difference between any two peers, in milliseconds.
    pub spread_ms: i64,
}

impl SyncReport {
    fn from_peers(peers: &[Peer]) -> Self {
        let plays: Vec<(String, i64)> = peers
            .iter()
            .filter_map(|p| p.engine.last_play_ms().map(|at| (p.name.clone(), at)))
            .collect();
        let spread_ms = match (
            plays.iter().map(|(_, at)| *at).min(),
            plays.iter().map(|(_, at)| *at).max(),
        ) {
            (Some(min), Some(max)) => max - min,
            _ => 0,
        };
        Self { plays, spread_ms }
    }
}

/// Builds the peers and runs the script to completion.
pub async fn run(config: &SimConfig) -> Result<(Vec<Peer>, SyncReport)> {
    let reference: Arc<dyn LocalClock> = Arc::new(MonotonicClock::system());
    let relay = LocalRelay::new(
        Arc::clone(&reference),
        Duration::from_millis(config.latency_ms),
        TokioSpawner::current(),
    );

    let peers = (0..config.peers)
        .map(|i| connect_peer(config, &relay, &reference, i))
        .collect::<Result<Vec<_>>>()?;
    for peer in &peers {
        peer.client.start();
    }

    let step = Duration::from_millis(config.step_ms);
    let owner = &peers[0];
    let late = &peers[peers.len() - 1];
    let early = &peers[1..peers.len() - 1];

    log::info!("[Sim] Waiting for clock sync");
    tokio::time::sleep(step).await;
    for peer in &peers {
        let stats = peer.client.clock.stats();
        log::info!(
            "[Sim] {} (skew {:+}ms): offset {:.1}ms, rtt {:?}",
            peer.name,
            peer.skew_ms,
            stats.offset_ms,
            stats.last_rtt_ms
        );
    }

    owner.client.create_group("Listening Room")?;
    tokio::time::sleep(step).await;
    let group_id = owner
        .client
        .snapshot()
        .map(|s| s.group_id)
        .context("Owner never received group-created")?;

    for peer in early {
        peer.client.join_group(&group_id)?;
    }
    tokio::time::sleep(step).await;

    log::info!("[Sim] Owner starts {}", config.tracks[0].title);
    owner.client.change_track(config.tracks[0].to_song()).await?;
    tokio::time::sleep(step * 2).await;

    if let Some(peer) = early.first() {
        log::info!("[Sim] {} pauses", peer.name);
        peer.client.toggle_play().await?;
        tokio::time::sleep(step).await;

        log::info!("[Sim] {} seeks to 95s", peer.name);
        peer.client.seek(95.0)?;
        tokio::time::sleep(step).await;
    }

    log::info!("[Sim] Owner resumes");
    owner.client.toggle_play().await?;
    tokio::time::sleep(step).await;

    log::info!("[Sim] {} joins late", late.name);
    late.client.join_group(&group_id)?;
    tokio::time::sleep(step * 2).await;

    log::info!("[Sim] Owner switches to {}", config.tracks[1].title);
    owner.client.change_track(config.tracks[1].to_song()).await?;
    tokio::time::sleep(step * 2).await;

    let report = SyncReport::from_peers(&peers);

    log::info!("[Sim] Track ends on the owner's player");
    owner.client.on_queue_ended();
    tokio::time::sleep(step).await;

    Ok((peers, report))
}

/// Stops every client concurrently.
pub async fn shutdown(peers: &[Peer]) {
    join_all(peers.iter().map(|p| p.client.shutdown())).await;
}

fn connect_peer(
    config: &SimConfig,
    relay: &LocalRelay,
    reference: &Arc<dyn LocalClock>,
    index: usize,
) -> Result<Peer> {
    let name = format!("peer-{}", index + 1);
    let skew_ms = config.skew_ms * index as i64;
    let member = GroupMember::new(name.clone(), format!("Listener {}", index + 1));

    let (connection, inbox) = relay.connect(member.clone());
    let engine = Arc::new(SimulatedAudioEngine::new(name.clone(), Arc::clone(reference)));
    let client = bootstrap_client(
        &config.sync,
        ClientDeps {
            local_user: member,
            engine: Arc::clone(&engine) as Arc<dyn tandem_core::AudioEngine>,
            transport: Arc::new(LoggingTransport::new(connection)),
            clock: Arc::new(MonotonicClock::starting_at(reference.now_ms() + skew_ms)),
            external_emitter: Some(Arc::new(LoggingEventEmitter)),
        },
        TokioSpawner::current(),
    )
    .with_context(|| format!("Failed to bootstrap {}", name))?;
    client.attach_inbox(inbox);

    Ok(Peer {
        name,
        skew_ms,
        client,
        engine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scripted_session_keeps_peers_aligned() {
        let config = SimConfig {
            peers: 3,
            skew_ms: 250,
            latency_ms: 30,
            step_ms: 500,
            ..SimConfig::default()
        };

        let (peers, report) = run(&config).await.unwrap();

        assert_eq!(report.plays.len(), 3, "every peer should have played");
        assert!(report.spread_ms <= 1, "spread {}ms", report.spread_ms);
        for peer in &peers {
            assert!(peer.client.snapshot().is_some(), "{} left the group", peer.name);
        }

        shutdown(&peers).await;
    }
}
