//! Tandem Sim - headless multi-peer simulator for Tandem group playback.
//!
//! Spins up several sync clients with deliberately skewed clocks against an
//! in-process relay, runs a scripted listening session, and reports how
//! closely their players lined up on the reference clock.

mod config;
mod engine;
mod scenario;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use crate::config::SimConfig;

/// Tandem Sim - Simulated group listening session.
#[derive(Parser, Debug)]
#[command(name = "tandem-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TANDEM_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Number of peers (overrides config file).
    #[arg(short = 'n', long)]
    peers: Option<usize>,

    /// Per-peer clock skew in milliseconds (overrides config file).
    #[arg(short = 's', long, allow_negative_numbers = true)]
    skew_ms: Option<i64>,

    /// One-way relay latency in milliseconds (overrides config file).
    #[arg(short = 'L', long)]
    latency_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Tandem Sim v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        SimConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(peers) = args.peers {
        config.peers = peers;
    }
    if let Some(skew) = args.skew_ms {
        config.skew_ms = skew;
    }
    if let Some(latency) = args.latency_ms {
        config.latency_ms = latency;
    }
    config.validate()?;

    log::info!(
        "Configuration: peers={}, skew={}ms/peer, latency={}ms, lookahead={}ms",
        config.peers,
        config.skew_ms,
        config.latency_ms,
        config.sync.lookahead_ms
    );

    tokio::select! {
        result = scenario::run(&config) => {
            let (peers, report) = result.context("Scenario failed")?;
            print_report(&peers, &report);
            scenario::shutdown(&peers).await;
        }
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, stopping early");
        }
    }

    log::info!("Simulation complete");
    Ok(())
}

fn print_report(peers: &[scenario::Peer], report: &scenario::SyncReport) {
    println!();
    println!("{:<10} {:>8} {:>10}  commands", "peer", "skew", "offset");
    for peer in peers {
        let commands: Vec<String> = peer
            .engine
            .records()
            .iter()
            .map(|r| format!("{:?}@{}", r.command, r.reference_ms))
            .collect();
        println!(
            "{:<10} {:>+7}ms {:>+9.1}ms  {}",
            peer.name,
            peer.skew_ms,
            peer.client.clock.offset_ms(),
            commands.join(" ")
        );
    }
    println!();
    for (name, at) in &report.plays {
        println!("{name}: last play at ref {at}");
    }
    println!("play spread across peers: {}ms", report.spread_ms);
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
