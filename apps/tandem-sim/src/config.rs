//! Simulator configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tandem_core::{Song, SyncConfig};

/// A track the scripted session can switch to.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackConfig {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    pub url: String,
    pub duration_secs: f64,
}

impl TrackConfig {
    pub fn to_song(&self) -> Song {
        Song {
            id: self.id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            url: self.url.clone(),
            duration_secs: Some(self.duration_secs),
            artwork: None,
        }
    }
}

/// Simulator configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of simulated listeners, including the group owner.
    /// Override: `TANDEM_PEERS`
    pub peers: usize,

    /// Clock skew added per peer: peer `i` runs `i * skew_ms` ahead of the relay.
    /// Override: `TANDEM_SKEW_MS`
    pub skew_ms: i64,

    /// One-way relay delivery delay in milliseconds.
    /// Override: `TANDEM_LATENCY_MS`
    pub latency_ms: u64,

    /// Pause between scripted steps in milliseconds.
    /// Override: `TANDEM_STEP_MS`
    pub step_ms: u64,

    /// Tracks used by the script; at least two.
    pub tracks: Vec<TrackConfig>,

    /// Client tunables passed to every peer.
    pub sync: SyncConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            skew_ms: 150,
            latency_ms: 25,
            step_ms: 1500,
            tracks: vec![
                TrackConfig {
                    id: "trk-001".to_string(),
                    title: "Morning Static".to_string(),
                    artist: Some("The Relays".to_string()),
                    url: "https://cdn.example.com/audio/trk-001.mp3".to_string(),
                    duration_secs: 214.0,
                },
                TrackConfig {
                    id: "trk-002".to_string(),
                    title: "Offset".to_string(),
                    artist: Some("Half RTT".to_string()),
                    url: "https://cdn.example.com/audio/trk-002.mp3".to_string(),
                    duration_secs: 187.0,
                },
            ],
            sync: SyncConfig::default(),
        }
    }
}

impl SimConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TANDEM_PEERS") {
            if let Ok(peers) = val.parse() {
                self.peers = peers;
            }
        }

        if let Ok(val) = std::env::var("TANDEM_SKEW_MS") {
            if let Ok(skew) = val.parse() {
                self.skew_ms = skew;
            }
        }

        if let Ok(val) = std::env::var("TANDEM_LATENCY_MS") {
            if let Ok(latency) = val.parse() {
                self.latency_ms = latency;
            }
        }

        if let Ok(val) = std::env::var("TANDEM_STEP_MS") {
            if let Ok(step) = val.parse() {
                self.step_ms = step;
            }
        }

        if let Ok(val) = std::env::var("TANDEM_LOOKAHEAD_MS") {
            if let Ok(lookahead) = val.parse() {
                self.sync.lookahead_ms = lookahead;
            }
        }
    }

    /// Checks the values the script depends on.
    pub fn validate(&self) -> Result<()> {
        if self.peers < 2 {
            anyhow::bail!("peers must be >= 2, got {}", self.peers);
        }
        if self.tracks.len() < 2 {
            anyhow::bail!("at least two tracks are required, got {}", self.tracks.len());
        }
        self.sync
            .validate()
            .context("Invalid sync configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: SimConfig = serde_yaml::from_str(
            "peers: 5\nlatency_ms: 80\nsync:\n  lookahead_ms: 500\n",
        )
        .unwrap();

        assert_eq!(config.peers, 5);
        assert_eq!(config.latency_ms, 80);
        assert_eq!(config.sync.lookahead_ms, 500);
        assert_eq!(config.sync.probe_interval_ms, 5000);
        assert_eq!(config.tracks.len(), 2);
    }

    #[test]
    fn single_peer_is_rejected() {
        let config = SimConfig {
            peers: 1,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
