//! Configuration system for hexdist.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HEXDIST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hexdist/config.toml
//!   3. ~/.config/hexdist/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::DEFAULT_MAX_FRAME_BYTES;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HexdistConfig {
    pub network: NetworkConfig,
    pub peers: PeerConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address peers connect to.
    pub peer_bind: String,
    /// TCP port peers connect to.
    pub peer_port: u16,
    /// Address of the HTTP API.
    pub api_bind: String,
    /// TCP port of the HTTP API.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// A peer that does not answer the benchmark job in time is rejected.
    pub benchmark_timeout_secs: u64,
    /// TCP keep-alive idle time and probe interval on peer sockets.
    pub keepalive_secs: u64,
    /// Largest accepted frame payload.
    pub max_frame_bytes: u32,
    /// power = power_constant / benchmark milliseconds.
    pub power_constant: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Dispatch attempts per job before it is failed for good.
    pub max_attempts: u32,
    /// How long a dequeued job stays locked without a renewal.
    pub lock_duration_secs: u64,
    /// How often expired locks are swept back to the waiting list.
    pub stalled_interval_secs: u64,
    /// A job stalling more often than this is failed.
    pub max_stalled_count: u32,
    /// Finished jobs kept around for result lookups. 0 = keep none.
    pub retain_finished: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consumer token presented to the queue backend on dequeue.
    pub consumer_token: String,
    /// Time in-flight dispatches get to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peer_bind: "0.0.0.0".to_string(),
            peer_port: 8089,
            api_bind: "127.0.0.1".to_string(),
            api_port: 8088,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            benchmark_timeout_secs: 60,
            keepalive_secs: 10,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            power_constant: 1e6,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            lock_duration_secs: 60,
            stalled_interval_secs: 30,
            max_stalled_count: 3,
            retain_finished: 1000,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            consumer_token: "hexdist-distributor".to_string(),
            shutdown_grace_secs: 30,
        }
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl PeerConfig {
    pub fn benchmark_timeout(&self) -> Duration {
        Duration::from_secs(self.benchmark_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

impl QueueConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_secs.max(1))
    }

    pub fn stalled_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_interval_secs.max(1))
    }
}

impl SchedulerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hexdist")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HexdistConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            HexdistConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HEXDIST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HexdistConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HEXDIST_* overrides. `lookup` is `std::env::var` outside tests.
    /// Unparseable values are ignored.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("HEXDIST_NETWORK__PEER_BIND") {
            self.network.peer_bind = v;
        }
        if let Some(p) = lookup("HEXDIST_NETWORK__PEER_PORT").and_then(|v| v.parse().ok()) {
            self.network.peer_port = p;
        }
        if let Some(v) = lookup("HEXDIST_NETWORK__API_BIND") {
            self.network.api_bind = v;
        }
        if let Some(p) = lookup("HEXDIST_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(s) =
            lookup("HEXDIST_PEERS__BENCHMARK_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.peers.benchmark_timeout_secs = s;
        }
        if let Some(n) = lookup("HEXDIST_QUEUE__MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.queue.max_attempts = n;
        }
    }
}
