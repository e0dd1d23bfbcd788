//! Configuration system for shardcast.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SHARDCAST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/shardcast/config.toml
//!   3. ~/.config/shardcast/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest accepted `max_records_per_response`.
pub const MIN_RECORDS_PER_RESPONSE: usize = 5;

/// Smallest accepted accumulator window.
pub const MIN_MAX_ALLOWED_TIME_MS: u64 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardcastConfig {
    pub node: NodeConfig,
    pub resolver: ResolverConfig,
    pub broadcaster: BroadcasterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Number of shards in the network. Must be > 0.
    pub num_shards: u32,
    /// Shard of this node.
    pub self_shard: u32,
    /// Number of in-process nodes the daemon simulates.
    pub nodes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Records per response, and chunk size for chunk requests.
    /// Protocol-wide: every node must use the same value.
    pub max_records_per_response: usize,
    /// Max inbound requests processed concurrently.
    pub max_in_flight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Longest an item waits in the accumulator.
    pub max_allowed_time_ms: u64,
    /// Random jitter subtracted from the window. Must be below max_allowed_time_ms.
    pub max_deviation_time_ms: u64,
    /// Byte ceiling of one broadcast packet.
    pub max_packet_bytes: usize,
    /// Seconds between sent-transactions reports.
    pub report_every_ticks: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            num_shards: 2,
            self_shard: 0,
            nodes: 12,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_records_per_response: MIN_RECORDS_PER_RESPONSE,
            max_in_flight: 100,
        }
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            max_allowed_time_ms: 250,
            max_deviation_time_ms: 25,
            max_packet_bytes: crate::wire::MAX_BULK_TRANSACTION_SIZE,
            report_every_ticks: 20,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("shardcast")
}

fn home_dir() -> PathBuf {
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
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ShardcastConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ShardcastConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SHARDCAST_CONFIG")
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
            let text = toml::to_string_pretty(&ShardcastConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject values the components would refuse at construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.num_shards == 0 {
            return Err(ConfigError::Invalid {
                field: "node.num_shards",
                reason: "must be greater than zero".into(),
            });
        }
        if self.node.self_shard >= self.node.num_shards {
            return Err(ConfigError::Invalid {
                field: "node.self_shard",
                reason: format!("must be below num_shards ({})", self.node.num_shards),
            });
        }
        if self.node.nodes == 0 {
            return Err(ConfigError::Invalid {
                field: "node.nodes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.resolver.max_records_per_response < MIN_RECORDS_PER_RESPONSE {
            return Err(ConfigError::Invalid {
                field: "resolver.max_records_per_response",
                reason: format!("must be at least {MIN_RECORDS_PER_RESPONSE}"),
            });
        }
        if self.resolver.max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "resolver.max_in_flight",
                reason: "must be greater than zero".into(),
            });
        }
        let b = &self.broadcaster;
        if b.max_allowed_time_ms < MIN_MAX_ALLOWED_TIME_MS {
            return Err(ConfigError::Invalid {
                field: "broadcaster.max_allowed_time_ms",
                reason: format!("must be at least {MIN_MAX_ALLOWED_TIME_MS}"),
            });
        }
        if b.max_deviation_time_ms >= b.max_allowed_time_ms {
            return Err(ConfigError::Invalid {
                field: "broadcaster.max_deviation_time_ms",
                reason: "must be below max_allowed_time_ms".into(),
            });
        }
        if b.max_packet_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "broadcaster.max_packet_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Apply SHARDCAST_* env var overrides.
    fn apply_env_overrides(&mut self) {
        override_from_env("SHARDCAST_NODE__NUM_SHARDS", &mut self.node.num_shards);
        override_from_env("SHARDCAST_NODE__SELF_SHARD", &mut self.node.self_shard);
        override_from_env("SHARDCAST_NODE__NODES", &mut self.node.nodes);
        override_from_env(
            "SHARDCAST_RESOLVER__MAX_RECORDS_PER_RESPONSE",
            &mut self.resolver.max_records_per_response,
        );
        override_from_env(
            "SHARDCAST_RESOLVER__MAX_IN_FLIGHT",
            &mut self.resolver.max_in_flight,
        );
        override_from_env(
            "SHARDCAST_BROADCASTER__MAX_ALLOWED_TIME_MS",
            &mut self.broadcaster.max_allowed_time_ms,
        );
        override_from_env(
            "SHARDCAST_BROADCASTER__MAX_DEVIATION_TIME_MS",
            &mut self.broadcaster.max_deviation_time_ms,
        );
        override_from_env(
            "SHARDCAST_BROADCASTER__MAX_PACKET_BYTES",
            &mut self.broadcaster.max_packet_bytes,
        );
        override_from_env(
            "SHARDCAST_BROADCASTER__REPORT_EVERY_TICKS",
            &mut self.broadcaster.report_every_ticks,
        );
    }
}

/// Unparseable values are ignored and the previous value kept.
fn override_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}
