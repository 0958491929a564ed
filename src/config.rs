//! Unified configuration for the graph engine's processes.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config
//! file > Defaults.
//!
//! # Example config file (taograph.toml)
//! ```toml
//! [shard]
//! listen = "0.0.0.0:50061"
//! id = 0
//! num_shards = 4
//! store_mode = "log"
//! mode = "construct"
//! node_file = "/data/shard0.node"
//! edge_file = "/data/shard0.edge"
//!
//! [aggregator]
//! listen = "0.0.0.0:50060"
//! shards = ["shard-0:50061", "shard-1:50061", "shard-2:50061", "shard-3:50061"]
//! pool_size = 4
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::Result;
use crate::model::StoreMode;

/// Whether a shard builds indices from TSV or maps prebuilt artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    #[default]
    Construct,
    Load,
}

/// Main configuration for every process of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub shard: ShardConfig,
    pub aggregator: AggregatorConfig,
    pub bench: BenchConfig,
}

impl GraphConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults.
    /// A malformed file or environment surfaces as `StoreError::Config`.
    pub fn load(config_path: Option<&str>, overrides: ConfigOverrides) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(GraphConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("TAOGRAPH_").split("_"));
        figment = figment.merge(Serialized::defaults(overrides));
        Ok(figment.extract()?)
    }

    /// Load from environment and optional config file only.
    pub fn from_env(config_path: Option<&str>) -> Result<Self> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// Shard process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Shard ID (0-indexed)
    pub id: u32,
    /// Partition modulus shared with the aggregator
    pub num_shards: u32,
    /// Which store tier this process hosts
    pub store_mode: StoreMode,
    /// Build indices from TSV vs. map prebuilt artifacts
    pub mode: BuildMode,
    /// Node table input (TSV in construct mode)
    pub node_file: Option<PathBuf>,
    /// Edge table input (TSV in construct mode)
    pub edge_file: Option<PathBuf>,
    /// Fixed attribute count of node records
    pub num_attrs: usize,
    /// Log entries before an automatic seal
    pub seal_threshold: u64,
    /// Forwarded to the compression collaborator
    pub sa_sampling_rate: u32,
    pub isa_sampling_rate: u32,
    pub npa_sampling_rate: u32,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:50061".parse().unwrap(),
            id: 0,
            num_shards: 1,
            store_mode: StoreMode::default(),
            mode: BuildMode::default(),
            node_file: None,
            edge_file: None,
            num_attrs: 2,
            seal_threshold: 65_536,
            sa_sampling_rate: 32,
            isa_sampling_rate: 64,
            npa_sampling_rate: 128,
        }
    }
}

/// Aggregator process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Shard addresses in shard-id order (prefixed with http:// if bare)
    pub shards: Vec<String>,
    /// Channels opened to each shard
    pub pool_size: usize,
    /// Fail whole fan-outs on any shard failure instead of degrading
    pub strict_fanout: bool,
    /// Per-RPC timeout in milliseconds
    pub rpc_timeout_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:50060".parse().unwrap(),
            shards: vec!["127.0.0.1:50061".to_string()],
            pool_size: 4,
            strict_fanout: false,
            rpc_timeout_ms: 10_000,
        }
    }
}

impl AggregatorConfig {
    /// Shard endpoint URLs in shard-id order, ready for the connection
    /// pools: entries are trimmed, blanks dropped, and bare `host:port`
    /// addresses get an `http` scheme. Position in the list IS the shard id,
    /// so callers must keep the configured order.
    pub fn shard_endpoints(&self) -> Vec<String> {
        self.shards
            .iter()
            .map(|addr| addr.trim())
            .filter(|addr| !addr.is_empty())
            .map(|addr| {
                if addr.contains("://") {
                    addr.to_string()
                } else {
                    format!("http://{addr}")
                }
            })
            .collect()
    }
}

/// Benchmark driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Aggregator address
    pub aggregator: String,
    /// Driver threads; each owns one connection
    pub threads: usize,
    pub warmup_secs: u64,
    pub measure_secs: u64,
    pub cooldown_secs: u64,
    /// Append-only per-thread summary output
    pub output: PathBuf,
    /// Directory holding the query parameter files
    pub query_dir: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            aggregator: "127.0.0.1:50060".to_string(),
            threads: 1,
            warmup_secs: 60,
            measure_secs: 120,
            cooldown_secs: 5,
            output: PathBuf::from("throughput_tao_mix.txt"),
            query_dir: None,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<AggregatorOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bench: Option<BenchOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_shards: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_mode: Option<StoreMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<BuildMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_attrs: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_fanout: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.shard.id, 0);
        assert_eq!(config.shard.num_shards, 1);
        assert_eq!(config.shard.sa_sampling_rate, 32);
        assert_eq!(config.bench.warmup_secs, 60);
        assert_eq!(config.bench.measure_secs, 120);
        assert_eq!(config.bench.cooldown_secs, 5);
    }

    #[test]
    fn shard_endpoints_follow_configured_order() {
        let config = AggregatorConfig {
            shards: vec![
                " shard-0:50061 ".to_string(),
                "https://shard-1:50061".to_string(),
                String::new(),
                "shard-2:50061".to_string(),
            ],
            ..AggregatorConfig::default()
        };
        assert_eq!(
            config.shard_endpoints(),
            vec![
                "http://shard-0:50061",
                "https://shard-1:50061",
                "http://shard-2:50061",
            ]
        );
    }

    #[test]
    fn malformed_config_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taograph.toml");
        std::fs::write(&path, "[shard\nid =").unwrap();
        let err = GraphConfig::load(path.to_str(), ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_store_mode_serde() {
        let json = serde_json::to_string(&StoreMode::Suffix).unwrap();
        assert_eq!(json, "\"suffix\"");
        let mode: StoreMode = serde_json::from_str("\"log\"").unwrap();
        assert_eq!(mode, StoreMode::Log);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = ConfigOverrides {
            shard: Some(ShardOverrides {
                id: Some(3),
                num_shards: Some(8),
                ..ShardOverrides::default()
            }),
            ..ConfigOverrides::default()
        };
        let config = GraphConfig::load(None, overrides).unwrap();
        assert_eq!(config.shard.id, 3);
        assert_eq!(config.shard.num_shards, 8);
        // Untouched fields keep their defaults.
        assert_eq!(config.shard.npa_sampling_rate, 128);
    }
}
