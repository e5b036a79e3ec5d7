//! Configuration types for the Strata data node
//!
//! Loaded from a TOML file and merged with command-line flags by the binary.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::DEFAULT_BLOCK_SIZE;

/// Root configuration for a data node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataNodeConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DataNodeConfig {
    /// Parse a TOML document
    pub fn from_toml(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Reject configurations the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node.cluster_id.trim().is_empty() {
            return Err(Error::Configuration("node.cluster_id is empty".into()));
        }
        if self.storage.block_size == 0 {
            return Err(Error::Configuration("storage.block_size must be > 0".into()));
        }
        if self.storage.repair_queue_depth == 0 {
            return Err(Error::Configuration(
                "storage.repair_queue_depth must be > 0".into(),
            ));
        }
        let mut seen = HashSet::new();
        for disk in &self.storage.disks {
            if !seen.insert(&disk.path) {
                return Err(Error::Configuration(format!(
                    "duplicate disk path {}",
                    disk.path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Node identity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster identifier, prefixes every metrics key
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,
    /// Listen address for the packet protocol
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Address reported to the master
    #[serde(default)]
    pub advertise_addr: Option<String>,
    /// Rack name reported in heartbeats
    #[serde(default = "default_rack")]
    pub rack: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            listen: default_listen(),
            advertise_addr: None,
            rack: default_rack(),
        }
    }
}

fn default_cluster_id() -> String {
    "strata".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:6000".to_string()
}

fn default_rack() -> String {
    "default".to_string()
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Disks hosting partitions
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
    /// Full block size: pool unit and maximum stream frame payload
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Idle buffers retained by the full-block pool
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Pending repair-merge jobs before notifications are refused
    #[serde(default = "default_repair_queue_depth")]
    pub repair_queue_depth: usize,
    /// Interval between compaction worker passes
    #[serde(default = "default_compact_interval_secs")]
    pub compact_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            disks: Vec::new(),
            block_size: default_block_size(),
            pool_capacity: default_pool_capacity(),
            repair_queue_depth: default_repair_queue_depth(),
            compact_interval_secs: default_compact_interval_secs(),
        }
    }
}

const fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

const fn default_pool_capacity() -> usize {
    1024
}

const fn default_repair_queue_depth() -> usize {
    256
}

const fn default_compact_interval_secs() -> u64 {
    60
}

/// Configuration for a single disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Mount path of the disk
    pub path: PathBuf,
    /// Capacity in bytes available to partitions
    #[serde(default = "default_disk_capacity")]
    pub capacity: u64,
    /// Admitted compaction tasks before new notifies are refused
    #[serde(default = "default_max_compact_tasks")]
    pub max_compact_tasks: usize,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/strata/disk0"),
            capacity: default_disk_capacity(),
            max_compact_tasks: default_max_compact_tasks(),
        }
    }
}

const fn default_disk_capacity() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GB
}

const fn default_max_compact_tasks() -> usize {
    64
}

/// Master endpoints
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(default = "default_master_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            addrs: Vec::new(),
            timeout_ms: default_master_timeout_ms(),
        }
    }
}

const fn default_master_timeout_ms() -> u64 {
    5000
}

/// Prometheus endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: default_metrics_listen(),
        }
    }
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9500".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DataNodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.block_size, 128 * 1024);
    }

    #[test]
    fn test_validate_rejects_duplicate_disks() {
        let mut config = DataNodeConfig::default();
        config.storage.disks = vec![DiskConfig::default(), DiskConfig::default()];
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_toml_fills_defaults() {
        let config = DataNodeConfig::from_toml(
            r#"
            [node]
            cluster_id = "c1"

            [[storage.disks]]
            path = "/data/d1"
            capacity = 1024

            [master]
            addrs = ["10.0.0.1:17010"]
            "#,
        )
        .unwrap();
        assert_eq!(config.node.cluster_id, "c1");
        assert_eq!(config.storage.disks[0].capacity, 1024);
        assert_eq!(config.storage.disks[0].max_compact_tasks, 64);
        assert_eq!(config.master.timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let mut config = DataNodeConfig::default();
        config.storage.block_size = 0;
        assert!(config.validate().is_err());
    }
}
