//! Engine configuration
//!
//! Cluster-wide settings are carried in an explicit context object so that
//! independent engines (e.g. in tests) never share global state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of shards a hash-distributed table may have
pub const MAX_SHARD_COUNT: u32 = 64000;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cluster name assigned to nodes added without an explicit one
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Default shard count for hash-distributed tables
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    /// Number of placements per shard for hash-distributed tables
    #[serde(default = "default_shard_replication_factor")]
    pub shard_replication_factor: u32,
    /// Propagate metadata changes to metadata-synced nodes
    #[serde(default = "default_enable_metadata_sync")]
    pub enable_metadata_sync: bool,
    /// Replicate reference tables to a node as soon as it is added
    #[serde(default)]
    pub replicate_reference_tables_on_activate: bool,
    /// Host used when the coordinator registers itself on an empty cluster
    #[serde(default = "default_coordinator_host")]
    pub coordinator_host: String,
    /// Port used when the coordinator registers itself on an empty cluster
    #[serde(default = "default_coordinator_port")]
    pub coordinator_port: u16,
    /// How long a lock request waits for a conflicting holder (milliseconds)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            shard_count: default_shard_count(),
            shard_replication_factor: default_shard_replication_factor(),
            enable_metadata_sync: default_enable_metadata_sync(),
            replicate_reference_tables_on_activate: false,
            coordinator_host: default_coordinator_host(),
            coordinator_port: default_coordinator_port(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Get lock timeout as Duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: EngineConfig) {
        if !other.cluster_name.is_empty() {
            self.cluster_name = other.cluster_name;
        }
        if other.shard_count > 0 {
            self.shard_count = other.shard_count;
        }
        if other.shard_replication_factor > 0 {
            self.shard_replication_factor = other.shard_replication_factor;
        }
        self.enable_metadata_sync = other.enable_metadata_sync;
        self.replicate_reference_tables_on_activate = other.replicate_reference_tables_on_activate;
        if !other.coordinator_host.is_empty() {
            self.coordinator_host = other.coordinator_host;
        }
        if other.coordinator_port > 0 {
            self.coordinator_port = other.coordinator_port;
        }
        if other.lock_timeout_ms > 0 {
            self.lock_timeout_ms = other.lock_timeout_ms;
        }
    }
}

// Default value functions

fn default_cluster_name() -> String {
    "default".to_string()
}

fn default_shard_count() -> u32 {
    32
}

fn default_shard_replication_factor() -> u32 {
    1
}

fn default_enable_metadata_sync() -> bool {
    true
}

fn default_coordinator_host() -> String {
    "localhost".to_string()
}

fn default_coordinator_port() -> u16 {
    5432
}

fn default_lock_timeout_ms() -> u64 {
    5000 // 5 seconds
}
