//! Colocation groups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::relation::ColumnType;
use super::table::ColocationId;

/// Placements per shard for tables in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationFactor {
    Fixed(u32),
    /// One placement on every active primary (reference tables)
    AllNodes,
}

impl ReplicationFactor {
    /// Numeric form used in propagated metadata, -1 for all nodes
    pub fn as_i32(&self) -> i32 {
        match self {
            ReplicationFactor::Fixed(n) => *n as i32,
            ReplicationFactor::AllNodes => -1,
        }
    }
}

/// Properties every table in a group shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColocationSignature {
    pub shard_count: u32,
    pub replication_factor: ReplicationFactor,
    /// None for groups without a distribution column
    pub distribution_column_type: Option<ColumnType>,
}

impl ColocationSignature {
    pub fn hash(shard_count: u32, replication_factor: u32, column_type: ColumnType) -> Self {
        Self {
            shard_count,
            replication_factor: ReplicationFactor::Fixed(replication_factor),
            distribution_column_type: Some(column_type),
        }
    }

    /// Pseudo-distribution signature shared by single-shard tables
    pub fn single_shard() -> Self {
        Self {
            shard_count: 1,
            replication_factor: ReplicationFactor::Fixed(1),
            distribution_column_type: None,
        }
    }

    pub fn reference() -> Self {
        Self {
            shard_count: 1,
            replication_factor: ReplicationFactor::AllNodes,
            distribution_column_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColocationGroup {
    pub colocation_id: ColocationId,
    pub signature: ColocationSignature,
    pub created_at: DateTime<Utc>,
}

impl ColocationGroup {
    pub fn new(colocation_id: ColocationId, signature: ColocationSignature) -> Self {
        Self {
            colocation_id,
            signature,
            created_at: Utc::now(),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.signature.shard_count
    }

    pub fn replication_factor(&self) -> ReplicationFactor {
        self.signature.replication_factor
    }
}
