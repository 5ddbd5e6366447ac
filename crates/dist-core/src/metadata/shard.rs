//! Shard and placement rows

use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::relation::RelationId;

/// Shard ID
pub type ShardId = u64;

/// Placement ID
pub type PlacementId = u64;

/// First value handed out by the shard id sequence
pub const FIRST_SHARD_ID: ShardId = 102008;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStorageType {
    Table,
    Foreign,
}

/// Value range covered by a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShardInterval {
    /// No bounds (reference, single-shard, citus-local, append)
    Unbounded,
    /// Inclusive range of hash tokens
    Hash { min: i32, max: i32 },
    /// Inclusive range of distribution column values, in text form
    Range { min: String, max: String },
}

impl ShardInterval {
    pub fn hash_bounds(&self) -> Option<(i32, i32)> {
        match self {
            ShardInterval::Hash { min, max } => Some((*min, *max)),
            _ => None,
        }
    }

    pub fn contains_hash(&self, token: i32) -> bool {
        match self {
            ShardInterval::Hash { min, max } => *min <= token && token <= *max,
            _ => false,
        }
    }

    /// (min, max) rendered as text, None for unbounded shards
    pub fn text_bounds(&self) -> Option<(String, String)> {
        match self {
            ShardInterval::Unbounded => None,
            ShardInterval::Hash { min, max } => Some((min.to_string(), max.to_string())),
            ShardInterval::Range { min, max } => Some((min.clone(), max.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub shard_id: ShardId,
    pub relation_id: RelationId,
    pub storage_type: ShardStorageType,
    pub interval: ShardInterval,
}

/// One shard's copy on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub placement_id: PlacementId,
    pub shard_id: ShardId,
    pub node_id: NodeId,
}
