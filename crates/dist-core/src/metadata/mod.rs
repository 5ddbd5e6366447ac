//! Distributed metadata definitions
//!
//! Contains the catalog rows the engine reads and writes: nodes, colocation
//! groups, table distribution records, shards, placements and the local
//! relation definitions they describe.

mod catalog;
mod colocation;
mod node;
mod relation;
mod shard;
mod table;

pub use catalog::{Catalog, CatalogStats, CatalogWrite, Sequences};
pub use colocation::{ColocationGroup, ColocationSignature, ReplicationFactor};
pub use node::{GroupId, Node, NodeId, NodeMetadata, NodeRole, COORDINATOR_GROUP_ID};
pub use relation::{
    Column, ColumnType, ForeignKey, Relation, RelationId, RelationKind, UniqueConstraint,
};
pub use shard::{
    Placement, PlacementId, Shard, ShardId, ShardInterval, ShardStorageType, FIRST_SHARD_ID,
};
pub use table::{
    ColocationId, DistributionColumn, DistributionMethod, ReplicationModel, TableDistribution,
    TableType, INVALID_COLOCATION_ID,
};
