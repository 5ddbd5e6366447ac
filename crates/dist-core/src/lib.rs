//! Table distribution engine
//!
//! Converts plain tables into sharded, reference or single-shard tables and
//! keeps the cluster-wide shard map consistent while doing so.
//!
//! # Components
//! - [`registry`]: cluster membership (nodes, groups, roles)
//! - [`colocation`]: maps distribution parameters to colocation groups
//! - [`planner`]: decides which shards to create and where to place them
//! - [`orchestrator`]: drives table state transitions under a fixed lock order
//! - [`propagation`]: replicates metadata changes to metadata-synced nodes
//!
//! Every operation runs inside one [`Transaction`]: catalog writes are only
//! installed on commit, and remote commands are queued until then.
//!
//! # Usage Example
//! ```ignore
//! use std::sync::Arc;
//! use dist_core::{Engine, EngineConfig, NodeMetadata, RecordingExecutor};
//!
//! let engine = Engine::new(EngineConfig::default(), Arc::new(RecordingExecutor::new()));
//! engine.add_node("worker-1", 5432, NodeMetadata::default())?;
//! engine.create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 32, false, "default")?;
//! ```

pub mod colocation;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod metadata;
pub mod orchestrator;
pub mod planner;
pub mod propagation;
pub mod registry;
pub mod remote;
pub mod sql;
pub mod txn;

// Re-export commonly used types
pub use colocation::ColocationParam;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{DistError, Result};
pub use lock::{LockManager, LockMode, LockTag};
pub use metadata::{
    Catalog, CatalogWrite, ColocationGroup, ColocationId, Column, ColumnType, DistributionMethod,
    ForeignKey, Node, NodeId, NodeMetadata, NodeRole, Placement, Relation, RelationId,
    RelationKind, ReplicationModel, Shard, ShardId, ShardInterval, TableDistribution, TableType,
    UniqueConstraint, INVALID_COLOCATION_ID,
};
pub use orchestrator::DistributedTableParams;
pub use remote::{RecordingExecutor, RemoteError, RemoteExecutor, WorkerCommand};
pub use txn::Transaction;
