//! Engine: committed catalog, lock table and the public operations
//!
//! Each public operation runs in its own transaction. Callers that need to
//! group several operations use [`Engine::run`] with the module functions
//! directly.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::colocation::ColocationParam;
use crate::config::EngineConfig;
use crate::error::{DistError, Result};
use crate::lock::{LockManager, LockMode, LockTag};
use crate::metadata::{
    Catalog, CatalogWrite, DistributionMethod, Node, NodeId, NodeMetadata, Relation, RelationId,
    RelationKind, Sequences, ShardId, TableType,
};
use crate::orchestrator::{self, DistributedTableParams};
use crate::registry;
use crate::remote::RemoteExecutor;
use crate::txn::Transaction;

pub struct Engine {
    config: EngineConfig,
    committed: RwLock<Catalog>,
    locks: LockManager,
    executor: Arc<dyn RemoteExecutor>,
    next_txn_id: AtomicU64,
}

impl Engine {
    /// Create an engine over an empty catalog
    pub fn new(config: EngineConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        let catalog = Catalog::new(config.cluster_name.clone());
        Self::with_catalog(config, catalog, executor)
    }

    /// Create an engine over a previously persisted catalog
    pub fn with_catalog(
        config: EngineConfig,
        catalog: Catalog,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        info!(
            "Engine started for cluster '{}' at catalog version {}",
            catalog.name, catalog.version
        );
        Self {
            locks: LockManager::new(config.lock_timeout()),
            config,
            committed: RwLock::new(catalog),
            executor,
            next_txn_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub(crate) fn executor(&self) -> &dyn RemoteExecutor {
        self.executor.as_ref()
    }

    /// Snapshot of the committed catalog
    pub fn catalog(&self) -> Catalog {
        self.committed.read().clone()
    }

    pub(crate) fn committed_catalog(&self) -> Catalog {
        self.catalog()
    }

    pub(crate) fn committed_sequences(&self) -> Sequences {
        self.committed.read().sequences.clone()
    }

    pub(crate) fn allocate<T>(&self, allocate: impl FnOnce(&mut Sequences) -> T) -> T {
        allocate(&mut self.committed.write().sequences)
    }

    /// Apply a committed write set, returning the new catalog version
    pub(crate) fn install(&self, writes: &[CatalogWrite]) -> u64 {
        let mut catalog = self.committed.write();
        for write in writes {
            catalog.apply(write);
        }
        catalog.touch();
        catalog.version
    }

    /// Start a transaction
    pub fn begin(&self) -> Transaction<'_> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        Transaction::new(self, id, self.committed_catalog())
    }

    /// Run `op` in a transaction, committing on success
    pub fn run<T>(&self, op: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut tx = self.begin();
        match op(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.abort();
                Err(e)
            }
        }
    }

    /// Classification of a relation, None for plain tables
    pub fn table_type(&self, relation_id: RelationId) -> Option<TableType> {
        self.committed.read().table_type(relation_id)
    }

    // Relations

    /// Register or replace a local relation definition
    pub fn register_relation(&self, relation: Relation) -> Result<()> {
        self.run(|tx| {
            // parent before child, and self-conflicting so that concurrent
            // attaches to one parent see each other's partition lists
            if let Some(parent_id) = relation.parent {
                tx.lock(LockTag::Relation(parent_id), LockMode::ShareUpdateExclusive)?;
            }
            tx.lock(LockTag::Relation(relation.id), LockMode::AccessExclusive)?;
            if let Some(parent_id) = relation.parent {
                let mut parent = tx
                    .catalog()
                    .relation(parent_id)
                    .cloned()
                    .ok_or_else(|| {
                        DistError::ineligible(
                            relation.name.clone(),
                            format!("parent relation {} does not exist", parent_id),
                        )
                    })?;
                if parent.kind != RelationKind::Partitioned {
                    return Err(DistError::ineligible(
                        relation.name.clone(),
                        format!("parent {} is not a partitioned table", parent.name),
                    ));
                }
                if !parent.partitions.contains(&relation.id) {
                    parent.partitions.push(relation.id);
                    tx.write(CatalogWrite::UpsertRelation(parent));
                }
            }
            info!("Registered relation {} ({})", relation.qualified_name(), relation.id);
            tx.write(CatalogWrite::UpsertRelation(relation));
            Ok(())
        })
    }

    /// Drop a relation together with its partitions and any distribution metadata
    pub fn drop_relation(&self, relation_id: RelationId) -> Result<()> {
        self.run(|tx| orchestrator::drop_table(tx, relation_id))
    }

    /// Update the number of locally stored rows
    pub fn set_row_count(&self, relation_id: RelationId, row_count: u64) -> Result<()> {
        self.run(|tx| {
            tx.lock(LockTag::Relation(relation_id), LockMode::RowExclusive)?;
            let mut relation = tx
                .catalog()
                .relation(relation_id)
                .cloned()
                .ok_or_else(|| {
                    DistError::ineligible(relation_id.to_string(), "relation does not exist")
                })?;
            relation.row_count = row_count;
            tx.write(CatalogWrite::UpsertRelation(relation));
            Ok(())
        })
    }

    // Node registry

    pub fn add_node(&self, name: &str, port: u16, metadata: NodeMetadata) -> Result<NodeId> {
        self.run(|tx| registry::add_node(tx, name, port, &metadata))
    }

    pub fn set_coordinator_host(&self, name: &str, port: u16) -> Result<NodeId> {
        self.run(|tx| registry::set_coordinator_host(tx, name, port))
    }

    pub fn activate_node(&self, node_id: NodeId) -> Result<()> {
        self.run(|tx| registry::activate_node(tx, node_id))
    }

    pub fn disable_node(&self, node_id: NodeId) -> Result<()> {
        self.run(|tx| registry::disable_node(tx, node_id))
    }

    pub fn remove_node(&self, node_id: NodeId) -> Result<()> {
        self.run(|tx| registry::remove_node(tx, node_id))
    }

    pub fn set_node_should_have_shards(&self, node_id: NodeId, value: bool) -> Result<()> {
        self.run(|tx| registry::set_node_should_have_shards(tx, node_id, value))
    }

    pub fn sync_metadata_to_node(&self, node_id: NodeId) -> Result<()> {
        self.run(|tx| registry::sync_metadata_to_node(tx, node_id))
    }

    pub fn find_node_by_id(&self, node_id: NodeId) -> Result<Node> {
        self.run(|tx| registry::find_node_by_id(tx, node_id))
    }

    pub fn list_active_primary_workers(&self, mode: LockMode) -> Result<Vec<Node>> {
        self.run(|tx| registry::list_active_primary_workers(tx, mode))
    }

    // Table conversions

    pub fn create_distributed_table(
        &self,
        relation_id: RelationId,
        distribution_column: &str,
        method: DistributionMethod,
        shard_count: u32,
        shard_count_is_strict: bool,
        colocate_with: &str,
    ) -> Result<()> {
        self.run(|tx| {
            orchestrator::create_distributed_table(
                tx,
                relation_id,
                distribution_column,
                method,
                shard_count,
                shard_count_is_strict,
                colocate_with,
            )
        })
    }

    pub fn create_single_shard_table(
        &self,
        relation_id: RelationId,
        colocation: ColocationParam<'_>,
    ) -> Result<()> {
        self.run(|tx| orchestrator::create_single_shard_table(tx, relation_id, colocation))
    }

    pub fn create_reference_table(&self, relation_id: RelationId) -> Result<()> {
        self.run(|tx| orchestrator::create_reference_table(tx, relation_id))
    }

    pub fn add_local_table_to_metadata(&self, relation_id: RelationId) -> Result<()> {
        self.run(|tx| orchestrator::add_local_table_to_metadata(tx, relation_id, false))
    }

    pub fn convert_citus_local_table_to_table_type(
        &self,
        relation_id: RelationId,
        table_type: TableType,
        params: Option<&DistributedTableParams<'_>>,
    ) -> Result<()> {
        self.run(|tx| {
            orchestrator::convert_citus_local_table_to_table_type(
                tx,
                relation_id,
                table_type,
                params,
            )
        })
    }

    pub fn undistribute_table(&self, relation_id: RelationId) -> Result<()> {
        self.run(|tx| orchestrator::undistribute_table(tx, relation_id, false))
    }

    /// Add a shard to an append or range distributed table
    pub fn create_empty_shard(
        &self,
        relation_id: RelationId,
        min_value: Option<&str>,
        max_value: Option<&str>,
    ) -> Result<ShardId> {
        self.run(|tx| orchestrator::create_empty_shard(tx, relation_id, min_value, max_value))
    }

    pub fn ensure_reference_tables_exist_on_all_nodes(&self) -> Result<()> {
        self.run(orchestrator::ensure_reference_tables_exist_on_all_nodes)
    }
}
