// common/mod.rs

#![allow(dead_code)]

use dist_core::{
    ColumnType, Engine, EngineConfig, NodeId, NodeMetadata, RecordingExecutor, Relation,
    RelationId, RelationKind, WorkerCommand,
};
use std::sync::Arc;

pub const COORDINATOR_PORT: u16 = 5432;
pub const WORKER_PORT: u16 = 5433;

/// An engine wired to a recording executor
pub struct TestCluster {
    pub engine: Engine,
    pub executor: Arc<RecordingExecutor>,
    pub coordinator: Option<NodeId>,
    pub workers: Vec<NodeId>,
}

pub struct TestClusterBuilder {
    config: EngineConfig,
    coordinator: bool,
    workers: usize,
    metadata_workers: bool,
}

impl TestClusterBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                lock_timeout_ms: 200,
                ..EngineConfig::default()
            },
            coordinator: true,
            workers: 2,
            metadata_workers: false,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn without_coordinator(mut self) -> Self {
        self.coordinator = false;
        self
    }

    /// Workers receive metadata and get every propagated command
    pub fn metadata_workers(mut self) -> Self {
        self.metadata_workers = true;
        self
    }

    pub fn replication_factor(mut self, factor: u32) -> Self {
        self.config.shard_replication_factor = factor;
        self
    }

    pub fn config(mut self, update: impl FnOnce(&mut EngineConfig)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn build(self) -> TestCluster {
        let _ = tracing_subscriber::fmt::try_init();
        let executor = Arc::new(RecordingExecutor::new());
        let engine = Engine::new(self.config, executor.clone());

        let coordinator = if self.coordinator {
            Some(
                engine
                    .set_coordinator_host("coordinator", COORDINATOR_PORT)
                    .expect("register coordinator"),
            )
        } else {
            None
        };

        let mut workers = Vec::new();
        for i in 0..self.workers {
            let metadata = if self.metadata_workers {
                NodeMetadata::metadata_worker()
            } else {
                NodeMetadata::default()
            };
            let node_id = engine
                .add_node(&format!("worker-{}", i + 1), WORKER_PORT, metadata)
                .expect("add worker");
            workers.push(node_id);
        }
        executor.clear();

        TestCluster {
            engine,
            executor,
            coordinator,
            workers,
        }
    }
}

impl TestCluster {
    pub fn register(&self, relation: Relation) -> RelationId {
        let id = relation.id;
        self.engine.register_relation(relation).expect("register relation");
        id
    }

    /// Commands recorded since the last clear, without metadata statements
    pub fn data_commands(&self) -> Vec<(NodeId, WorkerCommand)> {
        self.executor
            .commands()
            .into_iter()
            .filter(|c| !c.command.is_metadata())
            .map(|c| (c.node_id, c.command))
            .collect()
    }

    pub fn metadata_commands(&self) -> Vec<(NodeId, String)> {
        self.executor
            .commands()
            .into_iter()
            .filter_map(|c| match c.command {
                WorkerCommand::Metadata(sql) => Some((c.node_id, sql)),
                _ => None,
            })
            .collect()
    }
}

// Relation builders

pub fn orders(id: RelationId) -> Relation {
    Relation::new(id, "orders")
        .with_column("order_id", ColumnType::Int8)
        .with_column("customer_id", ColumnType::Int8)
        .with_column("total", ColumnType::Numeric)
}

pub fn customers(id: RelationId) -> Relation {
    Relation::new(id, "customers")
        .with_column("customer_id", ColumnType::Int8)
        .with_column("name", ColumnType::Text)
        .with_primary_key(&["customer_id"])
}

pub fn countries(id: RelationId) -> Relation {
    Relation::new(id, "countries")
        .with_column("code", ColumnType::Text)
        .with_column("name", ColumnType::Text)
        .with_primary_key(&["code"])
}

pub fn table(id: RelationId, name: &str) -> Relation {
    Relation::new(id, name)
        .with_column("id", ColumnType::Int8)
        .with_column("payload", ColumnType::Jsonb)
}

/// A partitioned table and its partitions, parent first
pub fn partitioned(id: RelationId, name: &str, partitions: &[RelationId]) -> Vec<Relation> {
    let mut parent = table(id, name).with_kind(RelationKind::Partitioned);
    parent.partition_column = Some("id".to_string());
    let mut relations = vec![parent];
    for (i, partition_id) in partitions.iter().enumerate() {
        let mut partition = table(*partition_id, &format!("{}_p{}", name, i));
        partition.parent = Some(id);
        relations.push(partition);
    }
    relations
}
