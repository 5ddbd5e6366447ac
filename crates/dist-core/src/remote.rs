//! Remote execution seam
//!
//! Commands addressed to other nodes are described as [`WorkerCommand`]
//! values and handed to a [`RemoteExecutor`] when the issuing transaction
//! commits. Connection handling and retries belong to the executor.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::metadata::{Node, NodeId};
use crate::sql::quote_literal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("node {node} rejected command: {message}")]
    CommandFailed { node: String, message: String },

    #[error("node {0} is unreachable")]
    Unreachable(String),
}

/// Work to perform on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Create the physical table backing a shard
    CreateShardTable {
        shard_name: String,
        columns_sql: String,
        foreign: bool,
        /// Parent shard to attach to, for partitions of distributed tables
        parent_shard: Option<String>,
    },
    DropShardTable { shard_name: String },
    /// Copy rows of the local relation into a shard
    CopyLocalRows {
        relation: String,
        shard_name: String,
        distribution_column: Option<String>,
        /// Only rows whose hash token falls into this inclusive range
        hash_range: Option<(i32, i32)>,
    },
    /// Copy a shard from another placement
    CopyShardPlacement {
        shard_name: String,
        source_host: String,
        source_port: u16,
    },
    /// Copy a shard's rows back into the local relation
    CopyShardToLocal { shard_name: String, relation: String },
    /// Idempotent metadata statement
    Metadata(String),
}

impl WorkerCommand {
    pub fn to_sql(&self) -> String {
        match self {
            WorkerCommand::CreateShardTable {
                shard_name,
                columns_sql,
                foreign,
                parent_shard,
            } => {
                let mut sql = if *foreign {
                    format!(
                        "CREATE FOREIGN TABLE IF NOT EXISTS {} ({})",
                        shard_name, columns_sql
                    )
                } else {
                    format!("CREATE TABLE IF NOT EXISTS {} ({})", shard_name, columns_sql)
                };
                if let Some(parent) = parent_shard {
                    sql.push_str(&format!(
                        "; SELECT worker_attach_partition_shard({}, {})",
                        quote_literal(parent),
                        quote_literal(shard_name)
                    ));
                }
                sql
            }
            WorkerCommand::DropShardTable { shard_name } => {
                format!("DROP TABLE IF EXISTS {} CASCADE", shard_name)
            }
            WorkerCommand::CopyLocalRows {
                relation,
                shard_name,
                distribution_column,
                hash_range,
            } => match (distribution_column, hash_range) {
                (Some(column), Some((min, max))) => format!(
                    "INSERT INTO {} SELECT * FROM {} WHERE worker_hash({}) BETWEEN {} AND {}",
                    shard_name, relation, column, min, max
                ),
                _ => format!("INSERT INTO {} SELECT * FROM {}", shard_name, relation),
            },
            WorkerCommand::CopyShardPlacement {
                shard_name,
                source_host,
                source_port,
            } => format!(
                "SELECT worker_copy_shard_placement({}, {}, {})",
                quote_literal(shard_name),
                quote_literal(source_host),
                source_port
            ),
            WorkerCommand::CopyShardToLocal {
                shard_name,
                relation,
            } => format!("INSERT INTO {} SELECT * FROM {}", relation, shard_name),
            WorkerCommand::Metadata(sql) => sql.clone(),
        }
    }

    /// Whether this is a metadata statement
    pub fn is_metadata(&self) -> bool {
        matches!(self, WorkerCommand::Metadata(_))
    }
}

/// Delivers commands to nodes
pub trait RemoteExecutor: Send + Sync {
    /// Run one command on `node` and wait for completion
    fn execute(&self, node: &Node, command: &WorkerCommand) -> Result<(), RemoteError>;
}

/// A delivered command
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCommand {
    pub node_id: NodeId,
    pub address: String,
    pub command: WorkerCommand,
}

#[derive(Debug, Clone, Copy)]
enum FailurePlan {
    /// Fail the command once this many further commands succeeded
    AfterCommands(usize),
    OnNode(NodeId),
}

/// Executor that records every command instead of running it
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<ExecutedCommand>>,
    failure: Mutex<Option<FailurePlan>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// All commands delivered so far, in order
    pub fn commands(&self) -> Vec<ExecutedCommand> {
        self.executed.lock().clone()
    }

    pub fn commands_for(&self, node_id: NodeId) -> Vec<WorkerCommand> {
        self.executed
            .lock()
            .iter()
            .filter(|c| c.node_id == node_id)
            .map(|c| c.command.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.executed.lock().clear();
    }

    /// Let `count` commands succeed, then fail the next one
    pub fn fail_after(&self, count: usize) {
        *self.failure.lock() = Some(FailurePlan::AfterCommands(count));
    }

    /// Fail every command addressed to `node_id`
    pub fn fail_on_node(&self, node_id: NodeId) {
        *self.failure.lock() = Some(FailurePlan::OnNode(node_id));
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }
}

impl RemoteExecutor for RecordingExecutor {
    fn execute(&self, node: &Node, command: &WorkerCommand) -> Result<(), RemoteError> {
        let mut failure = self.failure.lock();
        let fail = match *failure {
            Some(FailurePlan::AfterCommands(0)) => {
                *failure = None;
                true
            }
            Some(FailurePlan::AfterCommands(remaining)) => {
                *failure = Some(FailurePlan::AfterCommands(remaining - 1));
                false
            }
            Some(FailurePlan::OnNode(node_id)) => node_id == node.node_id,
            None => false,
        };
        drop(failure);

        if fail {
            return Err(RemoteError::CommandFailed {
                node: node.address(),
                message: "injected failure".to_string(),
            });
        }

        self.executed.lock().push(ExecutedCommand {
            node_id: node.node_id,
            address: node.address(),
            command: command.clone(),
        });
        Ok(())
    }
}
