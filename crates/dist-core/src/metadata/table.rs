//! Table distribution records

use serde::{Deserialize, Serialize};

use super::relation::{ColumnType, RelationId};

/// Colocation group ID
pub type ColocationId = u32;

/// Tables outside any colocation group (append, range, citus-local)
pub const INVALID_COLOCATION_ID: ColocationId = 0;

/// How rows are assigned to shards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMethod {
    /// No distribution column (reference, single-shard, citus-local)
    None,
    Hash,
    Range,
    Append,
}

impl DistributionMethod {
    /// Parse the textual method names accepted by entry points
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hash" => Some(Self::Hash),
            "range" => Some(Self::Range),
            "append" => Some(Self::Append),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Single-character code stored in propagated metadata
    pub fn code(&self) -> char {
        match self {
            DistributionMethod::None => 'n',
            DistributionMethod::Hash => 'h',
            DistributionMethod::Range => 'r',
            DistributionMethod::Append => 'a',
        }
    }
}

/// How writes to shard placements are replicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationModel {
    /// Statement-based replication driven by the coordinator
    Coordinator,
    /// Single placement per shard, replicated by the storage layer
    Streaming,
    /// Every placement written in one two-phase transaction
    TwoPhase,
}

impl ReplicationModel {
    pub fn code(&self) -> char {
        match self {
            ReplicationModel::Coordinator => 'c',
            ReplicationModel::Streaming => 's',
            ReplicationModel::TwoPhase => 't',
        }
    }
}

/// Classification of a table known to the distributed catalog.
/// Plain tables have no record and are represented as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    CitusLocal,
    Reference,
    HashDistributed,
    RangeDistributed,
    AppendDistributed,
    SingleShardDistributed,
}

impl TableType {
    /// Types created through the distributed-table path with parameters
    pub fn requires_distribution_params(&self) -> bool {
        matches!(
            self,
            TableType::HashDistributed
                | TableType::RangeDistributed
                | TableType::AppendDistributed
                | TableType::SingleShardDistributed
        )
    }

    pub fn has_distribution_column(&self) -> bool {
        matches!(
            self,
            TableType::HashDistributed | TableType::RangeDistributed | TableType::AppendDistributed
        )
    }

    pub fn distribution_method(&self) -> DistributionMethod {
        match self {
            TableType::HashDistributed => DistributionMethod::Hash,
            TableType::RangeDistributed => DistributionMethod::Range,
            TableType::AppendDistributed => DistributionMethod::Append,
            _ => DistributionMethod::None,
        }
    }

    /// Tables whose data is placed on workers
    pub fn is_distributed(&self) -> bool {
        !matches!(self, TableType::CitusLocal)
    }
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableType::CitusLocal => write!(f, "citus local"),
            TableType::Reference => write!(f, "reference"),
            TableType::HashDistributed => write!(f, "hash distributed"),
            TableType::RangeDistributed => write!(f, "range distributed"),
            TableType::AppendDistributed => write!(f, "append distributed"),
            TableType::SingleShardDistributed => write!(f, "single shard distributed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionColumn {
    pub name: String,
    /// Position in the relation's column list
    pub index: usize,
    pub column_type: ColumnType,
}

/// One row per distributed relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDistribution {
    pub relation_id: RelationId,
    pub method: DistributionMethod,
    /// Present iff method is hash, range or append
    pub distribution_column: Option<DistributionColumn>,
    pub colocation_id: ColocationId,
    pub replication_model: ReplicationModel,
    /// Added to metadata implicitly, e.g. through a foreign key
    pub auto_converted: bool,
}

impl TableDistribution {
    pub fn table_type(&self) -> TableType {
        match self.method {
            DistributionMethod::Hash => TableType::HashDistributed,
            DistributionMethod::Range => TableType::RangeDistributed,
            DistributionMethod::Append => TableType::AppendDistributed,
            DistributionMethod::None => {
                if self.replication_model == ReplicationModel::TwoPhase {
                    TableType::Reference
                } else if self.colocation_id == INVALID_COLOCATION_ID {
                    TableType::CitusLocal
                } else {
                    TableType::SingleShardDistributed
                }
            }
        }
    }

    pub fn distribution_column_type(&self) -> Option<ColumnType> {
        self.distribution_column.as_ref().map(|c| c.column_type)
    }
}
