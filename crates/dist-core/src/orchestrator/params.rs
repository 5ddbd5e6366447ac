//! Distribution parameters

use crate::colocation::ColocationParam;
use crate::config::EngineConfig;
use crate::metadata::{DistributionMethod, ReplicationModel, TableType};

/// Parameters of a distributed (sharded) table request.
///
/// Borrows its strings so per-partition copies can live in a scratch arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedTableParams<'a> {
    pub colocation: ColocationParam<'a>,
    pub shard_count: u32,
    /// Fail instead of adopting the shard count of the colocation target
    pub shard_count_is_strict: bool,
    /// None for single-shard tables
    pub distribution_column: Option<&'a str>,
}

impl<'a> DistributedTableParams<'a> {
    pub fn hash(column: &'a str, shard_count: u32) -> Self {
        Self {
            colocation: ColocationParam::Default,
            shard_count,
            shard_count_is_strict: false,
            distribution_column: Some(column),
        }
    }

    pub fn single_shard(colocation: ColocationParam<'a>) -> Self {
        Self {
            colocation,
            shard_count: 1,
            shard_count_is_strict: true,
            distribution_column: None,
        }
    }

    /// Parameters for a partition: same column and shard count, colocated
    /// with the parent, shard count not strict
    pub fn for_partition(&self, parent_name: &'a str) -> DistributedTableParams<'a> {
        DistributedTableParams {
            colocation: ColocationParam::Table(parent_name),
            shard_count: self.shard_count,
            shard_count_is_strict: false,
            distribution_column: self.distribution_column,
        }
    }
}

/// Distribution method and replication model implied by a table type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CitusTableParams {
    pub distribution_method: DistributionMethod,
    pub replication_model: ReplicationModel,
}

pub fn decide_citus_table_params(config: &EngineConfig, table_type: TableType) -> CitusTableParams {
    let (distribution_method, replication_model) = match table_type {
        TableType::HashDistributed => {
            let model = if config.shard_replication_factor > 1 {
                ReplicationModel::Coordinator
            } else {
                ReplicationModel::Streaming
            };
            (DistributionMethod::Hash, model)
        }
        TableType::AppendDistributed => (DistributionMethod::Append, ReplicationModel::Coordinator),
        TableType::RangeDistributed => (DistributionMethod::Range, ReplicationModel::Coordinator),
        TableType::Reference => (DistributionMethod::None, ReplicationModel::TwoPhase),
        TableType::SingleShardDistributed | TableType::CitusLocal => {
            (DistributionMethod::None, ReplicationModel::Streaming)
        }
    };
    CitusTableParams {
        distribution_method,
        replication_model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_replication_model_follows_factor() {
        let mut config = EngineConfig::default();
        let params = decide_citus_table_params(&config, TableType::HashDistributed);
        assert_eq!(params.replication_model, ReplicationModel::Streaming);

        config.shard_replication_factor = 2;
        let params = decide_citus_table_params(&config, TableType::HashDistributed);
        assert_eq!(params.replication_model, ReplicationModel::Coordinator);
    }

    #[test]
    fn test_partition_params() {
        let parent = DistributedTableParams {
            shard_count_is_strict: true,
            ..DistributedTableParams::hash("tenant_id", 8)
        };
        let child = parent.for_partition("public.events");
        assert_eq!(child.colocation, ColocationParam::Table("public.events"));
        assert_eq!(child.shard_count, 8);
        assert!(!child.shard_count_is_strict);
        assert_eq!(child.distribution_column, Some("tenant_id"));
    }
}
