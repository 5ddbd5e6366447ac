//! Shard placement planner
//!
//! Decides which shards a table gets and on which nodes they are placed.
//! The placement math lives in small pure functions; the planning entry
//! points gather their inputs from the catalog under the registry lock.

use tracing::debug;

use crate::error::{DistError, Result};
use crate::lock::LockMode;
use crate::metadata::{
    ColocationId, Node, Placement, Relation, RelationId, ReplicationFactor, Shard, ShardInterval,
    ShardStorageType, TableType,
};
use crate::registry;
use crate::txn::Transaction;

/// Number of distinct 32-bit hash tokens
const HASH_TOKEN_COUNT: i64 = 1 << 32;

/// Shards and placements to create for one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardPlan {
    pub shards: Vec<Shard>,
    pub placements: Vec<Placement>,
}

impl ShardPlan {
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn placements_of(&self, shard_id: u64) -> impl Iterator<Item = &Placement> {
        self.placements.iter().filter(move |p| p.shard_id == shard_id)
    }
}

/// Split the signed 32-bit hash space into `shard_count` contiguous ranges.
///
/// Each range spans 2^32 / N tokens; the last one absorbs the remainder and
/// ends at `i32::MAX`.
pub fn hash_intervals(shard_count: u32) -> Vec<(i32, i32)> {
    if shard_count == 0 {
        return Vec::new();
    }
    let increment = HASH_TOKEN_COUNT / shard_count as i64;
    (0..shard_count as i64)
        .map(|i| {
            let min = i32::MIN as i64 + i * increment;
            let max = if i == shard_count as i64 - 1 {
                i32::MAX as i64
            } else {
                min + increment - 1
            };
            (min as i32, max as i32)
        })
        .collect()
}

/// Node indexes for every replica of every shard: replica `r` of shard `i`
/// goes to `(offset + i + r) mod node_count`.
pub fn round_robin_assignment(
    node_count: usize,
    shard_count: usize,
    replication_factor: usize,
    offset: usize,
) -> Vec<Vec<usize>> {
    if node_count == 0 {
        return vec![Vec::new(); shard_count];
    }
    (0..shard_count)
        .map(|i| {
            (0..replication_factor)
                .map(|r| (offset + i + r) % node_count)
                .collect()
        })
        .collect()
}

/// Node index for the first single-shard table of a colocation group
pub fn single_shard_node_index(colocation_id: ColocationId, node_count: usize) -> usize {
    if node_count == 0 {
        return 0;
    }
    colocation_id as usize % node_count
}

fn storage_type(relation: &Relation) -> ShardStorageType {
    if relation.is_foreign() {
        ShardStorageType::Foreign
    } else {
        ShardStorageType::Table
    }
}

fn relation_or_error(tx: &Transaction<'_>, relation_id: RelationId) -> Result<Relation> {
    tx.catalog()
        .relation(relation_id)
        .cloned()
        .ok_or_else(|| DistError::ineligible(relation_id.to_string(), "relation does not exist"))
}

fn check_replication_factor(replication_factor: u32, node_count: usize) -> Result<()> {
    if replication_factor as usize > node_count {
        return Err(DistError::ReplicationFactorConflict {
            replication_factor,
            detail: format!(
                "only {} nodes are available for shard placement",
                node_count
            ),
        });
    }
    Ok(())
}

fn nonempty(nodes: Vec<Node>) -> Result<Vec<Node>> {
    if nodes.is_empty() {
        return Err(DistError::InvalidGroupState(
            "no active primary nodes are available for shard placement".to_string(),
        ));
    }
    Ok(nodes)
}

/// Compute the shards and placements of a new table
pub fn plan_shards_and_placements(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    table_type: TableType,
    colocation_id: ColocationId,
) -> Result<ShardPlan> {
    let relation = relation_or_error(tx, relation_id)?;
    let plan = match table_type {
        TableType::HashDistributed => plan_hash(tx, &relation, colocation_id)?,
        TableType::Reference => plan_reference(tx, &relation)?,
        TableType::SingleShardDistributed => plan_single_shard(tx, &relation, colocation_id)?,
        TableType::CitusLocal => plan_local(tx, &relation)?,
        // shards are added later through create_empty_shard
        TableType::RangeDistributed | TableType::AppendDistributed => ShardPlan::default(),
    };
    debug!(
        "Planned {} shards and {} placements for {} table {}",
        plan.shards.len(),
        plan.placements.len(),
        table_type,
        relation.qualified_name()
    );
    Ok(plan)
}

fn plan_hash(
    tx: &mut Transaction<'_>,
    relation: &Relation,
    colocation_id: ColocationId,
) -> Result<ShardPlan> {
    let group = tx
        .catalog()
        .colocation_group(colocation_id)
        .cloned()
        .ok_or_else(|| {
            DistError::invalid_params(format!("colocation group {} does not exist", colocation_id))
        })?;
    let replication_factor = match group.replication_factor() {
        ReplicationFactor::Fixed(n) => n,
        ReplicationFactor::AllNodes => {
            return Err(DistError::invalid_params(format!(
                "colocation group {} cannot hold hash distributed tables",
                colocation_id
            )));
        }
    };

    // Membership must not change while shards are being assigned
    let nodes = nonempty(registry::placement_candidate_nodes(tx, LockMode::RowShare)?)?;

    if let Some(source) = tx
        .catalog()
        .colocated_table_with_shards(colocation_id, relation.id)
    {
        return plan_colocated_hash(tx, relation, source);
    }

    check_replication_factor(replication_factor, nodes.len())?;

    let intervals = hash_intervals(group.shard_count());
    let assignment = round_robin_assignment(
        nodes.len(),
        intervals.len(),
        replication_factor as usize,
        colocation_id as usize,
    );

    let mut plan = ShardPlan::default();
    for ((min, max), node_indexes) in intervals.into_iter().zip(assignment) {
        let shard_id = tx.next_shard_id();
        plan.shards.push(Shard {
            shard_id,
            relation_id: relation.id,
            storage_type: storage_type(relation),
            interval: ShardInterval::Hash { min, max },
        });
        for index in node_indexes {
            plan.placements.push(Placement {
                placement_id: tx.next_placement_id(),
                shard_id,
                node_id: nodes[index].node_id,
            });
        }
    }
    Ok(plan)
}

/// Mirror the intervals and placement nodes of an existing colocated table
fn plan_colocated_hash(
    tx: &mut Transaction<'_>,
    relation: &Relation,
    source: RelationId,
) -> Result<ShardPlan> {
    let source_shards: Vec<(ShardInterval, Vec<u32>)> = tx
        .catalog()
        .shards_of(source)
        .into_iter()
        .map(|shard| {
            let nodes = tx
                .catalog()
                .placements_of(shard.shard_id)
                .into_iter()
                .map(|p| p.node_id)
                .collect();
            (shard.interval.clone(), nodes)
        })
        .collect();

    let mut plan = ShardPlan::default();
    for (interval, node_ids) in source_shards {
        let shard_id = tx.next_shard_id();
        plan.shards.push(Shard {
            shard_id,
            relation_id: relation.id,
            storage_type: storage_type(relation),
            interval,
        });
        for node_id in node_ids {
            plan.placements.push(Placement {
                placement_id: tx.next_placement_id(),
                shard_id,
                node_id,
            });
        }
    }
    Ok(plan)
}

fn plan_reference(tx: &mut Transaction<'_>, relation: &Relation) -> Result<ShardPlan> {
    let nodes = nonempty(registry::active_primary_nodes(tx, LockMode::Share)?)?;
    let node_ids: Vec<_> = nodes.iter().map(|n| n.node_id).collect();
    Ok(single_shard_plan(tx, relation, &node_ids))
}

fn plan_single_shard(
    tx: &mut Transaction<'_>,
    relation: &Relation,
    colocation_id: ColocationId,
) -> Result<ShardPlan> {
    ensure_single_placement_replication(tx)?;
    let node = single_shard_colocation_node(tx, colocation_id, relation.id)?;
    Ok(single_shard_plan(tx, relation, &[node.node_id]))
}

fn plan_local(tx: &mut Transaction<'_>, relation: &Relation) -> Result<ShardPlan> {
    let coordinator = registry::coordinator_or_error(tx)?;
    Ok(single_shard_plan(tx, relation, &[coordinator.node_id]))
}

fn single_shard_plan(
    tx: &mut Transaction<'_>,
    relation: &Relation,
    node_ids: &[u32],
) -> ShardPlan {
    let shard_id = tx.next_shard_id();
    let shards = vec![Shard {
        shard_id,
        relation_id: relation.id,
        storage_type: storage_type(relation),
        interval: ShardInterval::Unbounded,
    }];
    let placements = node_ids
        .iter()
        .map(|node_id| Placement {
            placement_id: tx.next_placement_id(),
            shard_id,
            node_id: *node_id,
        })
        .collect();
    ShardPlan { shards, placements }
}

/// Single-shard tables have exactly one placement
pub fn ensure_single_placement_replication(tx: &Transaction<'_>) -> Result<()> {
    let replication_factor = tx.config().shard_replication_factor;
    if replication_factor > 1 {
        return Err(DistError::ReplicationFactorConflict {
            replication_factor,
            detail: "single shard tables have exactly one placement, \
                     set shard_replication_factor to 1"
                .to_string(),
        });
    }
    Ok(())
}

/// Node holding the placements of a single-shard colocation group.
///
/// Uses the node of a table already in the group, otherwise picks one from
/// the placement candidates by colocation id, so every table of the group
/// lands on the same node.
pub fn single_shard_colocation_node(
    tx: &mut Transaction<'_>,
    colocation_id: ColocationId,
    exclude: RelationId,
) -> Result<Node> {
    let catalog = tx.catalog();
    let existing = catalog
        .colocated_table_with_shards(colocation_id, exclude)
        .and_then(|table| catalog.first_placement_node(table));
    if let Some(node_id) = existing {
        return registry::find_node_by_id(tx, node_id);
    }

    let nodes = nonempty(registry::placement_candidate_nodes(tx, LockMode::RowShare)?)?;
    let index = single_shard_node_index(colocation_id, nodes.len());
    Ok(nodes[index].clone())
}

/// One more shard for an append or range distributed table
pub fn plan_empty_shard(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    interval: ShardInterval,
) -> Result<ShardPlan> {
    let relation = relation_or_error(tx, relation_id)?;
    let replication_factor = tx.config().shard_replication_factor;
    let nodes = nonempty(registry::placement_candidate_nodes(tx, LockMode::RowShare)?)?;
    check_replication_factor(replication_factor, nodes.len())?;

    let existing = tx.catalog().shards_of(relation_id).len();
    let assignment = round_robin_assignment(nodes.len(), 1, replication_factor as usize, existing);

    let shard_id = tx.next_shard_id();
    let mut plan = ShardPlan::default();
    plan.shards.push(Shard {
        shard_id,
        relation_id,
        storage_type: storage_type(&relation),
        interval,
    });
    for index in assignment.into_iter().flatten() {
        plan.placements.push(Placement {
            placement_id: tx.next_placement_id(),
            shard_id,
            node_id: nodes[index].node_id,
        });
    }
    Ok(plan)
}
