//! Shard materialization, data movement and reference table upkeep

use tracing::{debug, info};

use crate::error::{DistError, Result};
use crate::lock::{LockMode, LockTag};
use crate::metadata::{
    CatalogWrite, Node, Placement, Relation, RelationId, RelationKind, Shard, TableType,
};
use crate::planner::ShardPlan;
use crate::propagation;
use crate::registry;
use crate::remote::WorkerCommand;
use crate::txn::Transaction;

fn create_shard_command(relation: &Relation, shard: &Shard, parent_shard: Option<String>) -> WorkerCommand {
    WorkerCommand::CreateShardTable {
        shard_name: relation.qualified_shard_name(shard.shard_id),
        columns_sql: relation.columns_sql(),
        foreign: relation.is_foreign(),
        parent_shard,
    }
}

/// Record a plan in the catalog and create the shard tables on their nodes.
///
/// Partitions of a distributed parent attach each shard to the parent's
/// shard at the same index.
pub fn materialize_plan(tx: &mut Transaction<'_>, relation: &Relation, plan: &ShardPlan) -> Result<()> {
    let parent_shards: Vec<String> = match relation.parent {
        Some(parent_id) => {
            let catalog = tx.catalog();
            match catalog.relation(parent_id) {
                Some(parent) if catalog.is_citus_table(parent_id) => catalog
                    .shards_of(parent_id)
                    .into_iter()
                    .map(|s| parent.qualified_shard_name(s.shard_id))
                    .collect(),
                _ => Vec::new(),
            }
        }
        None => Vec::new(),
    };

    for (index, shard) in plan.shards.iter().enumerate() {
        tx.write(CatalogWrite::InsertShard(shard.clone()));
        for placement in plan.placements_of(shard.shard_id) {
            tx.write(CatalogWrite::InsertPlacement(placement.clone()));
            let node = registry::find_node_by_id(tx, placement.node_id)?;
            let command = create_shard_command(relation, shard, parent_shards.get(index).cloned());
            tx.send(&node, command);
        }
    }
    debug!(
        "Materialized {} shards of {} on {} placements",
        plan.shards.len(),
        relation.qualified_name(),
        plan.placements.len()
    );
    Ok(())
}

/// Copy the rows stored in the local relation into every placement
pub fn copy_local_data_into_shards(tx: &mut Transaction<'_>, relation_id: RelationId) -> Result<()> {
    let catalog = tx.catalog();
    let Some(relation) = catalog.relation(relation_id) else {
        return Ok(());
    };
    if relation.kind != RelationKind::Regular || relation.row_count == 0 {
        return Ok(());
    }
    let distribution_column = catalog
        .table(relation_id)
        .and_then(|t| t.distribution_column.as_ref())
        .map(|c| c.name.clone());

    let mut copies = Vec::new();
    for shard in catalog.shards_of(relation_id) {
        for placement in catalog.placements_of(shard.shard_id) {
            copies.push((
                placement.node_id,
                WorkerCommand::CopyLocalRows {
                    relation: relation.qualified_name(),
                    shard_name: relation.qualified_shard_name(shard.shard_id),
                    distribution_column: distribution_column.clone(),
                    hash_range: shard.interval.hash_bounds(),
                },
            ));
        }
    }
    let row_count = relation.row_count;
    let name = relation.qualified_name();

    for (node_id, command) in copies {
        let node = registry::find_node_by_id(tx, node_id)?;
        tx.send(&node, command);
    }
    info!("Copying {} local rows of {} into its shards", row_count, name);
    Ok(())
}

/// Add a placement of `shard` on `target`, copied from `source`
pub fn replicate_shard_placement(
    tx: &mut Transaction<'_>,
    relation: &Relation,
    shard: &Shard,
    source: &Node,
    target: &Node,
) -> Placement {
    tx.send(target, create_shard_command(relation, shard, None));
    tx.send(
        target,
        WorkerCommand::CopyShardPlacement {
            shard_name: relation.qualified_shard_name(shard.shard_id),
            source_host: source.name.clone(),
            source_port: source.port,
        },
    );
    let placement = Placement {
        placement_id: tx.next_placement_id(),
        shard_id: shard.shard_id,
        node_id: target.node_id,
    };
    tx.write(CatalogWrite::InsertPlacement(placement.clone()));
    propagation::sync_placement_added(tx, relation.id, &placement);
    debug!(
        "Replicated shard {} of {} from {} to {}",
        shard.shard_id,
        relation.qualified_name(),
        source.address(),
        target.address()
    );
    placement
}

/// Give every node in `nodes` a placement of a reference table
fn replicate_reference_table(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    nodes: &[Node],
) -> Result<usize> {
    let catalog = tx.catalog();
    let relation = catalog
        .relation(relation_id)
        .cloned()
        .ok_or_else(|| DistError::Catalog(format!("reference table {} has no relation", relation_id)))?;
    let shard = catalog
        .shards_of(relation_id)
        .into_iter()
        .next()
        .cloned()
        .ok_or_else(|| DistError::Catalog(format!("reference table {} has no shard", relation_id)))?;
    let placed: Vec<_> = catalog
        .placements_of(shard.shard_id)
        .into_iter()
        .map(|p| p.node_id)
        .collect();
    let missing: Vec<Node> = nodes
        .iter()
        .filter(|n| !placed.contains(&n.node_id))
        .cloned()
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let source_id = placed
        .iter()
        .copied()
        .find(|id| catalog.node(*id).map(Node::is_active_primary).unwrap_or(false))
        .or_else(|| placed.first().copied())
        .ok_or_else(|| {
            DistError::Catalog(format!("reference table {} has no placements", relation_id))
        })?;
    let source = registry::find_node_by_id(tx, source_id)?;

    for node in &missing {
        replicate_shard_placement(tx, &relation, &shard, &source, node);
    }
    Ok(missing.len())
}

/// Whether some node in `nodes` lacks a placement of a reference table
fn reference_placements_missing(
    tx: &Transaction<'_>,
    references: &[RelationId],
    nodes: &[Node],
) -> bool {
    let catalog = tx.catalog();
    references.iter().any(|relation_id| {
        let placed: Vec<_> = catalog
            .placements_of_relation(*relation_id)
            .into_iter()
            .map(|p| p.node_id)
            .collect();
        nodes.iter().any(|n| !placed.contains(&n.node_id))
    })
}

/// Make sure every active primary holds a placement of every reference table.
///
/// Runs before a colocation lock is taken, so callers never race a
/// replication of the reference group they are joining. The reference group
/// is only locked when a placement is actually missing.
pub fn ensure_reference_tables_exist_on_all_nodes(tx: &mut Transaction<'_>) -> Result<()> {
    let references = tx.catalog().tables_of_type(TableType::Reference);
    if references.is_empty() {
        return Ok(());
    }
    let nodes = registry::active_primary_nodes(tx, LockMode::RowShare)?;
    if !reference_placements_missing(tx, &references, &nodes) {
        return Ok(());
    }
    if let Some(colocation_id) = tx.catalog().table(references[0]).map(|t| t.colocation_id) {
        tx.lock(LockTag::Colocation(colocation_id), LockMode::Exclusive)?;
    }

    let mut replicated = 0;
    for relation_id in tx.catalog().tables_of_type(TableType::Reference) {
        replicated += replicate_reference_table(tx, relation_id, &nodes)?;
    }
    if replicated > 0 {
        info!("Replicated {} reference table placements", replicated);
    }
    Ok(())
}

/// Copy every reference table to a newly activated node
pub fn replicate_reference_tables_to_node(tx: &mut Transaction<'_>, node: &Node) -> Result<()> {
    let references = tx.catalog().tables_of_type(TableType::Reference);
    let nodes = std::slice::from_ref(node);
    for relation_id in references {
        replicate_reference_table(tx, relation_id, nodes)?;
    }
    Ok(())
}
