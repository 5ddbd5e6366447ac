//! Table conversion orchestrator
//!
//! Moves a relation between classifications:
//! plain → {hash, range, append, reference, single shard, citus local},
//! citus local → {reference, single shard}, and any citus table back to plain.
//!
//! Locks are taken relation first, then the colocation catalog when a
//! default group is resolved, then the node registry, then the colocation
//! group. Partitions are locked together with their parent.

mod foreign_keys;
mod params;
mod shards;
mod validate;

use bumpalo::Bump;
use std::cmp::Ordering;
use tracing::info;

use crate::colocation::{self, ColocationParam};
use crate::config::MAX_SHARD_COUNT;
use crate::error::{DistError, Result};
use crate::lock::{LockMode, LockTag};
use crate::metadata::{
    CatalogWrite, DistributionMethod, Relation, RelationId, ShardId, ShardInterval,
    TableDistribution, TableType, INVALID_COLOCATION_ID,
};
use crate::planner;
use crate::propagation;
use crate::registry;
use crate::remote::WorkerCommand;
use crate::txn::Transaction;

pub use foreign_keys::SavedForeignKey;
pub use params::{decide_citus_table_params, CitusTableParams, DistributedTableParams};
pub use shards::{ensure_reference_tables_exist_on_all_nodes, replicate_reference_tables_to_node};
pub use validate::ProposedTable;

// Entry points

/// Distribute a plain (or citus local) table by hash, range or append
pub fn create_distributed_table(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    distribution_column: &str,
    method: DistributionMethod,
    shard_count: u32,
    shard_count_is_strict: bool,
    colocate_with: &str,
) -> Result<()> {
    let table_type = match method {
        DistributionMethod::Hash => TableType::HashDistributed,
        DistributionMethod::Range => TableType::RangeDistributed,
        DistributionMethod::Append => TableType::AppendDistributed,
        DistributionMethod::None => {
            return Err(DistError::invalid_params(
                "distribution method none takes no distribution column, \
                 create a single shard table instead",
            ));
        }
    };
    if shard_count == 0 || shard_count > MAX_SHARD_COUNT {
        return Err(DistError::invalid_params(format!(
            "shard_count must be between 1 and {}",
            MAX_SHARD_COUNT
        )));
    }

    let colocation = ColocationParam::parse(colocate_with);
    if table_type != TableType::HashDistributed && !colocation.is_default_or_none() {
        return Err(DistError::invalid_params(format!(
            "colocate_with is not supported for {} tables",
            table_type
        )));
    }

    let params = DistributedTableParams {
        colocation,
        shard_count,
        shard_count_is_strict,
        distribution_column: Some(distribution_column),
    };
    create_citus_table(tx, relation_id, table_type, Some(&params))
}

pub fn create_single_shard_table(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    colocation: ColocationParam<'_>,
) -> Result<()> {
    let params = DistributedTableParams::single_shard(colocation);
    if tx.catalog().table_type(relation_id) == Some(TableType::CitusLocal) {
        convert_citus_local_table_to_table_type(
            tx,
            relation_id,
            TableType::SingleShardDistributed,
            Some(&params),
        )
    } else {
        create_citus_table(tx, relation_id, TableType::SingleShardDistributed, Some(&params))
    }
}

pub fn create_reference_table(tx: &mut Transaction<'_>, relation_id: RelationId) -> Result<()> {
    if tx.catalog().table_type(relation_id) == Some(TableType::CitusLocal) {
        convert_citus_local_table_to_table_type(tx, relation_id, TableType::Reference, None)
    } else {
        create_citus_table(tx, relation_id, TableType::Reference, None)
    }
}

// Creation

/// Registry lock held while nodes are chosen. Reference tables need every
/// node to stay, other types only need membership not to change.
fn registry_lock_mode(table_type: TableType) -> LockMode {
    if table_type == TableType::Reference {
        LockMode::Share
    } else {
        LockMode::RowShare
    }
}

fn lock_relation_tree(tx: &mut Transaction<'_>, relation_id: RelationId, mode: LockMode) -> Result<()> {
    tx.lock(LockTag::Relation(relation_id), mode)?;
    let partitions = tx
        .catalog()
        .relation(relation_id)
        .map(|r| r.partitions.clone())
        .unwrap_or_default();
    for partition_id in partitions {
        tx.lock(LockTag::Relation(partition_id), mode)?;
    }
    Ok(())
}

/// Turn a plain relation into a citus table of `table_type`.
///
/// A citus local relation is first returned to plain, with its foreign keys
/// saved and replayed once the new shards exist.
pub fn create_citus_table(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    table_type: TableType,
    params: Option<&DistributedTableParams<'_>>,
) -> Result<()> {
    if table_type.requires_distribution_params() != params.is_some() {
        return Err(DistError::invalid_params(format!(
            "{} tables {} distribution parameters",
            table_type,
            if params.is_some() { "take no" } else { "require" }
        )));
    }
    if table_type == TableType::CitusLocal {
        return add_local_table_to_metadata(tx, relation_id, false);
    }
    validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    if table_type == TableType::SingleShardDistributed {
        planner::ensure_single_placement_replication(tx)?;
    }

    let mut saved_keys = Vec::new();
    let mut auto_convert = Vec::new();
    match tx.catalog().table_type(relation_id) {
        Some(TableType::CitusLocal) => {
            if matches!(table_type, TableType::Reference | TableType::SingleShardDistributed) {
                return Err(DistError::UnsupportedConversion {
                    from: Some(TableType::CitusLocal),
                    to: table_type,
                });
            }
            saved_keys = foreign_keys::drop_foreign_keys(tx, relation_id, |_| true)?;
            undistribute_table(tx, relation_id, true)?;
        }
        None if table_type == TableType::Reference => {
            // plain partners become citus local tables once this one is a reference table
            let partners: Vec<RelationId> = foreign_keys::foreign_key_partners(tx, relation_id)
                .into_iter()
                .filter(|id| !tx.catalog().is_citus_table(*id))
                .collect();
            if !partners.is_empty() {
                saved_keys =
                    foreign_keys::drop_foreign_keys(tx, relation_id, |other| partners.contains(&other))?;
                auto_convert = partners;
            }
        }
        _ => {}
    }

    lock_relation_tree(tx, relation_id, LockMode::Exclusive)?;
    registry::insert_coordinator_if_cluster_empty(tx)?;

    let relation = validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    validate::ensure_table_not_distributed(tx, &relation)?;

    let distribution_column = match params.and_then(|p| p.distribution_column) {
        Some(name) => Some(validate::resolve_distribution_column(&relation, name)?),
        None => None,
    };
    if table_type.has_distribution_column() != distribution_column.is_some() {
        return Err(DistError::invalid_params(format!(
            "{} tables {} a distribution column",
            table_type,
            if table_type.has_distribution_column() { "require" } else { "take no" }
        )));
    }

    let citus_params = decide_citus_table_params(tx.config(), table_type);
    let colocation_id = colocation::resolve_or_create_colocation(
        tx,
        relation_id,
        table_type,
        params,
        distribution_column.as_ref(),
    )?;
    validate::ensure_relation_can_be_distributed(
        tx,
        &relation,
        distribution_column.as_ref(),
        table_type,
        colocation_id,
    )?;

    tx.lock(LockTag::NodeRegistry, registry_lock_mode(table_type))?;
    ensure_reference_tables_exist_on_all_nodes(tx)?;
    tx.lock(LockTag::Colocation(colocation_id), LockMode::Share)?;

    let relation = validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    let local_table_empty = relation.row_count == 0;

    tx.write(CatalogWrite::UpsertTable(TableDistribution {
        relation_id,
        method: citus_params.distribution_method,
        distribution_column,
        colocation_id,
        replication_model: citus_params.replication_model,
        auto_converted: false,
    }));

    let plan = planner::plan_shards_and_placements(tx, relation_id, table_type, colocation_id)?;
    shards::materialize_plan(tx, &relation, &plan)?;
    propagation::sync_table_metadata(tx, relation_id);

    if relation.is_partitioned() {
        let parent_name = format!("{}.{}", relation.schema, relation.name);
        let mut arena = Bump::new();
        for &partition_id in &relation.partitions {
            arena.reset();
            let child = params.map(|p| &*arena.alloc(p.for_partition(&parent_name)));
            create_citus_table(tx, partition_id, table_type, child)?;
        }
        drop(arena);
    }

    if !local_table_empty
        && matches!(
            table_type,
            TableType::HashDistributed | TableType::SingleShardDistributed | TableType::Reference
        )
    {
        shards::copy_local_data_into_shards(tx, relation_id)?;
    }

    for partner in auto_convert {
        add_local_table_to_metadata(tx, partner, true)?;
    }
    foreign_keys::replay_foreign_keys(tx, saved_keys)?;

    info!(
        "Created {} table {} in colocation group {} with {} shards",
        table_type,
        relation.qualified_name(),
        colocation_id,
        plan.shards.len()
    );
    Ok(())
}

/// Register a plain relation as a citus local table on the coordinator
pub fn add_local_table_to_metadata(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    auto_converted: bool,
) -> Result<()> {
    validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    lock_relation_tree(tx, relation_id, LockMode::Exclusive)?;
    let relation = validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    validate::ensure_table_not_distributed(tx, &relation)?;
    registry::coordinator_or_error(tx)?;
    validate::ensure_relation_can_be_distributed(
        tx,
        &relation,
        None,
        TableType::CitusLocal,
        INVALID_COLOCATION_ID,
    )?;

    let citus_params = decide_citus_table_params(tx.config(), TableType::CitusLocal);
    tx.write(CatalogWrite::UpsertTable(TableDistribution {
        relation_id,
        method: citus_params.distribution_method,
        distribution_column: None,
        colocation_id: INVALID_COLOCATION_ID,
        replication_model: citus_params.replication_model,
        auto_converted,
    }));

    let plan = planner::plan_shards_and_placements(
        tx,
        relation_id,
        TableType::CitusLocal,
        INVALID_COLOCATION_ID,
    )?;
    shards::materialize_plan(tx, &relation, &plan)?;
    propagation::sync_table_metadata(tx, relation_id);

    for &partition_id in &relation.partitions {
        add_local_table_to_metadata(tx, partition_id, auto_converted)?;
    }

    info!(
        "Added {} to metadata as a citus local table{}",
        relation.qualified_name(),
        if auto_converted { " (auto converted)" } else { "" }
    );
    Ok(())
}

// Conversion

/// Turn a citus local table into a reference or single shard table.
///
/// The existing record is updated in place and the coordinator placement is
/// copied to the new nodes. For a single shard table that moves off the
/// coordinator, the local shard is dropped only after every partition has
/// been converted.
pub fn convert_citus_local_table_to_table_type(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    table_type: TableType,
    params: Option<&DistributedTableParams<'_>>,
) -> Result<()> {
    let current = tx.catalog().table_type(relation_id);
    if current != Some(TableType::CitusLocal)
        || !matches!(table_type, TableType::Reference | TableType::SingleShardDistributed)
    {
        return Err(DistError::UnsupportedConversion {
            from: current,
            to: table_type,
        });
    }
    let single_shard = table_type == TableType::SingleShardDistributed;
    if single_shard != params.is_some() {
        return Err(DistError::invalid_params(format!(
            "{} tables {} distribution parameters",
            table_type,
            if single_shard { "require" } else { "take no" }
        )));
    }
    if params.and_then(|p| p.distribution_column).is_some() {
        return Err(DistError::invalid_params(
            "single shard tables take no distribution column",
        ));
    }

    validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    lock_relation_tree(tx, relation_id, LockMode::Exclusive)?;
    let relation = validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    if single_shard {
        planner::ensure_single_placement_replication(tx)?;
    }

    let citus_params = decide_citus_table_params(tx.config(), table_type);
    let colocation_id =
        colocation::resolve_or_create_colocation(tx, relation_id, table_type, params, None)?;
    validate::ensure_relation_can_be_distributed(tx, &relation, None, table_type, colocation_id)?;
    if single_shard {
        validate::ensure_no_foreign_key_from_table_types(
            tx,
            &relation,
            &[TableType::Reference, TableType::CitusLocal],
        )?;
    }

    tx.lock(LockTag::NodeRegistry, registry_lock_mode(table_type))?;
    ensure_reference_tables_exist_on_all_nodes(tx)?;
    tx.lock(LockTag::Colocation(colocation_id), LockMode::Share)?;

    let coordinator = registry::coordinator_or_error(tx)?;
    let (targets, drop_local) = if single_shard {
        let target = planner::single_shard_colocation_node(tx, colocation_id, relation_id)?;
        if target.node_id != coordinator.node_id {
            (vec![target], true)
        } else {
            (Vec::new(), false)
        }
    } else {
        (registry::list_active_primary_workers(tx, LockMode::Share)?, false)
    };

    let mut record = tx.catalog().table(relation_id).cloned().ok_or_else(|| {
        DistError::Catalog(format!("citus local table {} has no record", relation_id))
    })?;
    record.method = citus_params.distribution_method;
    record.distribution_column = None;
    record.colocation_id = colocation_id;
    record.replication_model = citus_params.replication_model;
    record.auto_converted = false;
    tx.write(CatalogWrite::UpsertTable(record));
    propagation::sync_table_record(tx, relation_id);

    let shard = tx
        .catalog()
        .shards_of(relation_id)
        .into_iter()
        .next()
        .cloned()
        .ok_or_else(|| {
            DistError::Catalog(format!("citus local table {} has no shard", relation_id))
        })?;
    for target in &targets {
        shards::replicate_shard_placement(tx, &relation, &shard, &coordinator, target);
    }

    if drop_local {
        let local_placements: Vec<_> = tx
            .catalog()
            .placements_of(shard.shard_id)
            .into_iter()
            .filter(|p| p.node_id == coordinator.node_id)
            .map(|p| p.placement_id)
            .collect();
        for placement_id in local_placements {
            tx.write(CatalogWrite::DeletePlacement(placement_id));
            propagation::sync_placement_removed(tx, relation_id, placement_id);
        }
    }

    if let (true, Some(params)) = (relation.is_partitioned(), params) {
        let parent_name = format!("{}.{}", relation.schema, relation.name);
        let mut arena = Bump::new();
        for &partition_id in &relation.partitions {
            arena.reset();
            let child = &*arena.alloc(params.for_partition(&parent_name));
            convert_citus_local_table_to_table_type(tx, partition_id, table_type, Some(child))?;
        }
        drop(arena);
    }

    if drop_local {
        tx.send(
            &coordinator,
            WorkerCommand::DropShardTable {
                shard_name: relation.qualified_shard_name(shard.shard_id),
            },
        );
    }

    info!(
        "Converted citus local table {} to a {} table on {} new nodes",
        relation.qualified_name(),
        table_type,
        targets.len()
    );
    Ok(())
}

// Removal

/// Queue shard removal and delete every distribution row of `relation`
fn remove_distribution(tx: &mut Transaction<'_>, relation: &Relation, copy_back: bool) -> Result<()> {
    propagation::sync_table_removed(tx, relation.id);

    let catalog = tx.catalog();
    let shards: Vec<(ShardId, Vec<(u64, u32)>)> = catalog
        .shards_of(relation.id)
        .into_iter()
        .map(|shard| {
            let placements = catalog
                .placements_of(shard.shard_id)
                .into_iter()
                .map(|p| (p.placement_id, p.node_id))
                .collect();
            (shard.shard_id, placements)
        })
        .collect();
    let copy_rows = copy_back && !relation.is_partitioned() && relation.row_count > 0;

    for (shard_id, placements) in shards {
        let shard_name = relation.qualified_shard_name(shard_id);
        if copy_rows {
            if let Some((_, node_id)) = placements.first() {
                let node = registry::find_node_by_id(tx, *node_id)?;
                tx.send(
                    &node,
                    WorkerCommand::CopyShardToLocal {
                        shard_name: shard_name.clone(),
                        relation: relation.qualified_name(),
                    },
                );
            }
        }
        for (placement_id, node_id) in placements {
            let node = registry::find_node_by_id(tx, node_id)?;
            tx.send(
                &node,
                WorkerCommand::DropShardTable {
                    shard_name: shard_name.clone(),
                },
            );
            tx.write(CatalogWrite::DeletePlacement(placement_id));
        }
        tx.write(CatalogWrite::DeleteShard(shard_id));
    }
    tx.write(CatalogWrite::DeleteTable(relation.id));
    Ok(())
}

/// Return a citus table to a plain table.
///
/// `internal` callers have already dropped the foreign keys and may pass
/// partitions directly.
pub fn undistribute_table(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    internal: bool,
) -> Result<()> {
    lock_relation_tree(tx, relation_id, LockMode::AccessExclusive)?;
    let relation = validate::ensure_citus_table_can_be_created(tx, relation_id)?;
    let catalog = tx.catalog();
    let Some(table_type) = catalog.table_type(relation_id) else {
        return Err(DistError::ineligible(
            relation.qualified_name(),
            "relation is not a citus table",
        ));
    };

    if !internal {
        if relation.parent.map(|p| catalog.is_citus_table(p)).unwrap_or(false) {
            return Err(DistError::ineligible(
                relation.qualified_name(),
                "cannot undistribute a partition, undistribute its parent instead",
            ));
        }
        if !relation.foreign_keys.is_empty()
            || !catalog.referencing_foreign_keys(relation_id).is_empty()
        {
            return Err(DistError::ineligible(
                relation.qualified_name(),
                "relation is involved in foreign keys, drop them before undistributing",
            ));
        }
    }

    for &partition_id in &relation.partitions {
        if tx.catalog().is_citus_table(partition_id) {
            undistribute_table(tx, partition_id, true)?;
        }
    }
    remove_distribution(tx, &relation, true)?;

    info!("Undistributed {} table {}", table_type, relation.qualified_name());
    Ok(())
}

/// Drop a relation, its partitions and its distribution metadata
pub fn drop_table(tx: &mut Transaction<'_>, relation_id: RelationId) -> Result<()> {
    // the parent's partition list is rewritten below
    if let Some(parent_id) = tx.catalog().relation(relation_id).and_then(|r| r.parent) {
        tx.lock(LockTag::Relation(parent_id), LockMode::ShareUpdateExclusive)?;
    }
    lock_relation_tree(tx, relation_id, LockMode::AccessExclusive)?;
    let relation = validate::ensure_citus_table_can_be_created(tx, relation_id)?;

    if let Some((owner, fk)) = tx
        .catalog()
        .referencing_foreign_keys(relation_id)
        .into_iter()
        .find(|(owner, _)| !relation.partitions.contains(owner))
    {
        return Err(DistError::ineligible(
            relation.qualified_name(),
            format!("foreign key {} on relation {} depends on it", fk.name, owner),
        ));
    }

    for &partition_id in &relation.partitions {
        drop_table(tx, partition_id)?;
    }
    if tx.catalog().is_citus_table(relation_id) {
        remove_distribution(tx, &relation, false)?;
    }
    if let Some(parent_id) = relation.parent {
        if let Some(mut parent) = tx.catalog().relation(parent_id).cloned() {
            parent.partitions.retain(|p| *p != relation_id);
            tx.write(CatalogWrite::UpsertRelation(parent));
        }
    }
    tx.write(CatalogWrite::DeleteRelation(relation_id));

    info!("Dropped relation {}", relation.qualified_name());
    Ok(())
}

// Append and range shards

/// Order two textual bounds numerically when both parse as numbers
fn compare_bounds(min: &str, max: &str) -> Ordering {
    match (min.parse::<i64>(), max.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => match (min.parse::<f64>(), max.parse::<f64>()) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => min.cmp(max),
        },
    }
}

/// Add one shard to an append or range distributed table
pub fn create_empty_shard(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    min_value: Option<&str>,
    max_value: Option<&str>,
) -> Result<ShardId> {
    tx.lock(LockTag::Relation(relation_id), LockMode::Exclusive)?;
    let relation = validate::ensure_citus_table_can_be_created(tx, relation_id)?;

    let interval = match tx.catalog().table_type(relation_id) {
        Some(TableType::AppendDistributed) => {
            if min_value.is_some() || max_value.is_some() {
                return Err(DistError::invalid_params(
                    "shards of append distributed tables have no bounds",
                ));
            }
            ShardInterval::Unbounded
        }
        Some(TableType::RangeDistributed) => {
            let (Some(min), Some(max)) = (min_value, max_value) else {
                return Err(DistError::invalid_params(
                    "shards of range distributed tables need a minimum and a maximum value",
                ));
            };
            if compare_bounds(min, max) == Ordering::Greater {
                return Err(DistError::invalid_params(format!(
                    "shard minimum value {} is greater than maximum value {}",
                    min, max
                )));
            }
            ShardInterval::Range {
                min: min.to_string(),
                max: max.to_string(),
            }
        }
        other => {
            return Err(DistError::invalid_params(format!(
                "cannot create empty shards for {} table {}",
                other.map(|t| t.to_string()).unwrap_or_else(|| "plain".to_string()),
                relation.qualified_name()
            )));
        }
    };

    let plan = planner::plan_empty_shard(tx, relation_id, interval)?;
    shards::materialize_plan(tx, &relation, &plan)?;
    let mut shard_id = None;
    for shard in &plan.shards {
        propagation::sync_shard_added(tx, &relation, shard);
        for placement in plan.placements_of(shard.shard_id) {
            propagation::sync_placement_added(tx, relation_id, placement);
        }
        shard_id = Some(shard.shard_id);
    }
    let shard_id =
        shard_id.ok_or_else(|| DistError::Catalog("empty shard plan has no shard".to_string()))?;

    info!("Created shard {} of {}", shard_id, relation.qualified_name());
    Ok(shard_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_bounds() {
        assert_eq!(compare_bounds("9", "10"), Ordering::Less);
        assert_eq!(compare_bounds("2.5", "2.25"), Ordering::Greater);
        assert_eq!(compare_bounds("apple", "banana"), Ordering::Less);
        assert_eq!(compare_bounds("7", "7"), Ordering::Equal);
    }
}
