//! Metadata propagation
//!
//! Serializes catalog changes into idempotent statements and queues them for
//! every node holding a synced metadata copy. Statements are delivered when
//! the transaction commits, in the order they were queued.

use tracing::debug;

use crate::metadata::{
    Catalog, ColocationGroup, Node, NodeId, Placement, PlacementId, Relation, RelationId, Shard,
    ShardId, TableDistribution, TableType,
};
use crate::remote::WorkerCommand;
use crate::sql::{literal_or_null, quote_literal};
use crate::txn::Transaction;

const METADATA_SCHEMA: &str = "dist_catalog";

/// Nodes that must receive metadata changes, sorted by node id
pub fn metadata_nodes(catalog: &Catalog) -> Vec<Node> {
    catalog
        .nodes
        .values()
        .filter(|n| n.receives_metadata())
        .cloned()
        .collect()
}

/// Queue `command` for every metadata-synced node
pub fn sync_to_all_metadata_nodes(tx: &mut Transaction<'_>, command: String) {
    sync_to_metadata_nodes_except(tx, command, None);
}

fn sync_to_metadata_nodes_except(
    tx: &mut Transaction<'_>,
    command: String,
    exclude: Option<NodeId>,
) {
    if !tx.config().enable_metadata_sync {
        return;
    }
    let targets: Vec<Node> = metadata_nodes(tx.catalog())
        .into_iter()
        .filter(|n| Some(n.node_id) != exclude)
        .collect();
    for node in &targets {
        debug!("Queue metadata command for {}: {}", node.address(), command);
        tx.send(node, WorkerCommand::Metadata(command.clone()));
    }
}

// Node rows

pub fn node_upsert_command(node: &Node) -> String {
    format!(
        "INSERT INTO {schema}.dist_node (nodeid, groupid, nodename, nodeport, noderack, \
         hasmetadata, metadatasynced, isactive, noderole, nodecluster, shouldhaveshards) \
         VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
         ON CONFLICT (nodeid) DO UPDATE SET groupid = EXCLUDED.groupid, \
         nodename = EXCLUDED.nodename, nodeport = EXCLUDED.nodeport, \
         noderack = EXCLUDED.noderack, hasmetadata = EXCLUDED.hasmetadata, \
         metadatasynced = EXCLUDED.metadatasynced, isactive = EXCLUDED.isactive, \
         noderole = EXCLUDED.noderole, nodecluster = EXCLUDED.nodecluster, \
         shouldhaveshards = EXCLUDED.shouldhaveshards",
        node.node_id,
        node.group_id,
        quote_literal(&node.name),
        node.port,
        quote_literal(&node.rack),
        node.has_metadata,
        node.metadata_synced,
        node.is_active,
        quote_literal(&node.role.to_string()),
        quote_literal(&node.cluster),
        node.should_have_shards,
        schema = METADATA_SCHEMA,
    )
}

/// Remove rows for the same address left behind under another id
pub fn node_delete_stale_command(node: &Node) -> String {
    format!(
        "DELETE FROM {}.dist_node WHERE nodename = {} AND nodeport = {} AND nodeid <> {}",
        METADATA_SCHEMA,
        quote_literal(&node.name),
        node.port,
        node.node_id
    )
}

pub fn node_delete_command(node_id: NodeId) -> String {
    format!(
        "DELETE FROM {}.dist_node WHERE nodeid = {}",
        METADATA_SCHEMA, node_id
    )
}

/// Queue the row of a new node, then the cleanup of stale rows for its
/// address. Readers therefore always find a row for the address.
pub fn propagate_node_added(tx: &mut Transaction<'_>, node: &Node) {
    if node.is_coordinator() {
        return;
    }
    sync_to_metadata_nodes_except(tx, node_upsert_command(node), Some(node.node_id));
    sync_to_metadata_nodes_except(tx, node_delete_stale_command(node), Some(node.node_id));
}

pub fn propagate_node_updated(tx: &mut Transaction<'_>, node: &Node) {
    sync_to_all_metadata_nodes(tx, node_upsert_command(node));
}

pub fn propagate_node_removed(tx: &mut Transaction<'_>, node_id: NodeId) {
    sync_to_all_metadata_nodes(tx, node_delete_command(node_id));
}

// Colocation groups

pub fn colocation_upsert_command(group: &ColocationGroup) -> String {
    let column_type = group
        .signature
        .distribution_column_type
        .map(|t| t.sql_name());
    format!(
        "INSERT INTO {}.dist_colocation (colocationid, shardcount, replicationfactor, \
         distributioncolumntype) VALUES ({}, {}, {}, {}) ON CONFLICT (colocationid) DO NOTHING",
        METADATA_SCHEMA,
        group.colocation_id,
        group.shard_count(),
        group.replication_factor().as_i32(),
        literal_or_null(column_type),
    )
}

// Distribution records

pub fn table_upsert_command(relation: &Relation, table: &TableDistribution) -> String {
    let column = table.distribution_column.as_ref().map(|c| c.name.as_str());
    format!(
        "INSERT INTO {}.dist_partition (logicalrelid, partmethod, partkey, colocationid, \
         repmodel, autoconverted) VALUES ({}::regclass, {}, {}, {}, {}, {}) \
         ON CONFLICT (logicalrelid) DO UPDATE SET partmethod = EXCLUDED.partmethod, \
         partkey = EXCLUDED.partkey, colocationid = EXCLUDED.colocationid, \
         repmodel = EXCLUDED.repmodel, autoconverted = EXCLUDED.autoconverted",
        METADATA_SCHEMA,
        quote_literal(&relation.qualified_name()),
        quote_literal(&table.method.code().to_string()),
        literal_or_null(column),
        table.colocation_id,
        quote_literal(&table.replication_model.code().to_string()),
        table.auto_converted,
    )
}

pub fn table_delete_command(relation: &Relation) -> String {
    format!(
        "DELETE FROM {}.dist_partition WHERE logicalrelid = {}::regclass",
        METADATA_SCHEMA,
        quote_literal(&relation.qualified_name())
    )
}

// Shards and placements

pub fn shard_insert_command(relation: &Relation, shard: &Shard) -> String {
    let bounds = shard.interval.text_bounds();
    let storage = match shard.storage_type {
        crate::metadata::ShardStorageType::Table => "t",
        crate::metadata::ShardStorageType::Foreign => "f",
    };
    format!(
        "INSERT INTO {}.dist_shard (logicalrelid, shardid, shardstorage, shardminvalue, \
         shardmaxvalue) VALUES ({}::regclass, {}, {}, {}, {}) ON CONFLICT (shardid) DO NOTHING",
        METADATA_SCHEMA,
        quote_literal(&relation.qualified_name()),
        shard.shard_id,
        quote_literal(storage),
        literal_or_null(bounds.as_ref().map(|(min, _)| min.as_str())),
        literal_or_null(bounds.as_ref().map(|(_, max)| max.as_str())),
    )
}

pub fn shard_delete_command(shard_id: ShardId) -> String {
    format!(
        "DELETE FROM {}.dist_shard WHERE shardid = {}",
        METADATA_SCHEMA, shard_id
    )
}

pub fn placement_insert_command(placement: &Placement) -> String {
    format!(
        "INSERT INTO {}.dist_placement (placementid, shardid, nodeid) VALUES ({}, {}, {}) \
         ON CONFLICT (placementid) DO NOTHING",
        METADATA_SCHEMA, placement.placement_id, placement.shard_id, placement.node_id
    )
}

pub fn placement_delete_command(placement_id: PlacementId) -> String {
    format!(
        "DELETE FROM {}.dist_placement WHERE placementid = {}",
        METADATA_SCHEMA, placement_id
    )
}

// Table-level propagation

/// Hash-distributed tables and tables without a distribution column are
/// synced. Range and append tables stay coordinator-only.
pub fn should_sync_table_metadata(tx: &Transaction<'_>, relation_id: RelationId) -> bool {
    if !tx.config().enable_metadata_sync {
        return false;
    }
    match tx.catalog().table_type(relation_id) {
        Some(TableType::RangeDistributed) | Some(TableType::AppendDistributed) | None => false,
        Some(_) => true,
    }
}

/// Every statement needed to recreate a table's metadata on another node
pub fn table_metadata_commands(catalog: &Catalog, relation_id: RelationId) -> Vec<String> {
    let (Some(relation), Some(table)) = (catalog.relation(relation_id), catalog.table(relation_id))
    else {
        return Vec::new();
    };

    let mut commands = Vec::new();
    if let Some(group) = catalog.colocation_group(table.colocation_id) {
        commands.push(colocation_upsert_command(group));
    }
    commands.extend(table_rows_commands(catalog, relation, table));
    commands
}

/// Record, shard and placement rows of one table
fn table_rows_commands(
    catalog: &Catalog,
    relation: &Relation,
    table: &TableDistribution,
) -> Vec<String> {
    let mut commands = vec![table_upsert_command(relation, table)];
    for shard in catalog.shards_of(relation.id) {
        commands.push(shard_insert_command(relation, shard));
        for placement in catalog.placements_of(shard.shard_id) {
            commands.push(placement_insert_command(placement));
        }
    }
    commands
}

/// Propagate a table's record, shards and placements
pub fn sync_table_metadata(tx: &mut Transaction<'_>, relation_id: RelationId) {
    if !should_sync_table_metadata(tx, relation_id) {
        return;
    }
    for command in table_metadata_commands(tx.catalog(), relation_id) {
        sync_to_all_metadata_nodes(tx, command);
    }
}

/// Propagate an in-place change of a table's record
pub fn sync_table_record(tx: &mut Transaction<'_>, relation_id: RelationId) {
    if !should_sync_table_metadata(tx, relation_id) {
        return;
    }
    let catalog = tx.catalog();
    let (Some(relation), Some(table)) = (catalog.relation(relation_id), catalog.table(relation_id))
    else {
        return;
    };
    let mut commands = Vec::new();
    if let Some(group) = catalog.colocation_group(table.colocation_id) {
        commands.push(colocation_upsert_command(group));
    }
    commands.push(table_upsert_command(relation, table));
    for command in commands {
        sync_to_all_metadata_nodes(tx, command);
    }
}

pub fn sync_placement_added(tx: &mut Transaction<'_>, relation_id: RelationId, placement: &Placement) {
    if should_sync_table_metadata(tx, relation_id) {
        sync_to_all_metadata_nodes(tx, placement_insert_command(placement));
    }
}

pub fn sync_placement_removed(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    placement_id: PlacementId,
) {
    if should_sync_table_metadata(tx, relation_id) {
        sync_to_all_metadata_nodes(tx, placement_delete_command(placement_id));
    }
}

pub fn sync_shard_added(tx: &mut Transaction<'_>, relation: &Relation, shard: &Shard) {
    if should_sync_table_metadata(tx, relation.id) {
        sync_to_all_metadata_nodes(tx, shard_insert_command(relation, shard));
    }
}

/// Remove every metadata row of a table. Must run while the record still
/// exists in the transaction's catalog.
pub fn sync_table_removed(tx: &mut Transaction<'_>, relation_id: RelationId) {
    if !should_sync_table_metadata(tx, relation_id) {
        return;
    }
    let catalog = tx.catalog();
    let Some(relation) = catalog.relation(relation_id) else {
        return;
    };
    let mut commands = Vec::new();
    for shard in catalog.shards_of(relation_id) {
        for placement in catalog.placements_of(shard.shard_id) {
            commands.push(placement_delete_command(placement.placement_id));
        }
        commands.push(shard_delete_command(shard.shard_id));
    }
    commands.push(table_delete_command(relation));
    for command in commands {
        sync_to_all_metadata_nodes(tx, command);
    }
}

/// Full metadata image: nodes, then groups, then every synced table
pub fn snapshot_commands(catalog: &Catalog) -> Vec<String> {
    let mut commands: Vec<String> = catalog.nodes.values().map(node_upsert_command).collect();
    commands.extend(
        catalog
            .colocation_groups
            .values()
            .map(colocation_upsert_command),
    );
    for table in catalog.tables.values() {
        if matches!(
            table.table_type(),
            TableType::RangeDistributed | TableType::AppendDistributed
        ) {
            continue;
        }
        if let Some(relation) = catalog.relation(table.relation_id) {
            commands.extend(table_rows_commands(catalog, relation, table));
        }
    }
    commands
}

/// Queue a full snapshot for one node
pub fn send_metadata_snapshot(tx: &mut Transaction<'_>, node: &Node) {
    if !tx.config().enable_metadata_sync {
        return;
    }
    let commands = snapshot_commands(tx.catalog());
    debug!(
        "Queue metadata snapshot of {} commands for {}",
        commands.len(),
        node.address()
    );
    for command in commands {
        tx.send(node, WorkerCommand::Metadata(command));
    }
}
