//! Node registry
//!
//! Tracks cluster members. Membership changes take the registry lock in
//! Exclusive mode; planners enumerate nodes under a weaker mode so that
//! membership cannot change while shards are being placed.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{DistError, Result};
use crate::lock::{LockMode, LockTag};
use crate::metadata::{CatalogWrite, Node, NodeId, NodeMetadata, NodeRole, COORDINATOR_GROUP_ID};
use crate::orchestrator;
use crate::propagation;
use crate::txn::Transaction;

/// Add a node and return its id
pub fn add_node(
    tx: &mut Transaction<'_>,
    name: &str,
    port: u16,
    metadata: &NodeMetadata,
) -> Result<NodeId> {
    tx.lock(LockTag::NodeRegistry, LockMode::Exclusive)?;
    let node = insert_node(tx, name, port, metadata, None)?;

    propagation::propagate_node_added(tx, &node);
    if node.receives_metadata() {
        propagation::send_metadata_snapshot(tx, &node);
    }

    if tx.config().replicate_reference_tables_on_activate
        && node.is_active_primary()
        && !node.is_coordinator()
    {
        orchestrator::replicate_reference_tables_to_node(tx, &node)?;
    }

    Ok(node.node_id)
}

/// Validate and insert a node row. The caller holds the registry lock.
fn insert_node(
    tx: &mut Transaction<'_>,
    name: &str,
    port: u16,
    metadata: &NodeMetadata,
    should_have_shards: Option<bool>,
) -> Result<Node> {
    if tx.catalog().node_by_address(name, port).is_some() {
        return Err(DistError::DuplicateNode {
            name: name.to_string(),
            port,
        });
    }

    let group_id = match metadata.group_id {
        Some(group_id) => group_id,
        None if metadata.role == NodeRole::Secondary => {
            return Err(DistError::InvalidGroupState(format!(
                "secondary node {}:{} requires a group id",
                name, port
            )));
        }
        None => tx.next_group_id(),
    };

    match (metadata.role, tx.catalog().primary_of_group(group_id)) {
        (NodeRole::Primary, Some(existing)) => {
            return Err(DistError::InvalidGroupState(format!(
                "group {} already has primary node {}",
                group_id,
                existing.address()
            )));
        }
        (NodeRole::Secondary, None) => {
            return Err(DistError::InvalidGroupState(format!(
                "group {} has no primary node",
                group_id
            )));
        }
        _ => {}
    }

    let node = Node {
        node_id: tx.next_node_id(),
        name: name.to_string(),
        port,
        group_id,
        rack: metadata.rack.clone(),
        role: metadata.role,
        cluster: metadata
            .cluster
            .clone()
            .unwrap_or_else(|| tx.config().cluster_name.clone()),
        is_active: metadata.is_active,
        has_metadata: metadata.has_metadata,
        metadata_synced: metadata.metadata_synced,
        should_have_shards: should_have_shards
            .or(metadata.should_have_shards)
            .unwrap_or(group_id != COORDINATOR_GROUP_ID),
        added_at: Utc::now(),
    };

    info!(
        "Added node {} ({}) to group {} as {}",
        node.node_id,
        node.address(),
        node.group_id,
        node.role
    );
    tx.write(CatalogWrite::UpsertNode(node.clone()));
    Ok(node)
}

/// Register the coordinator in group 0, or update its address.
/// The coordinator row is never propagated.
pub fn set_coordinator_host(tx: &mut Transaction<'_>, name: &str, port: u16) -> Result<NodeId> {
    tx.lock(LockTag::NodeRegistry, LockMode::Exclusive)?;

    if let Some(existing) = tx.catalog().coordinator().cloned() {
        if existing.name != name || existing.port != port {
            if tx.catalog().node_by_address(name, port).is_some() {
                return Err(DistError::DuplicateNode {
                    name: name.to_string(),
                    port,
                });
            }
            info!(
                "Coordinator address changed from {} to {}:{}",
                existing.address(),
                name,
                port
            );
            let mut node = existing.clone();
            node.name = name.to_string();
            node.port = port;
            tx.write(CatalogWrite::UpsertNode(node));
        }
        return Ok(existing.node_id);
    }

    let metadata = NodeMetadata {
        has_metadata: true,
        metadata_synced: true,
        ..NodeMetadata::default().with_group(COORDINATOR_GROUP_ID)
    };
    let node = insert_node(tx, name, port, &metadata, Some(false))?;
    Ok(node.node_id)
}

/// Register the coordinator as a shard-bearing node when the registry is
/// empty, so that tables can be created on a single-node cluster.
pub fn insert_coordinator_if_cluster_empty(tx: &mut Transaction<'_>) -> Result<()> {
    if !tx.catalog().nodes.is_empty() {
        return Ok(());
    }

    tx.lock(LockTag::NodeRegistry, LockMode::Exclusive)?;
    if !tx.catalog().nodes.is_empty() {
        return Ok(());
    }

    let host = tx.config().coordinator_host.clone();
    let port = tx.config().coordinator_port;
    let metadata = NodeMetadata {
        has_metadata: true,
        metadata_synced: true,
        ..NodeMetadata::default().with_group(COORDINATOR_GROUP_ID)
    };
    insert_node(tx, &host, port, &metadata, Some(true))?;
    Ok(())
}

/// Look up a node without locking the registry
pub fn find_node_by_id(tx: &Transaction<'_>, node_id: NodeId) -> Result<Node> {
    tx.catalog()
        .node(node_id)
        .cloned()
        .ok_or(DistError::NodeNotFound(node_id))
}

/// Coordinator row, required for citus-local tables
pub fn coordinator_or_error(tx: &Transaction<'_>) -> Result<Node> {
    tx.catalog().coordinator().cloned().ok_or_else(|| {
        DistError::InvalidGroupState(
            "coordinator is not registered, call set_coordinator_host first".to_string(),
        )
    })
}

fn update_node(
    tx: &mut Transaction<'_>,
    node_id: NodeId,
    update: impl FnOnce(&mut Node),
) -> Result<Node> {
    tx.lock(LockTag::NodeRegistry, LockMode::Exclusive)?;
    let mut node = find_node_by_id(tx, node_id)?;
    update(&mut node);
    tx.write(CatalogWrite::UpsertNode(node.clone()));
    propagation::propagate_node_updated(tx, &node);
    Ok(node)
}

pub fn activate_node(tx: &mut Transaction<'_>, node_id: NodeId) -> Result<()> {
    let node = update_node(tx, node_id, |node| node.is_active = true)?;
    info!("Activated node {} ({})", node.node_id, node.address());

    if tx.config().replicate_reference_tables_on_activate
        && node.is_primary()
        && !node.is_coordinator()
    {
        orchestrator::replicate_reference_tables_to_node(tx, &node)?;
    }
    Ok(())
}

pub fn disable_node(tx: &mut Transaction<'_>, node_id: NodeId) -> Result<()> {
    let node = update_node(tx, node_id, |node| node.is_active = false)?;
    let placements = tx.catalog().placements_on_node(node_id).len();
    if placements > 0 {
        warn!(
            "Disabled node {} ({}) still holds {} placements",
            node.node_id,
            node.address(),
            placements
        );
    } else {
        info!("Disabled node {} ({})", node.node_id, node.address());
    }
    Ok(())
}

pub fn set_node_should_have_shards(
    tx: &mut Transaction<'_>,
    node_id: NodeId,
    should_have_shards: bool,
) -> Result<()> {
    let node = update_node(tx, node_id, |node| {
        node.should_have_shards = should_have_shards
    })?;
    info!(
        "Node {} ({}) should_have_shards = {}",
        node.node_id,
        node.address(),
        should_have_shards
    );
    Ok(())
}

/// Delete a node row. Nodes that still hold placements are only disabled,
/// never removed.
pub fn remove_node(tx: &mut Transaction<'_>, node_id: NodeId) -> Result<()> {
    tx.lock(LockTag::NodeRegistry, LockMode::Exclusive)?;
    let node = find_node_by_id(tx, node_id)?;

    let placements = tx.catalog().placements_on_node(node_id).len();
    if placements > 0 {
        return Err(DistError::InvalidGroupState(format!(
            "cannot remove node {}: it holds {} shard placements",
            node.address(),
            placements
        )));
    }

    if node.is_primary() {
        let secondaries = tx
            .catalog()
            .nodes
            .values()
            .filter(|n| n.group_id == node.group_id && n.role == NodeRole::Secondary)
            .count();
        if secondaries > 0 {
            return Err(DistError::InvalidGroupState(format!(
                "cannot remove primary {} while group {} has {} secondaries",
                node.address(),
                node.group_id,
                secondaries
            )));
        }
    }

    tx.write(CatalogWrite::DeleteNode(node_id));
    propagation::propagate_node_removed(tx, node_id);
    info!("Removed node {} ({})", node_id, node.address());
    Ok(())
}

/// Mark a worker as holding metadata and send it a full snapshot
pub fn sync_metadata_to_node(tx: &mut Transaction<'_>, node_id: NodeId) -> Result<()> {
    tx.lock(LockTag::NodeRegistry, LockMode::Exclusive)?;
    let mut node = find_node_by_id(tx, node_id)?;
    if node.is_coordinator() {
        return Err(DistError::InvalidGroupState(
            "the coordinator always has metadata".to_string(),
        ));
    }
    if !node.is_active_primary() {
        return Err(DistError::InvalidGroupState(format!(
            "node {} is not an active primary",
            node.address()
        )));
    }

    node.has_metadata = true;
    node.metadata_synced = true;
    tx.write(CatalogWrite::UpsertNode(node.clone()));

    propagation::send_metadata_snapshot(tx, &node);
    propagation::propagate_node_updated(tx, &node);
    info!("Synced metadata to node {} ({})", node.node_id, node.address());
    Ok(())
}

// Node lists. All are sorted by node id.

fn nodes_matching(
    tx: &mut Transaction<'_>,
    mode: LockMode,
    filter: impl Fn(&Node) -> bool,
) -> Result<Vec<Node>> {
    tx.lock(LockTag::NodeRegistry, mode)?;
    Ok(tx
        .catalog()
        .nodes
        .values()
        .filter(|n| filter(n))
        .cloned()
        .collect())
}

/// Active primaries, coordinator included
pub fn active_primary_nodes(tx: &mut Transaction<'_>, mode: LockMode) -> Result<Vec<Node>> {
    nodes_matching(tx, mode, Node::is_active_primary)
}

/// Active primaries other than the coordinator
pub fn list_active_primary_workers(
    tx: &mut Transaction<'_>,
    mode: LockMode,
) -> Result<Vec<Node>> {
    nodes_matching(tx, mode, |n| n.is_active_primary() && !n.is_coordinator())
}

/// Active primaries eligible for new placements
pub fn placement_candidate_nodes(tx: &mut Transaction<'_>, mode: LockMode) -> Result<Vec<Node>> {
    nodes_matching(tx, mode, |n| n.is_active_primary() && n.should_have_shards)
}
