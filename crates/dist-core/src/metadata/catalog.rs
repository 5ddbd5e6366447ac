//! Distributed catalog
//!
//! In-memory rendition of the system catalogs. A transaction works on a
//! private copy and records every mutation as a [`CatalogWrite`], so the same
//! write set can be replayed onto the committed catalog at commit time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::colocation::{ColocationGroup, ColocationSignature};
use super::node::{GroupId, Node, NodeId, COORDINATOR_GROUP_ID};
use super::relation::{ForeignKey, Relation, RelationId};
use super::shard::{Placement, PlacementId, Shard, ShardId, FIRST_SHARD_ID};
use super::table::{ColocationId, TableDistribution, TableType, INVALID_COLOCATION_ID};

/// Monotonic id sequences. Gaps are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequences {
    pub next_node_id: NodeId,
    pub next_group_id: GroupId,
    pub next_shard_id: ShardId,
    pub next_placement_id: PlacementId,
    pub next_colocation_id: ColocationId,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            next_node_id: 1,
            next_group_id: COORDINATOR_GROUP_ID + 1,
            next_shard_id: FIRST_SHARD_ID,
            next_placement_id: 1,
            next_colocation_id: INVALID_COLOCATION_ID + 1,
        }
    }
}

impl Sequences {
    pub fn node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    pub fn group_id(&mut self) -> GroupId {
        let id = self.next_group_id;
        self.next_group_id += 1;
        id
    }

    pub fn shard_id(&mut self) -> ShardId {
        let id = self.next_shard_id;
        self.next_shard_id += 1;
        id
    }

    pub fn placement_id(&mut self) -> PlacementId {
        let id = self.next_placement_id;
        self.next_placement_id += 1;
        id
    }

    pub fn colocation_id(&mut self) -> ColocationId {
        let id = self.next_colocation_id;
        self.next_colocation_id += 1;
        id
    }
}

/// A single catalog mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogWrite {
    UpsertRelation(Relation),
    DeleteRelation(RelationId),
    UpsertNode(Node),
    DeleteNode(NodeId),
    UpsertColocationGroup(ColocationGroup),
    UpsertTable(TableDistribution),
    DeleteTable(RelationId),
    InsertShard(Shard),
    DeleteShard(ShardId),
    InsertPlacement(Placement),
    DeletePlacement(PlacementId),
}

/// Distributed catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// Cluster name
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every commit; cached metadata older than this is stale
    pub version: u64,
    pub relations: BTreeMap<RelationId, Relation>,
    pub nodes: BTreeMap<NodeId, Node>,
    pub colocation_groups: BTreeMap<ColocationId, ColocationGroup>,
    pub tables: BTreeMap<RelationId, TableDistribution>,
    pub shards: BTreeMap<ShardId, Shard>,
    pub placements: BTreeMap<PlacementId, Placement>,
    pub sequences: Sequences,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            updated_at: now,
            version: 0,
            relations: BTreeMap::new(),
            nodes: BTreeMap::new(),
            colocation_groups: BTreeMap::new(),
            tables: BTreeMap::new(),
            shards: BTreeMap::new(),
            placements: BTreeMap::new(),
            sequences: Sequences::default(),
        }
    }

    /// Apply one mutation
    pub fn apply(&mut self, write: &CatalogWrite) {
        match write {
            CatalogWrite::UpsertRelation(relation) => {
                self.relations.insert(relation.id, relation.clone());
            }
            CatalogWrite::DeleteRelation(id) => {
                self.relations.remove(id);
            }
            CatalogWrite::UpsertNode(node) => {
                self.nodes.insert(node.node_id, node.clone());
            }
            CatalogWrite::DeleteNode(id) => {
                self.nodes.remove(id);
            }
            CatalogWrite::UpsertColocationGroup(group) => {
                self.colocation_groups
                    .insert(group.colocation_id, group.clone());
            }
            CatalogWrite::UpsertTable(table) => {
                self.tables.insert(table.relation_id, table.clone());
            }
            CatalogWrite::DeleteTable(id) => {
                self.tables.remove(id);
            }
            CatalogWrite::InsertShard(shard) => {
                self.shards.insert(shard.shard_id, shard.clone());
            }
            CatalogWrite::DeleteShard(id) => {
                self.shards.remove(id);
            }
            CatalogWrite::InsertPlacement(placement) => {
                self.placements
                    .insert(placement.placement_id, placement.clone());
            }
            CatalogWrite::DeletePlacement(id) => {
                self.placements.remove(id);
            }
        }
    }

    /// Mark a commit
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    // Relations

    pub fn relation(&self, id: RelationId) -> Option<&Relation> {
        self.relations.get(&id)
    }

    /// Relations matching a bare or schema-qualified name. A bare name may
    /// match one relation per schema.
    pub fn relations_by_name(&self, name: &str) -> Vec<&Relation> {
        self.relations
            .values()
            .filter(|r| r.matches_name(name))
            .collect()
    }

    /// Foreign keys defined on other relations that point at `id`
    pub fn referencing_foreign_keys(&self, id: RelationId) -> Vec<(RelationId, ForeignKey)> {
        self.relations
            .values()
            .filter(|r| r.id != id)
            .flat_map(|r| {
                r.foreign_keys
                    .iter()
                    .filter(|fk| fk.referenced_relation == id)
                    .map(move |fk| (r.id, fk.clone()))
            })
            .collect()
    }

    // Distribution records

    pub fn table(&self, id: RelationId) -> Option<&TableDistribution> {
        self.tables.get(&id)
    }

    /// None for plain tables
    pub fn table_type(&self, id: RelationId) -> Option<TableType> {
        self.tables.get(&id).map(TableDistribution::table_type)
    }

    pub fn is_citus_table(&self, id: RelationId) -> bool {
        self.tables.contains_key(&id)
    }

    pub fn tables_of_type(&self, table_type: TableType) -> Vec<RelationId> {
        self.tables
            .values()
            .filter(|t| t.table_type() == table_type)
            .map(|t| t.relation_id)
            .collect()
    }

    /// Relations in a colocation group, sorted by id
    pub fn tables_in_group(&self, colocation_id: ColocationId) -> Vec<RelationId> {
        if colocation_id == INVALID_COLOCATION_ID {
            return Vec::new();
        }
        self.tables
            .values()
            .filter(|t| t.colocation_id == colocation_id)
            .map(|t| t.relation_id)
            .collect()
    }

    /// A table of the group other than `exclude` that already has shards
    pub fn colocated_table_with_shards(
        &self,
        colocation_id: ColocationId,
        exclude: RelationId,
    ) -> Option<RelationId> {
        self.tables_in_group(colocation_id)
            .into_iter()
            .find(|id| *id != exclude && !self.shards_of(*id).is_empty())
    }

    // Colocation groups

    pub fn colocation_group(&self, id: ColocationId) -> Option<&ColocationGroup> {
        self.colocation_groups.get(&id)
    }

    /// Lowest group id whose signature matches
    pub fn find_colocation_group(&self, signature: &ColocationSignature) -> Option<ColocationId> {
        self.colocation_groups
            .values()
            .find(|g| g.signature == *signature)
            .map(|g| g.colocation_id)
    }

    // Nodes

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_by_address(&self, name: &str, port: u16) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| n.name == name && n.port == port)
    }

    pub fn primary_of_group(&self, group_id: GroupId) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| n.group_id == group_id && n.is_primary())
    }

    pub fn coordinator(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.is_coordinator())
    }

    // Shards and placements

    pub fn shard(&self, id: ShardId) -> Option<&Shard> {
        self.shards.get(&id)
    }

    /// Shards of a relation in creation order
    pub fn shards_of(&self, relation_id: RelationId) -> Vec<&Shard> {
        self.shards
            .values()
            .filter(|s| s.relation_id == relation_id)
            .collect()
    }

    /// Placements of a shard in creation order
    pub fn placements_of(&self, shard_id: ShardId) -> Vec<&Placement> {
        self.placements
            .values()
            .filter(|p| p.shard_id == shard_id)
            .collect()
    }

    /// All placements of every shard of a relation
    pub fn placements_of_relation(&self, relation_id: RelationId) -> Vec<&Placement> {
        self.placements
            .values()
            .filter(|p| {
                self.shards
                    .get(&p.shard_id)
                    .map(|s| s.relation_id == relation_id)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Node of the first placement of the first shard of a relation
    pub fn first_placement_node(&self, relation_id: RelationId) -> Option<NodeId> {
        let shard = self.shards_of(relation_id).into_iter().next()?;
        let placement = self.placements_of(shard.shard_id).into_iter().next()?;
        Some(placement.node_id)
    }

    pub fn placements_on_node(&self, node_id: NodeId) -> Vec<&Placement> {
        self.placements
            .values()
            .filter(|p| p.node_id == node_id)
            .collect()
    }

    /// Get catalog statistics
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            total_nodes: self.nodes.len(),
            active_primaries: self
                .nodes
                .values()
                .filter(|n| n.is_active_primary())
                .count(),
            relations: self.relations.len(),
            distributed_tables: self.tables.len(),
            colocation_groups: self.colocation_groups.len(),
            total_shards: self.shards.len(),
            total_placements: self.placements.len(),
            version: self.version,
        }
    }
}

/// Catalog statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_nodes: usize,
    pub active_primaries: usize,
    pub relations: usize,
    pub distributed_tables: usize,
    pub colocation_groups: usize,
    pub total_shards: usize,
    pub total_placements: usize,
    pub version: u64,
}
