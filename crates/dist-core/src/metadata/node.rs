//! Node registry rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node ID
pub type NodeId = u32;

/// Group ID. Each group has at most one primary.
pub type GroupId = i32;

/// The coordinator always lives in group 0
pub const COORDINATOR_GROUP_ID: GroupId = 0;

/// Node role within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts writes and hosts placements
    Primary,
    /// Read replica of the group's primary
    Secondary,
}

impl Default for NodeRole {
    fn default() -> Self {
        Self::Primary
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Registered cluster member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    /// Host name
    pub name: String,
    pub port: u16,
    pub group_id: GroupId,
    pub rack: String,
    pub role: NodeRole,
    /// Logical cluster the node serves
    pub cluster: String,
    /// Inactive nodes keep their row but receive no new placements
    pub is_active: bool,
    /// Node holds a copy of the distributed metadata
    pub has_metadata: bool,
    /// Metadata copy is up to date
    pub metadata_synced: bool,
    /// Node is eligible for new shard placements
    pub should_have_shards: bool,
    /// Registration time
    pub added_at: DateTime<Utc>,
}

impl Node {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }

    pub fn is_coordinator(&self) -> bool {
        self.group_id == COORDINATOR_GROUP_ID && self.role == NodeRole::Primary
    }

    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }

    pub fn is_active_primary(&self) -> bool {
        self.is_active && self.is_primary()
    }

    /// Whether metadata changes must be sent to this node
    pub fn receives_metadata(&self) -> bool {
        self.is_active_primary()
            && self.has_metadata
            && self.metadata_synced
            && !self.is_coordinator()
    }
}

/// Optional attributes supplied when adding a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Target group; a fresh group is allocated when absent
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default = "default_rack")]
    pub rack: String,
    #[serde(default)]
    pub role: NodeRole,
    /// Falls back to the engine's cluster name
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub has_metadata: bool,
    #[serde(default)]
    pub metadata_synced: bool,
    /// Defaults to true, except for the coordinator group
    #[serde(default)]
    pub should_have_shards: Option<bool>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            group_id: None,
            rack: default_rack(),
            role: NodeRole::Primary,
            cluster: None,
            is_active: true,
            has_metadata: false,
            metadata_synced: false,
            should_have_shards: None,
        }
    }
}

impl NodeMetadata {
    /// Metadata for a worker that already holds a synced metadata copy
    pub fn metadata_worker() -> Self {
        Self {
            has_metadata: true,
            metadata_synced: true,
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }
}

fn default_rack() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}
