//! Engine error taxonomy

use crate::lock::{LockMode, LockTag};
use crate::metadata::{NodeId, TableType};
use crate::remote::RemoteError;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, DistError>;

/// Errors surfaced by distribution operations.
///
/// Every error aborts the enclosing transaction; nothing is retried here.
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    /// Caller supplied contradictory or malformed options
    #[error("invalid distribution parameters: {0}")]
    InvalidParams(String),

    /// Relation fails a distribution precondition
    #[error("cannot distribute relation {relation}: {reason}")]
    IneligibleRelation { relation: String, reason: String },

    /// Requested state transition is not implemented
    #[error("cannot convert {} table to {to} table", describe_table_class(.from))]
    UnsupportedConversion {
        from: Option<TableType>,
        to: TableType,
    },

    #[error("node {name}:{port} is already registered")]
    DuplicateNode { name: String, port: u16 },

    #[error("invalid node group state: {0}")]
    InvalidGroupState(String),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("replication factor {replication_factor} cannot be used: {detail}")]
    ReplicationFactorConflict {
        replication_factor: u32,
        detail: String,
    },

    /// Raised by the lock manager when a conflicting lock is not released in time
    #[error("could not acquire {mode} lock on {tag}: held by another transaction")]
    LockConflict { tag: LockTag, mode: LockMode },

    #[error("remote execution failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("catalog inconsistency: {0}")]
    Catalog(String),
}

impl DistError {
    pub fn ineligible(relation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IneligibleRelation {
            relation: relation.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Whether the error was caused by user input rather than the cluster state
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DistError::InvalidParams(_)
                | DistError::IneligibleRelation { .. }
                | DistError::UnsupportedConversion { .. }
                | DistError::DuplicateNode { .. }
                | DistError::ReplicationFactorConflict { .. }
        )
    }
}

fn describe_table_class(class: &Option<TableType>) -> String {
    match class {
        Some(table_type) => table_type.to_string(),
        None => "plain".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_conversion_message() {
        let err = DistError::UnsupportedConversion {
            from: None,
            to: TableType::CitusLocal,
        };
        assert_eq!(err.to_string(), "cannot convert plain table to citus local table");

        let err = DistError::UnsupportedConversion {
            from: Some(TableType::HashDistributed),
            to: TableType::Reference,
        };
        assert_eq!(
            err.to_string(),
            "cannot convert hash distributed table to reference table"
        );
    }

    #[test]
    fn test_user_errors() {
        assert!(DistError::invalid_params("x").is_user_error());
        assert!(!DistError::NodeNotFound(3).is_user_error());
        assert!(!DistError::Catalog("broken".into()).is_user_error());
    }
}
