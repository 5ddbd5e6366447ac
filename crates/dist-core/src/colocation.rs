//! Colocation resolver
//!
//! Maps a new table's distribution parameters to a colocation group,
//! creating the group when no existing one matches.

use tracing::info;

use crate::error::{DistError, Result};
use crate::lock::{LockMode, LockTag};
use crate::metadata::{
    CatalogWrite, ColocationGroup, ColocationId, ColocationSignature, DistributionColumn,
    RelationId, TableType, INVALID_COLOCATION_ID,
};
use crate::orchestrator::{decide_citus_table_params, DistributedTableParams};
use crate::txn::Transaction;

/// Where a new table should be colocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColocationParam<'a> {
    /// Any group with a matching signature, or a new one
    Default,
    /// Always a new group
    None,
    /// The group of the named table
    Table(&'a str),
    /// This group id, used without validation
    Id(ColocationId),
}

impl<'a> ColocationParam<'a> {
    /// Interpret the textual `colocate_with` argument
    pub fn parse(value: &'a str) -> Self {
        if value.eq_ignore_ascii_case("default") {
            ColocationParam::Default
        } else if value.eq_ignore_ascii_case("none") {
            ColocationParam::None
        } else {
            ColocationParam::Table(value)
        }
    }

    pub fn is_default_or_none(&self) -> bool {
        matches!(self, ColocationParam::Default | ColocationParam::None)
    }
}

impl std::fmt::Display for ColocationParam<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColocationParam::Default => write!(f, "default"),
            ColocationParam::None => write!(f, "none"),
            ColocationParam::Table(name) => write!(f, "{}", name),
            ColocationParam::Id(id) => write!(f, "colocation id {}", id),
        }
    }
}

/// Signature used for default colocation, None for types outside groups
pub fn colocation_signature(
    table_type: TableType,
    shard_count: u32,
    replication_factor: u32,
    distribution_column: Option<&DistributionColumn>,
) -> Option<ColocationSignature> {
    match table_type {
        TableType::HashDistributed => distribution_column
            .map(|c| ColocationSignature::hash(shard_count, replication_factor, c.column_type)),
        TableType::SingleShardDistributed => Some(ColocationSignature::single_shard()),
        TableType::Reference => Some(ColocationSignature::reference()),
        TableType::RangeDistributed | TableType::AppendDistributed | TableType::CitusLocal => {
            None
        }
    }
}

/// Resolve the colocation group for a new table of `table_type`.
///
/// The caller holds a lock on `relation_id`.
pub fn resolve_or_create_colocation(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    table_type: TableType,
    params: Option<&DistributedTableParams<'_>>,
    distribution_column: Option<&DistributionColumn>,
) -> Result<ColocationId> {
    if let Some(DistributedTableParams {
        colocation: ColocationParam::Id(id),
        ..
    }) = params
    {
        return Ok(*id);
    }

    let shard_count = params.map(|p| p.shard_count).unwrap_or(1);
    let replication_factor = tx.config().shard_replication_factor;
    let Some(signature) =
        colocation_signature(table_type, shard_count, replication_factor, distribution_column)
    else {
        if table_type == TableType::HashDistributed {
            return Err(DistError::invalid_params(
                "hash distributed tables require a distribution column",
            ));
        }
        return Ok(INVALID_COLOCATION_ID);
    };

    let colocation = params
        .map(|p| p.colocation)
        .unwrap_or(ColocationParam::Default);

    match colocation {
        ColocationParam::Default => {
            // held until commit, so a second creator with the same signature
            // finds this transaction's group instead of making its own
            tx.lock(LockTag::ColocationCatalog, LockMode::Exclusive)?;
            match tx.catalog().find_colocation_group(&signature) {
                Some(id) => Ok(id),
                None => Ok(create_colocation_group(tx, signature)),
            }
        }
        ColocationParam::None => Ok(create_colocation_group(tx, signature)),
        ColocationParam::Table(name) => colocation_of_table(
            tx,
            relation_id,
            table_type,
            name,
            params,
            distribution_column,
        ),
        ColocationParam::Id(id) => Ok(id),
    }
}

fn create_colocation_group(tx: &mut Transaction<'_>, signature: ColocationSignature) -> ColocationId {
    let colocation_id = tx.next_colocation_id();
    info!(
        "Created colocation group {} (shard_count={}, replication_factor={:?}, column_type={:?})",
        colocation_id,
        signature.shard_count,
        signature.replication_factor,
        signature.distribution_column_type
    );
    tx.write(CatalogWrite::UpsertColocationGroup(ColocationGroup::new(
        colocation_id,
        signature,
    )));
    colocation_id
}

/// Colocate with a named table after checking that the two are compatible
fn colocation_of_table(
    tx: &Transaction<'_>,
    relation_id: RelationId,
    table_type: TableType,
    name: &str,
    params: Option<&DistributedTableParams<'_>>,
    distribution_column: Option<&DistributionColumn>,
) -> Result<ColocationId> {
    let catalog = tx.catalog();
    let target = match catalog.relations_by_name(name).as_slice() {
        [] => {
            return Err(DistError::invalid_params(format!(
                "relation {} does not exist",
                name
            )))
        }
        [target] => *target,
        _ => {
            return Err(DistError::invalid_params(format!(
                "relation name {} is ambiguous, qualify it with a schema",
                name
            )))
        }
    };
    let target_table = catalog.table(target.id).ok_or_else(|| {
        DistError::invalid_params(format!(
            "cannot colocate with {}: it is not a distributed table",
            name
        ))
    })?;

    let target_type = target_table.table_type();
    if target_type != table_type {
        return Err(DistError::invalid_params(format!(
            "cannot colocate {} table {} with {} table {}",
            table_type, relation_id, target_type, name
        )));
    }

    let column_type = distribution_column.map(|c| c.column_type);
    if column_type != target_table.distribution_column_type() {
        return Err(DistError::invalid_params(format!(
            "cannot colocate tables {} and {}: distribution column types do not match",
            relation_id, name
        )));
    }

    let replication_model = decide_citus_table_params(tx.config(), table_type).replication_model;
    if replication_model != target_table.replication_model {
        return Err(DistError::invalid_params(format!(
            "cannot colocate tables {} and {}: replication models do not match",
            relation_id, name
        )));
    }

    if let Some(params) = params {
        if params.shard_count_is_strict && table_type == TableType::HashDistributed {
            let target_shards = catalog
                .colocation_group(target_table.colocation_id)
                .map(|g| g.shard_count())
                .unwrap_or_else(|| catalog.shards_of(target.id).len() as u32);
            if target_shards != params.shard_count {
                return Err(DistError::invalid_params(format!(
                    "cannot colocate tables {} and {}: shard counts do not match ({} vs {})",
                    relation_id, name, params.shard_count, target_shards
                )));
            }
        }
    }

    Ok(target_table.colocation_id)
}
