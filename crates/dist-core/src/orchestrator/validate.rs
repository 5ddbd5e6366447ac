//! Eligibility checks run before a relation changes distribution type

use crate::error::{DistError, Result};
use crate::metadata::{
    Catalog, ColocationId, DistributionColumn, ForeignKey, Relation, RelationId, RelationKind,
    TableType,
};
use crate::txn::Transaction;

/// Relation must exist
pub fn ensure_citus_table_can_be_created(
    tx: &Transaction<'_>,
    relation_id: RelationId,
) -> Result<Relation> {
    tx.catalog()
        .relation(relation_id)
        .cloned()
        .ok_or_else(|| DistError::ineligible(relation_id.to_string(), "relation does not exist"))
}

pub fn ensure_table_not_distributed(tx: &Transaction<'_>, relation: &Relation) -> Result<()> {
    if let Some(table_type) = tx.catalog().table_type(relation.id) {
        return Err(DistError::ineligible(
            relation.qualified_name(),
            format!("relation is already a {} table", table_type),
        ));
    }
    Ok(())
}

/// Look up a distribution column by name
pub fn resolve_distribution_column(
    relation: &Relation,
    name: &str,
) -> Result<DistributionColumn> {
    let (index, column) = relation.column(name).ok_or_else(|| {
        DistError::ineligible(
            relation.qualified_name(),
            format!("column {} does not exist", name),
        )
    })?;
    Ok(DistributionColumn {
        name: column.name.clone(),
        index,
        column_type: column.column_type,
    })
}

/// Shape of a table as it would look after the pending change
#[derive(Debug, Clone, Copy)]
pub struct ProposedTable<'a> {
    pub relation: &'a Relation,
    /// None for plain tables
    pub table_type: Option<TableType>,
    pub colocation_id: ColocationId,
    pub distribution_column: Option<&'a str>,
}

impl<'a> ProposedTable<'a> {
    /// Current shape of a relation according to the catalog
    pub fn current(catalog: &'a Catalog, relation: &'a Relation) -> Self {
        let table = catalog.table(relation.id);
        Self {
            relation,
            table_type: table.map(|t| t.table_type()),
            colocation_id: table.map(|t| t.colocation_id).unwrap_or_default(),
            distribution_column: table
                .and_then(|t| t.distribution_column.as_ref())
                .map(|c| c.name.as_str()),
        }
    }
}

/// Checks every structural precondition for `relation` becoming `table_type`
pub fn ensure_relation_can_be_distributed(
    tx: &Transaction<'_>,
    relation: &Relation,
    distribution_column: Option<&DistributionColumn>,
    table_type: TableType,
    colocation_id: ColocationId,
) -> Result<()> {
    let catalog = tx.catalog();
    let name = relation.qualified_name();

    if let Some(parent_id) = relation.parent {
        if !catalog.is_citus_table(parent_id) {
            return Err(DistError::ineligible(
                name,
                "distributing a partition requires its parent to be distributed first",
            ));
        }
    }

    match relation.kind {
        RelationKind::Foreign if table_type != TableType::CitusLocal => {
            return Err(DistError::ineligible(
                name,
                "foreign tables can only be added to metadata as citus local tables",
            ));
        }
        RelationKind::Partitioned
            if matches!(
                table_type,
                TableType::Reference | TableType::RangeDistributed | TableType::AppendDistributed
            ) =>
        {
            return Err(DistError::ineligible(
                name,
                format!("partitioned tables cannot become {} tables", table_type),
            ));
        }
        _ => {}
    }

    if table_type.has_distribution_column() {
        let column = distribution_column.ok_or_else(|| {
            DistError::invalid_params(format!("{} tables require a distribution column", table_type))
        })?;
        let usable = match table_type {
            TableType::HashDistributed => column.column_type.is_hashable(),
            _ => column.column_type.is_orderable(),
        };
        if !usable {
            return Err(DistError::ineligible(
                name,
                format!(
                    "column {} of type {} cannot be used to {} distribute",
                    column.name,
                    column.column_type,
                    if table_type == TableType::HashDistributed { "hash" } else { "range" }
                ),
            ));
        }

        for constraint in &relation.unique_constraints {
            if !constraint.columns.iter().any(|c| *c == column.name) {
                return Err(DistError::ineligible(
                    name,
                    format!(
                        "unique constraint {} does not include distribution column {}",
                        constraint.name, column.name
                    ),
                ));
            }
        }
    }

    let proposed = ProposedTable {
        relation,
        table_type: Some(table_type),
        colocation_id,
        distribution_column: distribution_column.map(|c| c.name.as_str()),
    };
    for fk in &relation.foreign_keys {
        ensure_foreign_key_supported(catalog, &proposed, fk)?;
    }

    for (referencing_id, fk) in catalog.referencing_foreign_keys(relation.id) {
        let Some(referencing) = catalog.relation(referencing_id) else {
            continue;
        };
        if !catalog.is_citus_table(referencing_id) {
            return Err(DistError::ineligible(
                name,
                format!(
                    "plain table {} references it through foreign key {}",
                    referencing.qualified_name(),
                    fk.name
                ),
            ));
        }
    }
    Ok(())
}

/// Tables of the given types must not reference the relation
pub fn ensure_no_foreign_key_from_table_types(
    tx: &Transaction<'_>,
    relation: &Relation,
    table_types: &[TableType],
) -> Result<()> {
    let catalog = tx.catalog();
    for (referencing_id, fk) in catalog.referencing_foreign_keys(relation.id) {
        if let Some(referencing_type) = catalog.table_type(referencing_id) {
            if table_types.contains(&referencing_type) {
                return Err(DistError::ineligible(
                    relation.qualified_name(),
                    format!(
                        "{} table {} references it through foreign key {}",
                        referencing_type, referencing_id, fk.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Whether a foreign key from `referencing` is allowed
pub fn ensure_foreign_key_supported(
    catalog: &Catalog,
    referencing: &ProposedTable<'_>,
    fk: &ForeignKey,
) -> Result<()> {
    let self_reference = fk.referenced_relation == referencing.relation.id;
    let referenced_type = if self_reference {
        referencing.table_type
    } else {
        if catalog.relation(fk.referenced_relation).is_none() {
            return Err(DistError::ineligible(
                referencing.relation.qualified_name(),
                format!(
                    "foreign key {} references missing relation {}",
                    fk.name, fk.referenced_relation
                ),
            ));
        }
        catalog.table_type(fk.referenced_relation)
    };

    let unsupported = |detail: String| {
        Err(DistError::ineligible(
            referencing.relation.qualified_name(),
            format!("foreign key {} is not supported: {}", fk.name, detail),
        ))
    };

    let Some(referencing_type) = referencing.table_type else {
        // plain tables may only reference plain tables
        return match referenced_type {
            None => Ok(()),
            Some(t) => unsupported(format!("plain tables cannot reference {} tables", t)),
        };
    };
    let Some(referenced_type) = referenced_type else {
        return unsupported(format!(
            "{} tables cannot reference plain tables",
            referencing_type
        ));
    };

    if self_reference {
        if referencing_type == TableType::HashDistributed
            && !includes_distribution_column(&fk.columns, referencing.distribution_column)
        {
            return unsupported("self references must include the distribution column".into());
        }
        return Ok(());
    }
    if referenced_type == TableType::Reference {
        return Ok(());
    }

    let referenced_table = catalog.table(fk.referenced_relation);
    let supported = match (referencing_type, referenced_type) {
        (TableType::HashDistributed, TableType::HashDistributed) => {
            let referenced_column = referenced_table
                .and_then(|t| t.distribution_column.as_ref())
                .map(|c| c.name.as_str());
            let same_group = referenced_table
                .map(|t| t.colocation_id == referencing.colocation_id)
                .unwrap_or(false);
            same_group
                && distribution_columns_align(fk, referencing.distribution_column, referenced_column)
        }
        (TableType::SingleShardDistributed, TableType::SingleShardDistributed) => referenced_table
            .map(|t| t.colocation_id == referencing.colocation_id)
            .unwrap_or(false),
        (TableType::Reference, TableType::CitusLocal)
        | (TableType::CitusLocal, TableType::CitusLocal) => true,
        _ => false,
    };
    if supported {
        Ok(())
    } else {
        unsupported(format!(
            "{} tables cannot reference {} table {}",
            referencing_type, referenced_type, fk.referenced_relation
        ))
    }
}

fn includes_distribution_column(columns: &[String], distribution_column: Option<&str>) -> bool {
    distribution_column
        .map(|d| columns.iter().any(|c| c == d))
        .unwrap_or(false)
}

/// The key must pair the two distribution columns with each other
fn distribution_columns_align(
    fk: &ForeignKey,
    referencing_column: Option<&str>,
    referenced_column: Option<&str>,
) -> bool {
    let (Some(referencing_column), Some(referenced_column)) = (referencing_column, referenced_column)
    else {
        return false;
    };
    fk.columns
        .iter()
        .zip(&fk.referenced_columns)
        .any(|(from, to)| from == referencing_column && to == referenced_column)
}
