//! Temporarily removing and replaying foreign keys around a conversion

use tracing::debug;

use crate::error::{DistError, Result};
use crate::lock::{LockMode, LockTag};
use crate::metadata::{CatalogWrite, ForeignKey, RelationId};
use crate::orchestrator::validate::{ensure_foreign_key_supported, ProposedTable};
use crate::txn::Transaction;

/// A dropped foreign key and the relation that owned it
#[derive(Debug, Clone, PartialEq)]
pub struct SavedForeignKey {
    pub relation_id: RelationId,
    pub key: ForeignKey,
}

/// Relations on the other side of a foreign key with `relation_id`
pub fn foreign_key_partners(tx: &Transaction<'_>, relation_id: RelationId) -> Vec<RelationId> {
    let catalog = tx.catalog();
    let mut partners: Vec<RelationId> = catalog
        .relation(relation_id)
        .map(|r| r.foreign_keys.iter().map(|fk| fk.referenced_relation).collect())
        .unwrap_or_default();
    partners.extend(
        catalog
            .referencing_foreign_keys(relation_id)
            .into_iter()
            .map(|(owner, _)| owner),
    );
    partners.retain(|id| *id != relation_id);
    partners.sort_unstable();
    partners.dedup();
    partners
}

/// Drop the foreign keys between `relation_id` and the partners accepted by
/// `filter`, self references included when `filter(relation_id)` holds
pub fn drop_foreign_keys(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    filter: impl Fn(RelationId) -> bool,
) -> Result<Vec<SavedForeignKey>> {
    let mut targets: Vec<(RelationId, String)> = Vec::new();
    {
        let catalog = tx.catalog();
        if let Some(relation) = catalog.relation(relation_id) {
            targets.extend(
                relation
                    .foreign_keys
                    .iter()
                    .filter(|fk| filter(fk.referenced_relation))
                    .map(|fk| (relation_id, fk.name.clone())),
            );
        }
        targets.extend(
            catalog
                .referencing_foreign_keys(relation_id)
                .into_iter()
                .filter(|(owner, _)| filter(*owner))
                .map(|(owner, fk)| (owner, fk.name)),
        );
    }

    let mut saved = Vec::with_capacity(targets.len());
    for (owner, name) in targets {
        tx.lock(LockTag::Relation(owner), LockMode::AccessExclusive)?;
        let mut relation = tx.catalog().relation(owner).cloned().ok_or_else(|| {
            DistError::Catalog(format!("relation {} disappeared while dropping {}", owner, name))
        })?;
        let Some(position) = relation.foreign_keys.iter().position(|fk| fk.name == name) else {
            continue;
        };
        let key = relation.foreign_keys.remove(position);
        debug!("Dropped foreign key {} on {}", key.name, relation.qualified_name());
        tx.write(CatalogWrite::UpsertRelation(relation));
        saved.push(SavedForeignKey {
            relation_id: owner,
            key,
        });
    }
    Ok(saved)
}

/// Recreate saved foreign keys against the relations' new shapes.
///
/// Data was consistent before the keys were dropped, so the keys come back
/// with their previous validation state.
pub fn replay_foreign_keys(tx: &mut Transaction<'_>, saved: Vec<SavedForeignKey>) -> Result<()> {
    for SavedForeignKey { relation_id, key } in saved {
        tx.lock(LockTag::Relation(relation_id), LockMode::AccessExclusive)?;
        let catalog = tx.catalog();
        let mut relation = catalog.relation(relation_id).cloned().ok_or_else(|| {
            DistError::Catalog(format!(
                "relation {} disappeared before foreign key {} was restored",
                relation_id, key.name
            ))
        })?;
        ensure_foreign_key_supported(catalog, &ProposedTable::current(catalog, &relation), &key)?;
        debug!("Restored foreign key {} on {}", key.name, relation.qualified_name());
        relation.foreign_keys.push(key);
        tx.write(CatalogWrite::UpsertRelation(relation));
    }
    Ok(())
}
