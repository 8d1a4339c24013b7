//! Find-or-create for list memberships.
//!
//! The service allows the same entity on a list more than once, so callers
//! can pass qualifiers (field name to expected value) to pick the entry whose
//! list-scoped values match exactly.

use std::sync::Arc;

use serde_json::Value;

use crate::affinity::types::{EntityKind, FieldValue, ListEntry};
use crate::affinity::v1::LegacyApi;
use crate::error::SyncError;
use crate::fields::codec::{to_wire_values, wire_eq, FieldInput};
use crate::fields::FieldCatalog;

pub struct ListEntryReconciler {
    v1: LegacyApi,
    catalog: Arc<FieldCatalog>,
}

/// A qualifier resolved to its legacy field id and expected wire values.
struct ResolvedQualifier {
    name: String,
    field_id: i64,
    desired: Vec<Value>,
}

impl ResolvedQualifier {
    fn matches(&self, values: &[FieldValue]) -> bool {
        let current: Vec<&Value> = values
            .iter()
            .filter(|fv| fv.field_id == self.field_id)
            .map(|fv| &fv.value)
            .collect();
        let missing = self
            .desired
            .iter()
            .any(|d| !current.iter().any(|c| wire_eq(d, c)));
        let extra = current
            .iter()
            .any(|c| !self.desired.iter().any(|d| wire_eq(d, c)));
        !missing && !extra
    }
}

impl ListEntryReconciler {
    pub fn new(v1: LegacyApi, catalog: Arc<FieldCatalog>) -> Self {
        Self { v1, catalog }
    }

    async fn resolve_qualifiers(
        &self,
        kind: EntityKind,
        list_id: i64,
        qualifiers: &[(String, FieldInput)],
    ) -> Result<Vec<ResolvedQualifier>, SyncError> {
        let mut resolved = Vec::with_capacity(qualifiers.len());
        for (name, value) in qualifiers {
            let field = self.catalog.resolve_for(kind, name, Some(list_id)).await?;
            resolved.push(ResolvedQualifier {
                name: name.clone(),
                field_id: field.legacy()?.id,
                desired: to_wire_values(value),
            });
        }
        Ok(resolved)
    }

    /// Return the single entry of `entity_id` on `list_id` that satisfies
    /// every qualifier, creating a bare entry when none does.
    pub async fn find_or_create(
        &self,
        entity_id: i64,
        kind: EntityKind,
        list_id: i64,
        qualifiers: &[(String, FieldInput)],
    ) -> Result<ListEntry, SyncError> {
        log::info!("Finding or creating list entry - {} - {}", entity_id, list_id);

        let mut candidates: Vec<ListEntry> = self
            .v1
            .fetch_all_list_entries(list_id)
            .await?
            .into_iter()
            .filter(|e| e.entity_id == entity_id)
            .collect();
        log::info!(
            "Found {} entries for entity - {}",
            candidates.len(),
            entity_id
        );

        if !candidates.is_empty() && !qualifiers.is_empty() {
            let resolved = self.resolve_qualifiers(kind, list_id, qualifiers).await?;
            let mut surviving = Vec::new();
            for entry in candidates {
                let values = self
                    .v1
                    .fetch_field_values(entity_id, kind, Some(entry.id))
                    .await?;
                match resolved.iter().find(|q| !q.matches(&values)) {
                    Some(q) => log::debug!("List entry {} fails qualifier {}", entry.id, q.name),
                    None => surviving.push(entry),
                }
            }
            candidates = surviving;
        }

        match candidates.len() {
            0 => self.v1.create_list_entry(list_id, entity_id).await,
            1 => Ok(candidates.remove(0)),
            n => {
                log::error!(
                    "{} list entries match entity {} on list {}",
                    n,
                    entity_id,
                    list_id
                );
                Err(SyncError::AmbiguousListEntry { entity_id, list_id })
            }
        }
    }
}
