//! Reconciling write path.
//!
//! `Writer` is the entry point callers use: it owns one field catalog (one
//! sync session) and forwards the latest rate-limit entitlement to the mirror
//! store after every successful operation.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::affinity::entitlement::CallEntitlement;
use crate::affinity::types::{
    Company, EntityKind, FieldValue, ListEntry, NewCompany, NewOpportunity, NewPerson,
    Opportunity, Person,
};
use crate::affinity::v1::LegacyApi;
use crate::affinity::v2::VersionedApi;
use crate::affinity::Transport;
use crate::db::MirrorStore;
use crate::error::SyncError;
use crate::fields::codec::{normalize, reconcile, FieldDiff, FieldInput};
use crate::fields::FieldCatalog;
use crate::reconcile::{CachedLookup, EntityResolver, ListEntryReconciler};

/// The list entry whose list-scoped values are being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListScope {
    pub list_id: i64,
    pub list_entry_id: i64,
}

/// Counts of remote field-value operations issued by `update_fields`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub added: usize,
    pub removed: usize,
}

struct FieldPlan {
    name: String,
    field_id: i64,
    diff: FieldDiff,
}

pub struct Writer {
    transport: Arc<dyn Transport>,
    store: Arc<dyn MirrorStore>,
    v1: LegacyApi,
    catalog: Arc<FieldCatalog>,
    entities: EntityResolver,
    list_entries: ListEntryReconciler,
}

impl Writer {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn MirrorStore>) -> Self {
        let v1 = LegacyApi::new(transport.clone());
        let v2 = VersionedApi::new(transport.clone());
        let catalog = Arc::new(FieldCatalog::new(v1.clone(), v2));
        Self {
            entities: EntityResolver::new(v1.clone(), store.clone()),
            list_entries: ListEntryReconciler::new(v1.clone(), catalog.clone()),
            transport,
            store,
            v1,
            catalog,
        }
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// Latest entitlement observed by the transport.
    pub fn entitlement(&self) -> Option<CallEntitlement> {
        self.transport.last_entitlement()
    }

    /// Forward the latest entitlement to the store once `result` succeeded.
    fn recorded<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        let value = result?;
        if let Some(entitlement) = self.transport.last_entitlement() {
            if let Err(e) = self.store.insert_call_entitlement(&entitlement) {
                log::warn!("Failed to record call entitlement: {}", e);
            }
        }
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub async fn find_or_create_person(
        &self,
        first_name: &str,
        last_name: &str,
        emails: &[String],
        organization_ids: Vec<i64>,
        cached: Option<&CachedLookup>,
    ) -> Result<Person, SyncError> {
        let result = self
            .entities
            .find_or_create_person(first_name, last_name, emails, organization_ids, cached)
            .await;
        self.recorded(result)
    }

    pub async fn find_or_create_company(
        &self,
        name: &str,
        domain: Option<&str>,
        take_best_match: bool,
        cached: Option<&CachedLookup>,
    ) -> Result<Company, SyncError> {
        let result = self
            .entities
            .find_or_create_company(name, domain, take_best_match, cached)
            .await;
        self.recorded(result)
    }

    pub async fn find_or_create_opportunity(
        &self,
        name: &str,
        list_id: i64,
        company_ids: Vec<i64>,
        person_ids: Vec<i64>,
    ) -> Result<Opportunity, SyncError> {
        let result = self
            .entities
            .find_or_create_opportunity(name, list_id, company_ids, person_ids)
            .await;
        self.recorded(result)
    }

    pub async fn update_person(
        &self,
        person_id: i64,
        new_person: &NewPerson,
    ) -> Result<Person, SyncError> {
        let result = self.v1.update_person(person_id, new_person).await;
        self.recorded(result)
    }

    pub async fn update_company(
        &self,
        company_id: i64,
        new_company: &NewCompany,
    ) -> Result<Company, SyncError> {
        let result = self.v1.update_company(company_id, new_company).await;
        self.recorded(result)
    }

    pub async fn update_opportunity(
        &self,
        opportunity_id: i64,
        new_opportunity: &NewOpportunity,
    ) -> Result<Opportunity, SyncError> {
        let result = self
            .v1
            .update_opportunity(opportunity_id, new_opportunity)
            .await;
        self.recorded(result)
    }

    // -----------------------------------------------------------------------
    // List entries
    // -----------------------------------------------------------------------

    pub async fn create_list_entry(
        &self,
        entity_id: i64,
        list_id: i64,
    ) -> Result<ListEntry, SyncError> {
        let result = self.v1.create_list_entry(list_id, entity_id).await;
        self.recorded(result)
    }

    pub async fn find_or_create_list_entry(
        &self,
        entity_id: i64,
        kind: EntityKind,
        list_id: i64,
        qualifiers: &[(String, FieldInput)],
    ) -> Result<ListEntry, SyncError> {
        let result = self
            .list_entries
            .find_or_create(entity_id, kind, list_id, qualifiers)
            .await;
        self.recorded(result)
    }

    // -----------------------------------------------------------------------
    // Field values
    // -----------------------------------------------------------------------

    async fn plan_fields(
        &self,
        kind: EntityKind,
        fields: &[(String, FieldInput)],
        scope: Option<ListScope>,
        current: &[FieldValue],
        overwrite: bool,
    ) -> Result<Vec<FieldPlan>, SyncError> {
        let mut plans = Vec::with_capacity(fields.len());
        for (name, input) in fields {
            let field = self
                .catalog
                .resolve_for(kind, name, scope.map(|s| s.list_id))
                .await?;
            let legacy = field.legacy()?;
            let desired = normalize(name, input, field.value_type(), legacy.allows_multiple)?;

            let existing: Vec<FieldValue> = current
                .iter()
                .filter(|fv| fv.field_id == legacy.id)
                .cloned()
                .collect();
            if !existing.is_empty() && !overwrite {
                log::info!("Field already set - will not overwrite - {}", name);
            }

            plans.push(FieldPlan {
                name: name.clone(),
                field_id: legacy.id,
                diff: reconcile(&desired, &existing, overwrite),
            });
        }
        Ok(plans)
    }

    async fn apply_plan(
        &self,
        entity_id: i64,
        scope: Option<ListScope>,
        plan: &FieldPlan,
    ) -> Result<UpdateSummary, SyncError> {
        if plan.diff.is_empty() {
            log::debug!("No changes required - {}", plan.name);
            return Ok(UpdateSummary::default());
        }

        for stale in &plan.diff.to_remove {
            log::info!("Removing field value - {} - {}", plan.name, stale.value);
            self.v1.delete_field_value(stale.id).await?;
        }
        for value in &plan.diff.to_add {
            log::info!("Adding field value - {} - {}", plan.name, value);
            self.v1
                .create_field_value(
                    plan.field_id,
                    entity_id,
                    value,
                    scope.map(|s| s.list_entry_id),
                )
                .await?;
        }

        Ok(UpdateSummary {
            added: plan.diff.to_add.len(),
            removed: plan.diff.to_remove.len(),
        })
    }

    /// Bring the named fields of an entity (or of one of its list entries) to
    /// the desired values.
    ///
    /// Every field is resolved, validated and diffed before the first remote
    /// mutation, so an invalid value anywhere leaves the entity untouched.
    pub async fn update_fields(
        &self,
        entity_id: i64,
        kind: EntityKind,
        fields: &[(String, FieldInput)],
        scope: Option<ListScope>,
        overwrite: bool,
    ) -> Result<UpdateSummary, SyncError> {
        log::info!("Updating fields - {} - {} fields", entity_id, fields.len());

        if kind == EntityKind::Opportunity && scope.is_none() {
            return Err(SyncError::CannotDetermineCorrectEntity(
                "List entry id is required for opportunities".to_string(),
            ));
        }

        let result = async {
            let current = self
                .v1
                .fetch_field_values(entity_id, kind, scope.map(|s| s.list_entry_id))
                .await?;
            let plans = self
                .plan_fields(kind, fields, scope, &current, overwrite)
                .await?;

            let mut summary = UpdateSummary::default();
            for plan in &plans {
                let applied = self.apply_plan(entity_id, scope, plan).await?;
                summary.added += applied.added;
                summary.removed += applied.removed;
            }
            Ok::<_, SyncError>(summary)
        }
        .await;
        self.recorded(result)
    }

    /// Current values of one field, for callers that want to inspect before writing.
    pub async fn field_values(
        &self,
        entity_id: i64,
        kind: EntityKind,
        field_name: &str,
        scope: Option<ListScope>,
    ) -> Result<Vec<Value>, SyncError> {
        let field = self
            .catalog
            .resolve_for(kind, field_name, scope.map(|s| s.list_id))
            .await?;
        let field_id = field.legacy()?.id;
        let values = self
            .v1
            .fetch_field_values(entity_id, kind, scope.map(|s| s.list_entry_id))
            .await?;
        let result = Ok(values
            .into_iter()
            .filter(|fv| fv.field_id == field_id)
            .map(|fv| fv.value)
            .collect());
        self.recorded(result)
    }
}
