//! Field name resolution across both API generations.
//!
//! Field metadata (names, value types) comes from the versioned API, while
//! values are read and written through the legacy API by flat integer id.
//! The catalog pairs the two and caches the result for its own lifetime:
//! global fields once, list fields once per list id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::affinity::types::{EntityKind, FieldMetadata, LegacyField};
use crate::affinity::v1::LegacyApi;
use crate::affinity::v2::VersionedApi;
use crate::error::SyncError;

/// List field ids that stand for the list's entities rather than a field.
const RESERVED_LIST_FIELD_IDS: [&str; 2] = ["persons", "companies"];

/// Extract the legacy id from a versioned field id.
///
/// `field-1234` carries `1234` as its second dash-delimited segment; an id
/// without a dash is itself the legacy id.
pub fn parse_legacy_id(versioned_id: &str) -> Option<i64> {
    if versioned_id.contains('-') {
        versioned_id.split('-').nth(1)?.parse().ok()
    } else {
        versioned_id.parse().ok()
    }
}

/// A versioned field paired with its legacy counterpart, if one exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub versioned: FieldMetadata,
    pub legacy: Option<LegacyField>,
}

impl ResolvedField {
    pub fn name(&self) -> &str {
        &self.versioned.name
    }

    pub fn value_type(&self) -> &str {
        &self.versioned.value_type
    }

    /// The legacy definition, required for any value read or write.
    pub fn legacy(&self) -> Result<&LegacyField, SyncError> {
        self.legacy.as_ref().ok_or_else(|| {
            SyncError::FieldNotFound(format!(
                "{} has no legacy field for {}",
                self.versioned.name, self.versioned.id
            ))
        })
    }
}

/// Upper-cased field name to resolved field.
pub type FieldMap = HashMap<String, ResolvedField>;

#[derive(Debug, Default)]
struct GlobalFields {
    /// People then companies; a later kind replaces an earlier one on a name collision.
    merged: FieldMap,
    by_kind: HashMap<EntityKind, FieldMap>,
    collisions: Vec<String>,
}

pub struct FieldCatalog {
    v1: LegacyApi,
    v2: VersionedApi,
    legacy: Mutex<Option<Arc<HashMap<i64, LegacyField>>>>,
    global: Mutex<Option<Arc<GlobalFields>>>,
    lists: Mutex<HashMap<i64, Arc<FieldMap>>>,
}

impl FieldCatalog {
    pub fn new(v1: LegacyApi, v2: VersionedApi) -> Self {
        Self {
            v1,
            v2,
            legacy: Mutex::new(None),
            global: Mutex::new(None),
            lists: Mutex::new(HashMap::new()),
        }
    }

    async fn legacy_fields(&self) -> Result<Arc<HashMap<i64, LegacyField>>, SyncError> {
        if let Some(cached) = self.legacy.lock().clone() {
            return Ok(cached);
        }

        let fields: HashMap<i64, LegacyField> = self
            .v1
            .fetch_fields()
            .await?
            .into_iter()
            .map(|f| (f.id, f))
            .collect();
        let fields = Arc::new(fields);
        Ok(self.legacy.lock().get_or_insert(fields).clone())
    }

    fn pair(field: FieldMetadata, legacy: &HashMap<i64, LegacyField>) -> ResolvedField {
        let legacy_field = parse_legacy_id(&field.id).and_then(|id| legacy.get(&id).cloned());
        if legacy_field.is_none() {
            log::debug!("No legacy field for {} ({})", field.name, field.id);
        }
        ResolvedField {
            versioned: field,
            legacy: legacy_field,
        }
    }

    async fn global(&self) -> Result<Arc<GlobalFields>, SyncError> {
        if let Some(cached) = self.global.lock().clone() {
            return Ok(cached);
        }

        log::info!("Fetching global fields");
        let legacy = self.legacy_fields().await?;
        let fetched = [
            (EntityKind::Person, self.v2.get_person_fields().await?),
            (EntityKind::Company, self.v2.get_company_fields().await?),
        ];

        let mut global = GlobalFields::default();
        for (kind, fields) in fetched {
            let kind_map = global.by_kind.entry(kind).or_default();
            for field in fields.into_iter().filter(FieldMetadata::is_writable) {
                let key = field.name.to_uppercase();
                let resolved = Self::pair(field, &legacy);
                kind_map.insert(key.clone(), resolved.clone());
                if global.merged.insert(key.clone(), resolved).is_some() {
                    log::warn!("Global field name collision - {} (using {} field)", key, kind);
                    global.collisions.push(key);
                }
            }
        }

        let global = Arc::new(global);
        Ok(self.global.lock().get_or_insert(global).clone())
    }

    /// Writable global fields of people and companies, keyed by upper-cased name.
    pub async fn global_fields(&self) -> Result<FieldMap, SyncError> {
        Ok(self.global().await?.merged.clone())
    }

    /// Global field names defined for more than one entity kind.
    pub async fn collisions(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.global().await?.collisions.clone())
    }

    /// Writable fields of one list, keyed by upper-cased name.
    pub async fn list_fields(&self, list_id: i64) -> Result<Arc<FieldMap>, SyncError> {
        if let Some(cached) = self.lists.lock().get(&list_id) {
            return Ok(cached.clone());
        }

        log::info!("Fetching list fields - {}", list_id);
        let legacy = self.legacy_fields().await?;
        let fields: FieldMap = self
            .v2
            .get_list_fields(list_id)
            .await?
            .into_iter()
            .filter(|f| f.is_writable() && !RESERVED_LIST_FIELD_IDS.contains(&f.id.as_str()))
            .map(|f| (f.name.to_uppercase(), Self::pair(f, &legacy)))
            .collect();

        let mut lists = self.lists.lock();
        Ok(lists.entry(list_id).or_insert_with(|| Arc::new(fields)).clone())
    }

    /// Resolve a field by name, list fields first when a list is given.
    pub async fn resolve(
        &self,
        field_name: &str,
        list_id: Option<i64>,
    ) -> Result<ResolvedField, SyncError> {
        let key = field_name.to_uppercase();
        if let Some(list_id) = list_id {
            if let Some(field) = self.list_fields(list_id).await?.get(&key) {
                return Ok(field.clone());
            }
        }
        self.global()
            .await?
            .merged
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::FieldNotFound(field_name.to_string()))
    }

    /// Like [`resolve`](Self::resolve) but prefers the global fields of `kind`
    /// over another kind's field with the same name.
    pub async fn resolve_for(
        &self,
        kind: EntityKind,
        field_name: &str,
        list_id: Option<i64>,
    ) -> Result<ResolvedField, SyncError> {
        let key = field_name.to_uppercase();
        if let Some(list_id) = list_id {
            if let Some(field) = self.list_fields(list_id).await?.get(&key) {
                return Ok(field.clone());
            }
        }
        let global = self.global().await?;
        global
            .by_kind
            .get(&kind)
            .and_then(|fields| fields.get(&key))
            .or_else(|| global.merged.get(&key))
            .cloned()
            .ok_or_else(|| SyncError::FieldNotFound(field_name.to_string()))
    }
}
