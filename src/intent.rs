//! JSON intent documents applied by the `affinity-sync` binary.
//!
//! ```json
//! {
//!   "entity": { "kind": "company", "name": "Acme", "domain": "acme.com" },
//!   "listEntry": { "listId": 12, "qualifiers": { "Round": "Seed" } },
//!   "fields": { "Industry": "Robotics" },
//!   "listFields": { "Stage": "Diligence", "Closed": { "datetime": "2024-06-01T09:30:00" } },
//!   "overwrite": true
//! }
//! ```
//!
//! Field values are plain JSON: strings, numbers, lists of either, address
//! objects for locations, and `{ "datetime": "YYYY-MM-DDTHH:MM:SS" }` for dates.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::affinity::types::{EntityKind, Location};
use crate::error::SyncError;
use crate::fields::codec::{FieldInput, DATETIME_FORMAT};
use crate::reconcile::CachedLookup;
use crate::writer::{ListScope, Writer};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedIntent {
    pub field_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonIntent {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub organization_ids: Vec<i64>,
    #[serde(default)]
    pub cached: Option<CachedIntent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyIntent {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub take_best_match: bool,
    #[serde(default)]
    pub cached: Option<CachedIntent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityIntent {
    pub name: String,
    pub list_id: i64,
    #[serde(default)]
    pub company_ids: Vec<i64>,
    #[serde(default)]
    pub person_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityIntent {
    Person(PersonIntent),
    Company(CompanyIntent),
    Opportunity(OpportunityIntent),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntryIntent {
    pub list_id: i64,
    #[serde(default)]
    pub qualifiers: BTreeMap<String, FieldInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub entity: EntityIntent,
    #[serde(default)]
    pub list_entry: Option<ListEntryIntent>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldInput>,
    #[serde(default)]
    pub list_fields: BTreeMap<String, FieldInput>,
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

/// Ids touched by one applied intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentOutcome {
    pub entity_kind: String,
    pub entity_id: i64,
    pub list_entry_id: Option<i64>,
    pub values_added: usize,
    pub values_removed: usize,
}

impl Intent {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::InvalidArgument(format!("Cannot read intent {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let intent: Intent = serde_json::from_str(raw)?;
        intent.validate()?;
        Ok(intent)
    }

    fn validate(&self) -> Result<(), SyncError> {
        let is_opportunity = matches!(self.entity, EntityIntent::Opportunity(_));
        if is_opportunity && self.list_entry.is_some() {
            return Err(SyncError::InvalidArgument(
                "Opportunities already live on their list; drop listEntry".to_string(),
            ));
        }
        if !is_opportunity && self.list_entry.is_none() && !self.list_fields.is_empty() {
            return Err(SyncError::InvalidArgument(
                "listFields require a listEntry".to_string(),
            ));
        }
        Ok(())
    }
}

fn pairs(map: &BTreeMap<String, FieldInput>) -> Vec<(String, FieldInput)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn cached_lookup(cached: &Option<CachedIntent>) -> Option<CachedLookup> {
    cached
        .as_ref()
        .map(|c| CachedLookup::new(c.field_name.clone(), c.value.clone()))
}

/// Ensure the entity, then its list entry, then write fields.
pub async fn apply(writer: &Writer, intent: &Intent) -> Result<IntentOutcome, SyncError> {
    let (kind, entity_id, own_scope) = match &intent.entity {
        EntityIntent::Person(p) => {
            let lookup = cached_lookup(&p.cached);
            let person = writer
                .find_or_create_person(
                    &p.first_name,
                    &p.last_name,
                    &p.emails,
                    p.organization_ids.clone(),
                    lookup.as_ref(),
                )
                .await?;
            (EntityKind::Person, person.id, None)
        }
        EntityIntent::Company(c) => {
            let lookup = cached_lookup(&c.cached);
            let company = writer
                .find_or_create_company(
                    &c.name,
                    c.domain.as_deref(),
                    c.take_best_match,
                    lookup.as_ref(),
                )
                .await?;
            (EntityKind::Company, company.id, None)
        }
        EntityIntent::Opportunity(o) => {
            let opportunity = writer
                .find_or_create_opportunity(
                    &o.name,
                    o.list_id,
                    o.company_ids.clone(),
                    o.person_ids.clone(),
                )
                .await?;
            let list_entry_id = opportunity.list_entry_id().ok_or_else(|| {
                SyncError::CannotDetermineCorrectEntity(format!(
                    "Opportunity {} has no list entry",
                    opportunity.id
                ))
            })?;
            let scope = ListScope {
                list_id: opportunity.list_id().unwrap_or(o.list_id),
                list_entry_id,
            };
            (EntityKind::Opportunity, opportunity.id, Some(scope))
        }
    };

    let mut outcome = IntentOutcome {
        entity_kind: kind.to_string(),
        entity_id,
        list_entry_id: own_scope.map(|s| s.list_entry_id),
        ..Default::default()
    };

    if !intent.fields.is_empty() {
        let summary = writer
            .update_fields(entity_id, kind, &pairs(&intent.fields), own_scope, intent.overwrite)
            .await?;
        outcome.values_added += summary.added;
        outcome.values_removed += summary.removed;
    }

    let list_scope = match &intent.list_entry {
        Some(entry) => {
            let qualifiers = pairs(&entry.qualifiers);
            let list_entry = writer
                .find_or_create_list_entry(entity_id, kind, entry.list_id, &qualifiers)
                .await?;
            outcome.list_entry_id = Some(list_entry.id);
            Some(ListScope {
                list_id: entry.list_id,
                list_entry_id: list_entry.id,
            })
        }
        None => own_scope,
    };

    if !intent.list_fields.is_empty() {
        let summary = writer
            .update_fields(
                entity_id,
                kind,
                &pairs(&intent.list_fields),
                list_scope,
                intent.overwrite,
            )
            .await?;
        outcome.values_added += summary.added;
        outcome.values_removed += summary.removed;
    }

    Ok(outcome)
}

// ---------------------------------------------------------------------------
// JSON field values
// ---------------------------------------------------------------------------

const LOCATION_KEYS: [&str; 5] = ["streetAddress", "street_address", "city", "state", "country"];

fn parse_datetime(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.naive_utc()))
        .map_err(|_| format!("Invalid datetime: {}", raw))
}

fn scalar_input(value: Value) -> Result<FieldInput, String> {
    match value {
        Value::Null => Ok(FieldInput::Null),
        Value::String(s) => Ok(FieldInput::Text(s)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(FieldInput::Int(i)),
            None => n
                .as_f64()
                .map(FieldInput::Number)
                .ok_or_else(|| format!("Unsupported number: {}", n)),
        },
        Value::Object(obj) => {
            if let Some(raw) = obj.get("datetime") {
                let raw = raw
                    .as_str()
                    .ok_or_else(|| "datetime must be a string".to_string())?;
                return parse_datetime(raw).map(FieldInput::DateTime);
            }
            if obj.keys().any(|k| LOCATION_KEYS.contains(&k.as_str())) {
                return serde_json::from_value::<Location>(Value::Object(obj))
                    .map(FieldInput::Location)
                    .map_err(|e| e.to_string());
            }
            Err("Unsupported object field value".to_string())
        }
        other => Err(format!("Unsupported field value: {}", other)),
    }
}

fn list_input(items: Vec<Value>) -> Result<FieldInput, String> {
    let scalars = items
        .into_iter()
        .filter(|item| !item.is_null())
        .map(scalar_input)
        .collect::<Result<Vec<_>, _>>()?;

    if scalars.is_empty() {
        return Ok(FieldInput::EmptyList);
    }
    if scalars.iter().all(|s| matches!(s, FieldInput::Int(_))) {
        return Ok(FieldInput::IntList(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    FieldInput::Int(i) => Some(i),
                    _ => None,
                })
                .collect(),
        ));
    }
    if scalars
        .iter()
        .all(|s| matches!(s, FieldInput::Int(_) | FieldInput::Number(_)))
    {
        return Ok(FieldInput::NumberList(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    FieldInput::Int(i) => Some(i as f64),
                    FieldInput::Number(n) => Some(n),
                    _ => None,
                })
                .collect(),
        ));
    }
    if scalars
        .iter()
        .all(|s| matches!(s, FieldInput::Text(_)))
    {
        return Ok(FieldInput::TextList(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    FieldInput::Text(t) => Some(t),
                    _ => None,
                })
                .collect(),
        ));
    }
    if scalars
        .iter()
        .all(|s| matches!(s, FieldInput::Location(_)))
    {
        return Ok(FieldInput::LocationList(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    FieldInput::Location(l) => Some(l),
                    _ => None,
                })
                .collect(),
        ));
    }
    Err("List field values must share one type".to_string())
}

impl TryFrom<Value> for FieldInput {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => list_input(items),
            other => scalar_input(other),
        }
    }
}

impl<'de> Deserialize<'de> for FieldInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FieldInput::try_from(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        company_json, field_metadata_json, field_value_json, legacy_field_json, list_entry_json,
        opportunity_json, script_catalog, test_db, FakeTransport,
    };
    use crate::fields::codec::normalize;
    use chrono::NaiveDate;
    use reqwest::Method;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_field_values_from_json() {
        let dt = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let cases = [
            (json!(null), FieldInput::Null),
            (json!("Seed"), FieldInput::Text("Seed".into())),
            (json!(4), FieldInput::Int(4)),
            (json!(2.5), FieldInput::Number(2.5)),
            (json!([1, 2]), FieldInput::IntList(vec![1, 2])),
            (json!([1, 2.5]), FieldInput::NumberList(vec![1.0, 2.5])),
            (json!(["a", "b"]), FieldInput::TextList(vec!["a".into(), "b".into()])),
            (json!({ "datetime": "2024-06-01T09:30:00" }), FieldInput::DateTime(dt)),
            (json!({ "datetime": "2024-06-01T09:30:00Z" }), FieldInput::DateTime(dt)),
        ];
        for (raw, expected) in cases {
            assert_eq!(FieldInput::try_from(raw).unwrap(), expected);
        }

        let location = FieldInput::try_from(json!({ "city": "Oslo", "country": "NO" })).unwrap();
        assert!(matches!(location, FieldInput::Location(l) if l.city.as_deref() == Some("Oslo")));

        assert!(FieldInput::try_from(json!(true)).is_err());
        assert!(FieldInput::try_from(json!(["a", 1])).is_err());
    }

    #[test]
    fn test_null_entries_dropped_before_list_type() {
        assert_eq!(FieldInput::try_from(json!([])).unwrap(), FieldInput::EmptyList);
        assert_eq!(FieldInput::try_from(json!([null])).unwrap(), FieldInput::EmptyList);
        assert_eq!(
            FieldInput::try_from(json!([1, null])).unwrap(),
            FieldInput::IntList(vec![1])
        );

        for declared in ["dropdown-multi", "number-multi", "person-multi", "location-multi"] {
            for raw in [json!([]), json!([null])] {
                let input = FieldInput::try_from(raw).unwrap();
                assert!(normalize("Tags", &input, declared, true).unwrap().is_empty());
            }
        }
        let input = FieldInput::try_from(json!([1, null])).unwrap();
        assert_eq!(
            normalize("Owners", &input, "person-multi", true).unwrap(),
            vec![json!(1)]
        );
        let err = normalize("Owner", &FieldInput::EmptyList, "person", false).unwrap_err();
        assert!(matches!(err, SyncError::Multiplicity(_)));
    }

    #[test]
    fn test_parse_rejects_inconsistent_scopes() {
        let err = Intent::parse(
            r#"{ "entity": { "kind": "person", "firstName": "Ada", "lastName": "Lovelace" },
                 "listFields": { "Stage": "Won" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));

        let err = Intent::parse(
            r#"{ "entity": { "kind": "opportunity", "name": "Seed", "listId": 12 },
                 "listEntry": { "listId": 12 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));

        let ok = Intent::parse(
            r#"{ "entity": { "kind": "company", "name": "Acme", "takeBestMatch": true } }"#,
        )
        .unwrap();
        assert!(ok.overwrite);
    }

    #[tokio::test]
    async fn test_apply_company_with_list_entry() {
        let fake = FakeTransport::new();
        script_catalog(
            &fake,
            vec![
                legacy_field_json(10, "Industry", None, false),
                legacy_field_json(30, "Stage", Some(12), false),
            ],
            vec![],
            vec![field_metadata_json("field-10", "Industry", "global", "text")],
            vec![(12, vec![field_metadata_json("field-30", "Stage", "list", "dropdown")])],
        );
        fake.respond(
            Method::GET,
            "organizations",
            json!({ "organizations": [company_json(7, "Acme", &["acme.com"])] }),
        );
        fake.respond(Method::GET, "lists/12/list-entries", json!([]));
        fake.respond(
            Method::POST,
            "lists/12/list-entries",
            list_entry_json(70, 12, 7),
        );
        fake.respond_query(
            Method::GET,
            "field-values",
            &[("organization_id", "7")],
            json!([field_value_json(1, 10, 7, None, json!("Robotics"))]),
        );
        fake.respond_query(Method::GET, "field-values", &[("list_entry_id", "70")], json!([]));
        fake.respond(
            Method::POST,
            "field-values",
            field_value_json(2, 30, 7, Some(70), json!("Won")),
        );
        let writer = Writer::new(fake.clone(), Arc::new(test_db()));

        let intent = Intent::parse(
            r#"{
                "entity": { "kind": "company", "name": "Acme", "domain": "acme.com" },
                "listEntry": { "listId": 12 },
                "fields": { "Industry": "Robotics" },
                "listFields": { "Stage": "Won" }
            }"#,
        )
        .unwrap();
        let outcome = apply(&writer, &intent).await.unwrap();

        assert_eq!(
            outcome,
            IntentOutcome {
                entity_kind: "company".into(),
                entity_id: 7,
                list_entry_id: Some(70),
                values_added: 1,
                values_removed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_apply_opportunity_writes_to_its_list_entry() {
        let fake = FakeTransport::new();
        script_catalog(
            &fake,
            vec![legacy_field_json(30, "Stage", Some(12), false)],
            vec![],
            vec![],
            vec![(12, vec![field_metadata_json("field-30", "Stage", "list", "dropdown")])],
        );
        fake.respond(
            Method::GET,
            "opportunities",
            json!({ "opportunities": [opportunity_json(3, "Seed", 12)] }),
        );
        fake.respond_query(Method::GET, "field-values", &[("list_entry_id", "30")], json!([]));
        fake.respond(
            Method::POST,
            "field-values",
            field_value_json(2, 30, 3, Some(30), json!("Won")),
        );
        let writer = Writer::new(fake.clone(), Arc::new(test_db()));

        let intent = Intent::parse(
            r#"{ "entity": { "kind": "opportunity", "name": "seed", "listId": 12 },
                 "fields": { "Stage": "Won" } }"#,
        )
        .unwrap();
        let outcome = apply(&writer, &intent).await.unwrap();

        assert_eq!(outcome.list_entry_id, Some(30));
        let body = fake.mutations()[0].body.clone().unwrap();
        assert_eq!(body["list_entry_id"], json!(30));
        assert_eq!(body["entity_id"], json!(3));
    }
}
