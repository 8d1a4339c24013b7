//! Shared test utilities: a scripted transport and a throwaway mirror DB.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};

use crate::affinity::entitlement::CallEntitlement;
use crate::affinity::{ApiRequest, Transport};
use crate::db::MirrorDb;
use crate::error::SyncError;

enum Outcome {
    Ok(Value),
    Status(u16),
}

struct Route {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    outcomes: Vec<Outcome>,
    served: usize,
}

impl Route {
    fn matches(&self, request: &ApiRequest) -> bool {
        self.method == request.method
            && self.path == request.path
            && self.query.iter().all(|q| request.query.contains(q))
    }
}

/// In-memory [`Transport`] answering from scripted routes.
///
/// Outcomes registered on the same route are served in order; the last one
/// repeats. When several routes match, the one with the most query filters
/// wins. Unmatched requests answer 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<ApiRequest>>,
    last: Mutex<Option<CallEntitlement>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: Method, path: &str, query: &[(&str, &str)], outcome: Outcome) {
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut routes = self.routes.lock();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path && r.query == query)
        {
            route.outcomes.push(outcome);
            return;
        }
        routes.push(Route {
            method,
            path: path.to_string(),
            query,
            outcomes: vec![outcome],
            served: 0,
        });
    }

    pub fn respond(&self, method: Method, path: &str, body: Value) {
        self.push(method, path, &[], Outcome::Ok(body));
    }

    pub fn respond_query(&self, method: Method, path: &str, query: &[(&str, &str)], body: Value) {
        self.push(method, path, query, Outcome::Ok(body));
    }

    pub fn fail(&self, method: Method, path: &str, status: u16) {
        self.push(method, path, &[], Outcome::Status(status));
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().clone()
    }

    /// Calls whose method is not GET.
    pub fn mutations(&self) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != Method::GET)
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, SyncError> {
        self.calls.lock().push(request.clone());

        let outcome = {
            let mut routes = self.routes.lock();
            let route = routes
                .iter_mut()
                .filter(|r| r.matches(&request))
                .max_by_key(|r| r.query.len());
            match route {
                Some(route) => {
                    let index = route.served.min(route.outcomes.len() - 1);
                    route.served += 1;
                    match &route.outcomes[index] {
                        Outcome::Ok(v) => Ok(v.clone()),
                        Outcome::Status(s) => Err(*s),
                    }
                }
                None => Err(404),
            }
        };

        match outcome {
            Ok(value) => {
                let served = self.calls.lock().len() as i64;
                *self.last.lock() = Some(sample_entitlement(900 - served));
                Ok(value)
            }
            Err(status) => Err(SyncError::HttpStatus {
                status,
                body: json!({ "error": "scripted" }).to_string(),
            }),
        }
    }

    fn last_entitlement(&self) -> Option<CallEntitlement> {
        self.last.lock().clone()
    }
}

pub fn sample_entitlement(user_remaining: i64) -> CallEntitlement {
    let observed_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    CallEntitlement {
        user_limit: 900,
        user_remaining,
        user_reset_at: observed_at + Duration::seconds(60),
        org_limit: 40_000,
        org_remaining: 30_000,
        org_reset_at: observed_at + Duration::days(1),
        observed_at,
    }
}

/// Create a temporary mirror database. The directory is leaked so it lives
/// for the whole test.
pub fn test_db() -> MirrorDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("mirror.db");
    std::mem::forget(dir);
    MirrorDb::open_at(path).expect("Failed to open test database")
}

// ---------------------------------------------------------------------------
// JSON fixtures
// ---------------------------------------------------------------------------

pub fn person_json(id: i64, first: &str, last: &str, emails: &[&str]) -> Value {
    json!({
        "id": id,
        "type": 0,
        "first_name": first,
        "last_name": last,
        "primary_email": emails.first(),
        "emails": emails,
        "organization_ids": []
    })
}

pub fn company_json(id: i64, name: &str, domains: &[&str]) -> Value {
    json!({
        "id": id,
        "name": name,
        "domain": domains.first(),
        "domains": domains,
        "global": false,
        "crunchbase_uuid": null,
        "person_ids": []
    })
}

pub fn opportunity_json(id: i64, name: &str, list_id: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "person_ids": [],
        "organization_ids": [],
        "list_entries": [{
            "id": id * 10,
            "creator_id": 1,
            "list_id": list_id,
            "entity_id": id,
            "entity_type": 8,
            "created_at": "2024-05-01T10:00:00Z"
        }]
    })
}

pub fn list_entry_json(id: i64, list_id: i64, entity_id: i64) -> Value {
    json!({
        "id": id,
        "list_id": list_id,
        "creator_id": 1,
        "entity_id": entity_id,
        "created_at": "2024-05-01T10:00:00Z",
        "entity_type": 1,
        "entity": null
    })
}

pub fn field_value_json(
    id: i64,
    field_id: i64,
    entity_id: i64,
    list_entry_id: Option<i64>,
    value: Value,
) -> Value {
    json!({
        "id": id,
        "field_id": field_id,
        "entity_id": entity_id,
        "list_entry_id": list_entry_id,
        "value": value,
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": null
    })
}

pub fn legacy_field_json(id: i64, name: &str, list_id: Option<i64>, allows_multiple: bool) -> Value {
    json!({
        "id": id,
        "name": name,
        "list_id": list_id,
        "enrichment_source": "none",
        "value_type": 2,
        "allows_multiple": allows_multiple,
        "track_changes": false,
        "dropdown_options": []
    })
}

pub fn field_metadata_json(id: &str, name: &str, field_type: &str, value_type: &str) -> Value {
    json!({ "id": id, "name": name, "type": field_type, "valueType": value_type })
}

/// Script the catalog endpoints: legacy fields plus person/company/list metadata.
pub fn script_catalog(
    fake: &FakeTransport,
    legacy: Vec<Value>,
    person_fields: Vec<Value>,
    company_fields: Vec<Value>,
    lists: Vec<(i64, Vec<Value>)>,
) {
    fake.respond(Method::GET, "fields", Value::Array(legacy));
    fake.respond(Method::GET, "persons/fields", json!({ "data": person_fields }));
    fake.respond(Method::GET, "companies/fields", json!({ "data": company_fields }));
    for (list_id, fields) in lists {
        fake.respond(
            Method::GET,
            &format!("lists/{}/fields", list_id),
            json!({ "data": fields }),
        );
    }
}
