use std::sync::Arc;

use affinity_sync::affinity::entitlement::CallEntitlement;
use affinity_sync::affinity::{ApiRequest, Transport};
use affinity_sync::db::MirrorDb;
use affinity_sync::SyncError;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};

struct Route {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    response: Result<Value, u16>,
}

/// Answers scripted responses; the route with the most matching query
/// parameters wins and unmatched requests answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<ApiRequest>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: Method, path: &str, query: &[(&str, &str)], response: Value) {
        self.push(method, path, query, Ok(response));
    }

    pub fn fail(&self, method: Method, path: &str, status: u16) {
        self.push(method, path, &[], Err(status));
    }

    fn push(&self, method: Method, path: &str, query: &[(&str, &str)], response: Result<Value, u16>) {
        self.routes.lock().push(Route {
            method,
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            response,
        });
    }

    pub fn mutations(&self) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method != Method::GET)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, SyncError> {
        self.calls.lock().push(request.clone());
        let routes = self.routes.lock();
        let route = routes
            .iter()
            .filter(|r| {
                r.method == request.method
                    && r.path == request.path
                    && r.query.iter().all(|q| request.query.contains(q))
            })
            .max_by_key(|r| r.query.len());
        match route.map(|r| r.response.clone()) {
            Some(Ok(value)) => Ok(value),
            Some(Err(status)) => Err(SyncError::HttpStatus {
                status,
                body: String::new(),
            }),
            None => Err(SyncError::HttpStatus {
                status: 404,
                body: String::new(),
            }),
        }
    }

    fn last_entitlement(&self) -> Option<CallEntitlement> {
        let observed_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let calls = self.calls.lock().len() as i64;
        Some(CallEntitlement {
            user_limit: 900,
            user_remaining: 900 - calls,
            user_reset_at: observed_at + Duration::seconds(60),
            org_limit: 40_000,
            org_remaining: 40_000 - calls,
            org_reset_at: observed_at + Duration::days(1),
            observed_at,
        })
    }
}

pub fn temp_mirror() -> Arc<MirrorDb> {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("mirror.db");
    std::mem::forget(dir);
    Arc::new(MirrorDb::open_at(path).expect("Failed to open mirror database"))
}

#[allow(dead_code)]
pub fn metadata(id: &str, name: &str, field_type: &str, value_type: &str) -> Value {
    json!({ "id": id, "name": name, "type": field_type, "valueType": value_type })
}

#[allow(dead_code)]
pub fn legacy(id: i64, name: &str, list_id: Option<i64>, allows_multiple: bool) -> Value {
    json!({
        "id": id, "name": name, "list_id": list_id, "value_type": 2,
        "allows_multiple": allows_multiple, "track_changes": false, "dropdown_options": []
    })
}

#[allow(dead_code)]
pub fn field_value(id: i64, field_id: i64, entity_id: i64, list_entry_id: Option<i64>, value: Value) -> Value {
    json!({
        "id": id, "field_id": field_id, "entity_id": entity_id, "list_entry_id": list_entry_id,
        "value": value, "created_at": "2024-05-01T10:00:00Z", "updated_at": null
    })
}
