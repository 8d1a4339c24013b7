//! Affinity CRM remote API.
//!
//! Two generations of the same API are in use:
//! - legacy (v1): entity CRUD, search, field values, list entries
//! - versioned (v2): field metadata
//!
//! Everything goes through the [`Transport`] seam so the reconcilers can be
//! driven by the reqwest client in production and a scripted fake in tests.

pub mod client;
pub mod entitlement;
pub mod types;
pub mod v1;
pub mod v2;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SyncError;
use entitlement::CallEntitlement;

/// Which API generation a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    Legacy,
    Versioned,
}

/// A single remote call, independent of the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub api: ApiVersion,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn legacy(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            api: ApiVersion::Legacy,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn versioned(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            api: ApiVersion::Versioned,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Remote call boundary.
///
/// Implementations retry transient network failures themselves and surface
/// non-2xx responses as [`SyncError::HttpStatus`]. Every successful call
/// refreshes `last_entitlement`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<Value, SyncError>;

    fn last_entitlement(&self) -> Option<CallEntitlement>;
}

/// Send and decode into a typed model.
pub async fn send_as<T: DeserializeOwned>(
    transport: &dyn Transport,
    request: ApiRequest,
) -> Result<T, SyncError> {
    let value = transport.send(request).await?;
    Ok(serde_json::from_value(value)?)
}
