//! HTTP transport for the Affinity API.
//!
//! Uses reqwest. Legacy (v1) endpoints authenticate with HTTP basic auth
//! (empty user, API key as password); versioned (v2) endpoints take a Bearer
//! token. Connection failures and timeouts are retried with exponential
//! backoff; HTTP status errors are returned as-is.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::entitlement::{CallEntitlement, EntitlementTracker};
use super::{ApiRequest, ApiVersion, Transport};
use crate::config::SyncConfig;
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying connection failures and timeouts.
///
/// Any HTTP response (including 4xx/5xx) is returned to the caller untouched.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, SyncError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(SyncError::Http);
        };

        match cloned.send().await {
            Ok(response) => return Ok(response),
            Err(err) => {
                let transient = err.is_timeout() || err.is_connect();
                if !transient {
                    return Err(SyncError::Http(err));
                }
                if attempt == attempts {
                    return Err(SyncError::TransientNetwork(err.to_string()));
                }
                let delay = retry_delay(attempt, policy);
                log::warn!(
                    "affinity retry {}/{} after transport error: {} (sleep {:?})",
                    attempt,
                    attempts,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(SyncError::TransientNetwork(
        "request exhausted retries".to_string(),
    ))
}

pub struct AffinityClient {
    http: reqwest::Client,
    api_key: String,
    v1_base: Url,
    v2_base: Url,
    retry: RetryPolicy,
    entitlements: EntitlementTracker,
}

impl AffinityClient {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let api_key = config.require_api_key()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key,
            v1_base: parse_base(&config.v1_base_url)?,
            v2_base: parse_base(&config.v2_base_url)?,
            retry: config.retry_policy(),
            entitlements: EntitlementTracker::new(),
        })
    }

    fn url_for(&self, api: ApiVersion, path: &str) -> Result<Url, SyncError> {
        let base = match api {
            ApiVersion::Legacy => &self.v1_base,
            ApiVersion::Versioned => &self.v2_base,
        };
        base.join(path.trim_start_matches('/'))
            .map_err(|e| SyncError::InvalidArgument(format!("Bad request path {}: {}", path, e)))
    }
}

/// Base URLs must end in `/` so relative joins keep their path prefix.
fn parse_base(raw: &str) -> Result<Url, SyncError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized)
        .map_err(|e| SyncError::Config(format!("Invalid base URL {}: {}", raw, e)))
}

#[async_trait]
impl Transport for AffinityClient {
    async fn send(&self, request: ApiRequest) -> Result<Value, SyncError> {
        let url = self.url_for(request.api, &request.path)?;
        log::debug!("Sending {} request to {}", request.method, url);

        let mut builder = self.http.request(request.method.clone(), url);
        builder = match request.api {
            ApiVersion::Legacy => builder.basic_auth("", Some(&self.api_key)),
            ApiVersion::Versioned => builder.bearer_auth(&self.api_key),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = send_with_retry(builder, &self.retry).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        self.entitlements.record(response.headers())?;

        let bytes = response.bytes().await?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn last_entitlement(&self) -> Option<CallEntitlement> {
        self.entitlements.last()
    }
}
