//! Per-call rate-limit disclosure.
//!
//! Every successful response carries the remaining call budget for the API key
//! (user scope) and for the whole organization. Reset headers are seconds until
//! the window rolls over; they are converted to absolute instants here.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const USER_LIMIT: &str = "X-Ratelimit-Limit-User";
pub const USER_REMAINING: &str = "X-Ratelimit-Limit-User-Remaining";
pub const USER_RESET: &str = "X-Ratelimit-Limit-User-Reset";
pub const ORG_LIMIT: &str = "X-Ratelimit-Limit-Org";
pub const ORG_REMAINING: &str = "X-Ratelimit-Limit-Org-Remaining";
pub const ORG_RESET: &str = "X-Ratelimit-Limit-Org-Reset";

const REQUIRED_HEADERS: [&str; 6] = [
    USER_LIMIT,
    USER_REMAINING,
    USER_RESET,
    ORG_LIMIT,
    ORG_REMAINING,
    ORG_RESET,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEntitlement {
    pub user_limit: i64,
    pub user_remaining: i64,
    pub user_reset_at: DateTime<Utc>,
    pub org_limit: i64,
    pub org_remaining: i64,
    pub org_reset_at: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

/// Extract the entitlement from response headers, observed now.
pub fn extract_entitlement(headers: &HeaderMap) -> Result<CallEntitlement, SyncError> {
    extract_entitlement_at(headers, Utc::now())
}

pub fn extract_entitlement_at(
    headers: &HeaderMap,
    observed_at: DateTime<Utc>,
) -> Result<CallEntitlement, SyncError> {
    let missing: Vec<String> = REQUIRED_HEADERS
        .iter()
        .filter(|name| !headers.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SyncError::MissingRateLimitHeaders(missing));
    }

    let reset_at = |name: &str| -> Result<DateTime<Utc>, SyncError> {
        Ok(observed_at + Duration::seconds(header_int(headers, name)?))
    };

    Ok(CallEntitlement {
        user_limit: header_int(headers, USER_LIMIT)?,
        user_remaining: header_int(headers, USER_REMAINING)?,
        user_reset_at: reset_at(USER_RESET)?,
        org_limit: header_int(headers, ORG_LIMIT)?,
        org_remaining: header_int(headers, ORG_REMAINING)?,
        org_reset_at: reset_at(ORG_RESET)?,
        observed_at,
    })
}

fn header_int(headers: &HeaderMap, name: &str) -> Result<i64, SyncError> {
    let raw = headers
        .get(name)
        .ok_or_else(|| SyncError::MissingRateLimitHeaders(vec![name.to_string()]))?;
    let text = raw.to_str().unwrap_or_default().trim();
    text.parse::<i64>()
        .map_err(|_| SyncError::InvalidRateLimitHeader {
            header: name.to_string(),
            value: text.to_string(),
        })
}

/// Holds the most recent entitlement seen by a transport.
#[derive(Debug, Default)]
pub struct EntitlementTracker {
    last: Mutex<Option<CallEntitlement>>,
}

impl EntitlementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract from `headers` and replace the last known value on success.
    /// A failed extraction leaves the previous value in place.
    pub fn record(&self, headers: &HeaderMap) -> Result<CallEntitlement, SyncError> {
        let entitlement = extract_entitlement(headers)?;
        if entitlement.user_remaining <= 0 || entitlement.org_remaining <= 0 {
            log::warn!(
                "Call budget exhausted (user remaining {}, org remaining {})",
                entitlement.user_remaining,
                entitlement.org_remaining
            );
        }
        *self.last.lock() = Some(entitlement.clone());
        Ok(entitlement)
    }

    pub fn last(&self) -> Option<CallEntitlement> {
        self.last.lock().clone()
    }
}

#[cfg(test)]
pub(crate) fn sample_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_LIMIT, "900".parse().unwrap());
    headers.insert(USER_REMAINING, "899".parse().unwrap());
    headers.insert(USER_RESET, "60".parse().unwrap());
    headers.insert(ORG_LIMIT, "40000".parse().unwrap());
    headers.insert(ORG_REMAINING, "39000".parse().unwrap());
    headers.insert(ORG_RESET, "86400".parse().unwrap());
    headers
}
