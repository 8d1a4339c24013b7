//! Error types for the reconciliation engine
//!
//! Errors are classified by recoverability:
//! - Retryable: transient network failures (already retried by the transport)
//! - Caller errors: unknown fields, invalid values, inconsistent arguments
//! - Remote outcomes: HTTP status errors, ambiguous searches, duplicates

use thiserror::Error;

use crate::db::DbError;

/// Error types for remote reconciliation
#[derive(Debug, Error)]
pub enum SyncError {
    // Retryable errors
    #[error("Network error: {0}")]
    TransientNetwork(String),

    // Remote outcomes
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limit headers not found in response: {}", .0.join(", "))]
    MissingRateLimitHeaders(Vec<String>),

    #[error("Rate limit header {header} is not an integer: {value}")]
    InvalidRateLimitHeader { header: String, value: String },

    #[error("Failed to decode response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Multiple results found for {0}")]
    MultipleResults(String),

    #[error("Multiple list entries found for entity {entity_id} on list {list_id}")]
    AmbiguousListEntry { entity_id: i64, list_id: i64 },

    // Caller errors
    #[error("Field not found - {0}")]
    FieldNotFound(String),

    #[error("Field value type mismatch - {field} expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Field does not allow multiple values - {0}")]
    Multiplicity(String),

    #[error("Invalid field value type - {0}")]
    UnknownFieldType(String),

    #[error("Cannot determine correct entity: {0}")]
    CannotDetermineCorrectEntity(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Local collaborators
    #[error("Mirror store error: {0}")]
    Store(#[from] DbError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Returns true if the remote service reported the target as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::HttpStatus { status: 404, .. })
    }

    /// HTTP status of a remote rejection, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
