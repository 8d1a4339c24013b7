//! Wire models for both API generations.
//!
//! Legacy (v1) payloads are snake_case; versioned (v2) payloads are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Entity kinds the reconciler operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Company,
    Opportunity,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Company => "company",
            EntityKind::Opportunity => "opportunity",
        }
    }

    /// Query parameter that scopes `field-values` to an entity of this kind.
    pub fn field_value_param(&self) -> &'static str {
        match self {
            EntityKind::Person => "person_id",
            EntityKind::Company => "organization_id",
            EntityKind::Opportunity => "opportunity_id",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Entities (v1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub person_type: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub primary_email: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub organization_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPerson {
    pub first_name: String,
    pub last_name: String,
    pub emails: Vec<String>,
    pub organization_ids: Vec<i64>,
}

impl NewPerson {
    /// Build a create/update payload. Names must be non-empty; emails are
    /// trimmed and blank ones dropped.
    pub fn new(
        first_name: &str,
        last_name: &str,
        emails: &[String],
        organization_ids: Vec<i64>,
    ) -> Result<Self, SyncError> {
        if first_name.trim().is_empty() || last_name.trim().is_empty() {
            return Err(SyncError::InvalidArgument(
                "Person first and last name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            emails: clean_emails(emails),
            organization_ids,
        })
    }
}

pub(crate) fn clean_emails(emails: &[String]) -> Vec<String> {
    emails
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonQueryResponse {
    #[serde(default)]
    pub persons: Vec<Person>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(rename = "global", default)]
    pub is_global: bool,
    #[serde(default)]
    pub crunchbase_uuid: Option<String>,
    #[serde(default)]
    pub person_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub domain: Option<String>,
    pub person_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyQueryResponse {
    #[serde(default)]
    pub organizations: Vec<Company>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityListEntry {
    pub id: i64,
    #[serde(default)]
    pub creator_id: Option<i64>,
    pub list_id: i64,
    pub entity_id: i64,
    #[serde(default)]
    pub entity_type: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub person_ids: Vec<i64>,
    #[serde(default)]
    pub organization_ids: Vec<i64>,
    #[serde(default)]
    pub list_entries: Vec<OpportunityListEntry>,
}

impl Opportunity {
    /// An opportunity lives on exactly one list; the first entry carries it.
    pub fn list_id(&self) -> Option<i64> {
        self.list_entries.first().map(|e| e.list_id)
    }

    pub fn list_entry_id(&self) -> Option<i64> {
        self.list_entries.first().map(|e| e.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOpportunity {
    pub name: String,
    pub list_id: i64,
    pub person_ids: Vec<i64>,
    pub organization_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpportunityQueryResponse {
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Lists (v1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: i64,
    pub list_id: i64,
    #[serde(default)]
    pub creator_id: Option<i64>,
    pub entity_id: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entity_type: Option<i64>,
    /// Embedded person, company or opportunity snapshot.
    #[serde(default)]
    pub entity: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Fields and values (v1, "legacy")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub id: i64,
    pub text: String,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub color: Option<i64>,
}

/// Legacy field definition: flat integer id used by the field-value endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyField {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub list_id: Option<i64>,
    #[serde(default)]
    pub enrichment_source: Option<String>,
    #[serde(default)]
    pub value_type: i64,
    #[serde(default)]
    pub allows_multiple: bool,
    #[serde(default)]
    pub track_changes: bool,
    #[serde(default)]
    pub dropdown_options: Vec<DropdownOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub id: i64,
    pub field_id: i64,
    #[serde(default)]
    pub list_entry_id: Option<i64>,
    pub entity_id: i64,
    pub value: serde_json::Value,
    #[serde(default)]
    pub value_type: Option<i64>,
    #[serde(default)]
    pub entity_type: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Structured address value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(alias = "street_address", default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

// ---------------------------------------------------------------------------
// Field metadata (v2, "versioned")
// ---------------------------------------------------------------------------

/// Versioned field definition. `id` is composite (e.g. `field-1234`) and may
/// embed the legacy id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub id: String,
    pub name: String,
    /// `global`, `list`, `enriched` or `relationship-intelligence`.
    #[serde(rename = "type")]
    pub field_type: String,
    pub value_type: String,
    #[serde(default)]
    pub enrichment_source: Option<String>,
}

impl FieldMetadata {
    /// Only global and list fields hold caller-writable values.
    pub fn is_writable(&self) -> bool {
        matches!(self.field_type.as_str(), "global" | "list")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMetadataPage {
    #[serde(default)]
    pub data: Vec<FieldMetadata>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub next_url: Option<String>,
}
