//! Legacy (v1) endpoints: entity CRUD and search, field values, list entries.
//!
//! Search endpoints return the service's ranked matches for a free-text term;
//! exact-match filtering and ambiguity rules live in `reconcile`, not here.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};

use super::types::{
    Company, CompanyQueryResponse, DeleteResponse, EntityKind, FieldValue, LegacyField,
    ListEntry, NewCompany, NewOpportunity, NewPerson, Opportunity, OpportunityQueryResponse,
    Person, PersonQueryResponse,
};
use super::{send_as, ApiRequest, Transport};
use crate::error::SyncError;

#[derive(Clone)]
pub struct LegacyApi {
    transport: Arc<dyn Transport>,
}

impl LegacyApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // -----------------------------------------------------------------------
    // People
    // -----------------------------------------------------------------------

    pub async fn get_person(&self, person_id: i64) -> Result<Person, SyncError> {
        log::debug!("Fetching person - {}", person_id);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::GET, format!("persons/{}", person_id)),
        )
        .await
    }

    pub async fn search_persons(&self, term: &str) -> Result<Vec<Person>, SyncError> {
        log::debug!("Searching persons - {}", term);
        let response: PersonQueryResponse = send_as(
            self.transport(),
            ApiRequest::legacy(Method::GET, "persons").query("term", term),
        )
        .await?;
        Ok(response.persons)
    }

    /// Create a person. The service answers 422 when a person with one of the
    /// emails already exists.
    pub async fn create_person(&self, new_person: &NewPerson) -> Result<Person, SyncError> {
        log::info!(
            "Creating person - {} {}",
            new_person.first_name,
            new_person.last_name
        );
        let request =
            ApiRequest::legacy(Method::POST, "persons").json(serde_json::to_value(new_person)?);
        match send_as(self.transport(), request).await {
            Err(SyncError::HttpStatus { status: 422, .. }) => Err(SyncError::AlreadyExists(
                format!(
                    "Person already exists - {} {}",
                    new_person.first_name, new_person.last_name
                ),
            )),
            other => other,
        }
    }

    pub async fn update_person(
        &self,
        person_id: i64,
        new_person: &NewPerson,
    ) -> Result<Person, SyncError> {
        log::info!("Updating person - {}", person_id);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::PUT, format!("persons/{}", person_id))
                .json(serde_json::to_value(new_person)?),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Companies
    // -----------------------------------------------------------------------

    pub async fn get_company(&self, company_id: i64) -> Result<Company, SyncError> {
        log::debug!("Fetching company - {}", company_id);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::GET, format!("organizations/{}", company_id)),
        )
        .await
    }

    pub async fn search_companies(&self, term: &str) -> Result<Vec<Company>, SyncError> {
        log::debug!("Searching companies - {}", term);
        let response: CompanyQueryResponse = send_as(
            self.transport(),
            ApiRequest::legacy(Method::GET, "organizations").query("term", term),
        )
        .await?;
        Ok(response.organizations)
    }

    pub async fn create_company(&self, new_company: &NewCompany) -> Result<Company, SyncError> {
        log::info!("Creating company - {}", new_company.name);
        let request = ApiRequest::legacy(Method::POST, "organizations")
            .json(serde_json::to_value(new_company)?);
        match send_as(self.transport(), request).await {
            Err(SyncError::HttpStatus { status: 422, .. }) => Err(SyncError::AlreadyExists(
                format!("Company already exists - {}", new_company.name),
            )),
            other => other,
        }
    }

    pub async fn update_company(
        &self,
        company_id: i64,
        new_company: &NewCompany,
    ) -> Result<Company, SyncError> {
        log::info!("Updating company - {}", company_id);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::PUT, format!("organizations/{}", company_id))
                .json(serde_json::to_value(new_company)?),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Opportunities
    // -----------------------------------------------------------------------

    pub async fn search_opportunities(&self, term: &str) -> Result<Vec<Opportunity>, SyncError> {
        log::debug!("Searching opportunities - {}", term);
        let response: OpportunityQueryResponse = send_as(
            self.transport(),
            ApiRequest::legacy(Method::GET, "opportunities").query("term", term),
        )
        .await?;
        Ok(response.opportunities)
    }

    pub async fn create_opportunity(
        &self,
        new_opportunity: &NewOpportunity,
    ) -> Result<Opportunity, SyncError> {
        log::info!("Creating opportunity - {}", new_opportunity.name);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::POST, "opportunities")
                .json(serde_json::to_value(new_opportunity)?),
        )
        .await
    }

    pub async fn update_opportunity(
        &self,
        opportunity_id: i64,
        new_opportunity: &NewOpportunity,
    ) -> Result<Opportunity, SyncError> {
        log::info!("Updating opportunity - {}", opportunity_id);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::PUT, format!("opportunities/{}", opportunity_id))
                .json(serde_json::to_value(new_opportunity)?),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Fields and field values
    // -----------------------------------------------------------------------

    pub async fn fetch_fields(&self) -> Result<Vec<LegacyField>, SyncError> {
        log::debug!("Fetching legacy fields");
        send_as(self.transport(), ApiRequest::legacy(Method::GET, "fields")).await
    }

    /// Values stored on an entity, or on one of its list entries when
    /// `list_entry_id` is given.
    pub async fn fetch_field_values(
        &self,
        entity_id: i64,
        kind: EntityKind,
        list_entry_id: Option<i64>,
    ) -> Result<Vec<FieldValue>, SyncError> {
        log::info!(
            "Fetching field values - entity_id={}, entity_type={}, list_entry_id={:?}",
            entity_id,
            kind,
            list_entry_id
        );
        let request = ApiRequest::legacy(Method::GET, "field-values");
        let request = match list_entry_id {
            Some(entry_id) => request.query("list_entry_id", entry_id),
            None => request.query(kind.field_value_param(), entity_id),
        };
        send_as(self.transport(), request).await
    }

    pub async fn create_field_value(
        &self,
        field_id: i64,
        entity_id: i64,
        value: &Value,
        list_entry_id: Option<i64>,
    ) -> Result<FieldValue, SyncError> {
        log::info!("Creating field value - {} - {} - {}", field_id, entity_id, value);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::POST, "field-values").json(json!({
                "field_id": field_id,
                "entity_id": entity_id,
                "value": value,
                "list_entry_id": list_entry_id,
            })),
        )
        .await
    }

    pub async fn delete_field_value(&self, field_value_id: i64) -> Result<(), SyncError> {
        log::info!("Deleting field value - {}", field_value_id);
        let response: DeleteResponse = send_as(
            self.transport(),
            ApiRequest::legacy(Method::DELETE, format!("field-values/{}", field_value_id)),
        )
        .await?;
        if !response.success {
            log::warn!("Field value {} delete reported failure", field_value_id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // List entries
    // -----------------------------------------------------------------------

    pub async fn fetch_all_list_entries(&self, list_id: i64) -> Result<Vec<ListEntry>, SyncError> {
        log::debug!("Fetching list entries - {}", list_id);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::GET, format!("lists/{}/list-entries", list_id)),
        )
        .await
    }

    pub async fn create_list_entry(
        &self,
        list_id: i64,
        entity_id: i64,
    ) -> Result<ListEntry, SyncError> {
        log::info!("Creating list entry - {} - {}", list_id, entity_id);
        send_as(
            self.transport(),
            ApiRequest::legacy(Method::POST, format!("lists/{}/list-entries", list_id))
                .json(json!({ "entity_id": entity_id })),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;

    #[tokio::test]
    async fn test_create_person_422_is_already_exists() {
        let fake = FakeTransport::new();
        fake.fail(Method::POST, "persons", 422);
        let api = LegacyApi::new(fake.clone());

        let person = NewPerson::new("Ada", "Lovelace", &["ada@example.com".into()], vec![]).unwrap();
        let err = api.create_person(&person).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_create_person_other_status_passes_through() {
        let fake = FakeTransport::new();
        fake.fail(Method::POST, "persons", 500);
        let api = LegacyApi::new(fake.clone());

        let person = NewPerson::new("Ada", "Lovelace", &[], vec![]).unwrap();
        let err = api.create_person(&person).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_field_values_scope_parameter() {
        let fake = FakeTransport::new();
        fake.respond(Method::GET, "field-values", json!([]));
        let api = LegacyApi::new(fake.clone());

        api.fetch_field_values(7, EntityKind::Company, None)
            .await
            .unwrap();
        api.fetch_field_values(7, EntityKind::Opportunity, Some(90))
            .await
            .unwrap();

        let calls = fake.calls();
        assert_eq!(
            calls[0].query,
            vec![("organization_id".to_string(), "7".to_string())]
        );
        assert_eq!(
            calls[1].query,
            vec![("list_entry_id".to_string(), "90".to_string())]
        );
    }

    #[tokio::test]
    async fn test_create_field_value_body() {
        let fake = FakeTransport::new();
        fake.respond(
            Method::POST,
            "field-values",
            json!({
                "id": 1, "field_id": 44, "entity_id": 7, "list_entry_id": null,
                "value": "Seed", "created_at": "2024-01-01T00:00:00Z"
            }),
        );
        let api = LegacyApi::new(fake.clone());

        let created = api
            .create_field_value(44, 7, &json!("Seed"), None)
            .await
            .unwrap();
        assert_eq!(created.field_id, 44);

        let body = fake.calls()[0].body.clone().unwrap();
        assert_eq!(
            body,
            json!({ "field_id": 44, "entity_id": 7, "value": "Seed", "list_entry_id": null })
        );
    }
}
