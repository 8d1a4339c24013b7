//! Find-or-create for people, companies and opportunities.
//!
//! Each lookup stops at the first strategy that yields a match:
//! 1. cached id from the mirror store (people and companies only)
//! 2. exact-match search against the remote service
//! 3. creation
//!
//! Ambiguous searches fail with [`SyncError::MultipleResults`] instead of
//! picking a record, except for companies when `take_best_match` is set.

use std::future::Future;
use std::sync::Arc;

use crate::affinity::types::{
    Company, EntityKind, NewCompany, NewOpportunity, NewPerson, Opportunity, Person,
};
use crate::affinity::v1::LegacyApi;
use crate::db::MirrorStore;
use crate::error::SyncError;

/// A mirrored field value that previously identified an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLookup {
    pub field_name: String,
    pub value: String,
}

impl CachedLookup {
    pub fn new(field_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            value: value.into(),
        }
    }
}

pub struct EntityResolver {
    v1: LegacyApi,
    store: Arc<dyn MirrorStore>,
}

impl EntityResolver {
    pub fn new(v1: LegacyApi, store: Arc<dyn MirrorStore>) -> Self {
        Self { v1, store }
    }

    /// Fetch the entity the mirror store points at, if it points at exactly
    /// one. An entity deleted upstream is treated as a cache miss.
    async fn cached<T, F, Fut>(
        &self,
        kind: EntityKind,
        cached: Option<&CachedLookup>,
        fetch: F,
    ) -> Result<Option<T>, SyncError>
    where
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let Some(lookup) = cached else {
            return Ok(None);
        };

        log::info!(
            "Finding {} by cached field - {} - {}",
            kind,
            lookup.field_name,
            lookup.value
        );
        let ids = self.store.lookup_ids_by_field(
            kind,
            &lookup.field_name,
            std::slice::from_ref(&lookup.value),
        )?;

        let [id] = ids.as_slice() else {
            log::debug!(
                "Cached field matched {} {} ids, searching instead",
                ids.len(),
                kind
            );
            return Ok(None);
        };

        match fetch(*id).await {
            Ok(entity) => {
                log::info!("{} found by cached field - {}", kind, id);
                Ok(Some(entity))
            }
            Err(e) if e.is_not_found() => {
                log::warn!("Cached {} {} no longer exists upstream", kind, id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // People
    // -----------------------------------------------------------------------

    pub async fn find_person_by_emails(
        &self,
        emails: &[String],
    ) -> Result<Option<Person>, SyncError> {
        for email in emails {
            let found = self
                .v1
                .search_persons(email)
                .await?
                .into_iter()
                .find(|p| {
                    p.emails.iter().any(|e| e.eq_ignore_ascii_case(email))
                        || p
                            .primary_email
                            .as_deref()
                            .is_some_and(|e| e.eq_ignore_ascii_case(email))
                });
            if let Some(person) = found {
                log::info!("Person found by email - {}", email);
                return Ok(Some(person));
            }
        }
        Ok(None)
    }

    pub async fn find_person_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<Person>, SyncError> {
        let term = format!("{} {}", first_name, last_name);
        let mut matches: Vec<Person> = self
            .v1
            .search_persons(&term)
            .await?
            .into_iter()
            .filter(|p| {
                p.first_name.to_uppercase() == first_name.to_uppercase()
                    && p.last_name.to_uppercase() == last_name.to_uppercase()
            })
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => {
                log::info!("Person found by name - {}", term);
                Ok(matches.pop())
            }
            n => {
                log::error!("Multiple results found for {} ({} people)", term, n);
                Err(SyncError::MultipleResults(term))
            }
        }
    }

    pub async fn find_or_create_person(
        &self,
        first_name: &str,
        last_name: &str,
        emails: &[String],
        organization_ids: Vec<i64>,
        cached: Option<&CachedLookup>,
    ) -> Result<Person, SyncError> {
        log::info!("Finding or creating person - {} {}", first_name, last_name);
        let new_person = NewPerson::new(first_name, last_name, emails, organization_ids)?;

        if let Some(person) = self
            .cached(EntityKind::Person, cached, |id| self.v1.get_person(id))
            .await?
        {
            return Ok(person);
        }

        if let Some(person) = self.find_person_by_emails(&new_person.emails).await? {
            return Ok(person);
        }

        if let Some(person) = self.find_person_by_name(first_name, last_name).await? {
            return Ok(person);
        }

        self.v1.create_person(&new_person).await
    }

    // -----------------------------------------------------------------------
    // Companies
    // -----------------------------------------------------------------------

    fn pick_company(
        mut matches: Vec<Company>,
        take_best_match: bool,
        what: &str,
    ) -> Result<Option<Company>, SyncError> {
        if matches.len() > 1 && !take_best_match {
            log::error!("Multiple results found for {} ({} companies)", what, matches.len());
            return Err(SyncError::MultipleResults(what.to_string()));
        }
        if matches.is_empty() {
            return Ok(None);
        }
        Ok(Some(matches.swap_remove(0)))
    }

    pub async fn find_company_by_domain(
        &self,
        domain: &str,
        take_best_match: bool,
    ) -> Result<Option<Company>, SyncError> {
        let matches = self
            .v1
            .search_companies(domain)
            .await?
            .into_iter()
            .filter(|c| c.domains.iter().any(|d| d.eq_ignore_ascii_case(domain)))
            .collect();
        Self::pick_company(matches, take_best_match, domain)
    }

    pub async fn find_company_by_name(
        &self,
        name: &str,
        take_best_match: bool,
    ) -> Result<Option<Company>, SyncError> {
        let matches = self
            .v1
            .search_companies(name)
            .await?
            .into_iter()
            .filter(|c| c.name.to_uppercase() == name.to_uppercase())
            .collect();
        Self::pick_company(matches, take_best_match, name)
    }

    pub async fn find_or_create_company(
        &self,
        name: &str,
        domain: Option<&str>,
        take_best_match: bool,
        cached: Option<&CachedLookup>,
    ) -> Result<Company, SyncError> {
        log::info!("Finding or creating company - {}", name);
        let domain = domain.map(str::trim).filter(|d| !d.is_empty());

        if let Some(company) = self
            .cached(EntityKind::Company, cached, |id| self.v1.get_company(id))
            .await?
        {
            return Ok(company);
        }

        if let Some(domain) = domain {
            if let Some(company) = self.find_company_by_domain(domain, take_best_match).await? {
                log::info!("Company found by domain - {}", domain);
                return Ok(company);
            }
        }

        if let Some(company) = self.find_company_by_name(name, take_best_match).await? {
            log::info!("Company found by name - {}", name);
            return Ok(company);
        }

        self.v1
            .create_company(&NewCompany {
                name: name.to_string(),
                domain: domain.map(str::to_string),
                person_ids: Vec::new(),
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Opportunities
    // -----------------------------------------------------------------------

    pub async fn find_opportunity_by_name(
        &self,
        name: &str,
        list_id: i64,
    ) -> Result<Option<Opportunity>, SyncError> {
        let mut matches: Vec<Opportunity> = self
            .v1
            .search_opportunities(name)
            .await?
            .into_iter()
            .filter(|o| o.list_id() == Some(list_id) && o.name.to_uppercase() == name.to_uppercase())
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => {
                log::error!("Multiple results found for {} ({} opportunities)", name, n);
                Err(SyncError::MultipleResults(name.to_string()))
            }
        }
    }

    pub async fn find_or_create_opportunity(
        &self,
        name: &str,
        list_id: i64,
        company_ids: Vec<i64>,
        person_ids: Vec<i64>,
    ) -> Result<Opportunity, SyncError> {
        log::info!("Finding or creating opportunity - {}", name);

        if let Some(opportunity) = self.find_opportunity_by_name(name, list_id).await? {
            log::info!("Opportunity found by name - {}", name);
            return Ok(opportunity);
        }

        self.v1
            .create_opportunity(&NewOpportunity {
                name: name.to_string(),
                list_id,
                person_ids,
                organization_ids: company_ids,
            })
            .await
    }
}
