//! Versioned (v2) endpoints: field metadata.
//!
//! Responses are `{ "data": [...], "pagination": { "nextUrl": ... } }`
//! envelopes. Pages are followed through the `cursor` carried by `nextUrl`.

use std::sync::Arc;

use reqwest::Method;
use url::Url;

use super::types::{FieldMetadata, FieldMetadataPage};
use super::{send_as, ApiRequest, Transport};
use crate::error::SyncError;

const PAGE_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct VersionedApi {
    transport: Arc<dyn Transport>,
}

impl VersionedApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn fetch_fields(&self, path: String) -> Result<Vec<FieldMetadata>, SyncError> {
        let mut fields = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request =
                ApiRequest::versioned(Method::GET, path.clone()).query("limit", PAGE_LIMIT);
            if let Some(cursor) = &cursor {
                request = request.query("cursor", cursor);
            }
            let page: FieldMetadataPage = send_as(self.transport.as_ref(), request).await?;
            fields.extend(page.data);

            let Some(next_url) = page.pagination.next_url else {
                break;
            };
            match next_cursor(&next_url) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => {
                    log::warn!(
                        "Stopping field metadata paging for {} at unusable next page {}",
                        path,
                        next_url
                    );
                    break;
                }
            }
        }
        Ok(fields)
    }

    pub async fn get_person_fields(&self) -> Result<Vec<FieldMetadata>, SyncError> {
        log::debug!("Fetching person field metadata");
        self.fetch_fields("persons/fields".to_string()).await
    }

    pub async fn get_company_fields(&self) -> Result<Vec<FieldMetadata>, SyncError> {
        log::debug!("Fetching company field metadata");
        self.fetch_fields("companies/fields".to_string()).await
    }

    pub async fn get_list_fields(&self, list_id: i64) -> Result<Vec<FieldMetadata>, SyncError> {
        log::debug!("Fetching list field metadata - {}", list_id);
        self.fetch_fields(format!("lists/{}/fields", list_id)).await
    }
}

fn next_cursor(next_url: &str) -> Option<String> {
    Url::parse(next_url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
}
