//! Dry-run decorator
//!
//! Reads go to the wrapped repository so lookups and drains behave as in a
//! real run. Writes are logged and answered locally with synthetic ids.

use super::models::{resource_type_of, Bundle, BundleEntry, BundleResponse, BundleType, HttpVerb};
use super::repository::{CreateOutcome, RemoteRepository, SearchQuery};
use crate::domain::ids::RemoteId;
use crate::domain::{Result, SyncError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Repository that never writes
pub struct DryRunRepository {
    inner: Arc<dyn RemoteRepository>,
    next_id: AtomicUsize,
}

impl DryRunRepository {
    /// Wraps a repository
    pub fn new(inner: Arc<dyn RemoteRepository>) -> Self {
        Self {
            inner,
            next_id: AtomicUsize::new(1),
        }
    }

    fn synthetic_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("dry-run-{n}")
    }

    fn respond(&self, entry: &BundleEntry) -> BundleEntry {
        let request = entry.request.as_ref();
        let response = match request.map(|r| r.method) {
            Some(HttpVerb::Post) => {
                let resource_type = entry
                    .resource
                    .as_ref()
                    .and_then(resource_type_of)
                    .or(request.map(|r| r.url.as_str()))
                    .unwrap_or_default()
                    .to_string();
                BundleResponse {
                    status: "201 Created".to_string(),
                    location: Some(format!("{resource_type}/{}/_history/1", self.synthetic_id())),
                    etag: None,
                    outcome: None,
                }
            }
            Some(HttpVerb::Delete) => BundleResponse {
                status: "204 No Content".to_string(),
                location: None,
                etag: None,
                outcome: None,
            },
            _ => BundleResponse {
                status: "200 OK".to_string(),
                location: None,
                etag: None,
                outcome: None,
            },
        };
        BundleEntry {
            response: Some(response),
            ..BundleEntry::new()
        }
    }
}

#[async_trait]
impl RemoteRepository for DryRunRepository {
    async fn create(&self, resource: &Value) -> Result<CreateOutcome> {
        let resource_type = resource_type_of(resource)
            .ok_or_else(|| SyncError::Validation("Resource has no resourceType".to_string()))?;
        let remote_id = RemoteId::new(self.synthetic_id()).map_err(SyncError::Other)?;
        tracing::info!(
            resource_type = %resource_type,
            remote_id = %remote_id,
            "[dry run] Skipping create"
        );

        let mut created = resource.clone();
        created["id"] = Value::String(remote_id.to_string());
        Ok(CreateOutcome {
            remote_id,
            resource: Some(created),
        })
    }

    async fn submit_transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        let response_type = match bundle.bundle_type {
            BundleType::Batch => BundleType::BatchResponse,
            _ => BundleType::TransactionResponse,
        };
        tracing::info!(
            bundle_type = ?bundle.bundle_type,
            entries = bundle.entry.len(),
            "[dry run] Skipping bundle submission"
        );

        let mut response = Bundle::new(response_type);
        response.entry = bundle.entry.iter().map(|e| self.respond(e)).collect();
        Ok(response)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Bundle> {
        self.inner.search(query).await
    }

    async fn fetch_next_page(&self, page: &Bundle) -> Result<Bundle> {
        self.inner.fetch_next_page(page).await
    }

    fn base_url(&self) -> &str {
        self.inner.base_url()
    }
}
