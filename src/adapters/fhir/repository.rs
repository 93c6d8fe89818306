//! Remote repository trait definition
//!
//! `RemoteRepository` is the seam between the synchronization core and a FHIR
//! server. The HTTP client, the dry-run decorator and the in-memory test double
//! all implement it, and the core only ever holds an `Arc<dyn RemoteRepository>`.

use super::models::Bundle;
use crate::domain::ids::RemoteId;
use crate::domain::{ResourceKind, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Search against one resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// FHIR resource type (e.g. `Patient`)
    pub resource_type: String,

    /// Query parameters in request order
    pub params: Vec<(String, String)>,
}

impl SearchQuery {
    /// Search for every resource of a type
    pub fn all(resource_type: impl Into<String>, page_size: Option<usize>) -> Self {
        let mut params = Vec::new();
        if let Some(count) = page_size {
            params.push(("_count".to_string(), count.to_string()));
        }
        Self {
            resource_type: resource_type.into(),
            params,
        }
    }

    /// Targeted search by business identifier (`identifier={system}|{value}`)
    ///
    /// Asks for two results: one is a match, two means the key is ambiguous.
    /// System and value are escaped so separators in a key stay literal.
    pub fn by_identifier(kind: ResourceKind, system: &str, value: &str) -> Self {
        Self {
            resource_type: kind.resource_type().to_string(),
            params: vec![
                ("identifier".to_string(), identifier_token(system, value)),
                ("_count".to_string(), "2".to_string()),
            ],
        }
    }

    /// Value of the first parameter with the given name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Token search value `{system}|{value}` with both parts escaped
pub fn identifier_token(system: &str, value: &str) -> String {
    format!("{}|{}", escape_search_value(system), escape_search_value(value))
}

/// Escapes `\`, `,`, `|` and `$` in a search parameter value
pub fn escape_search_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',' | '|' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Result of a single create
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    /// Server-assigned id
    pub remote_id: RemoteId,

    /// Resource as returned by the server (may be empty with `Prefer: return=minimal`)
    pub resource: Option<Value>,
}

/// Operations the synchronization core needs from a FHIR server
///
/// Implementations map transport failures to
/// [`RepositoryError`](crate::domain::RepositoryError) and never panic on
/// server responses.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Creates one resource (`POST {base}/{Type}`)
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response carries no id.
    async fn create(&self, resource: &Value) -> Result<CreateOutcome>;

    /// Submits a transaction or batch bundle (`POST {base}`)
    ///
    /// Returns the `transaction-response` or `batch-response` bundle.
    async fn submit_transaction(&self, bundle: &Bundle) -> Result<Bundle>;

    /// Runs a search and returns its first page
    async fn search(&self, query: &SearchQuery) -> Result<Bundle>;

    /// Follows the `next` link of a page
    ///
    /// # Errors
    ///
    /// Returns an error if the page has no next link or the request fails.
    async fn fetch_next_page(&self, page: &Bundle) -> Result<Bundle>;

    /// Base URL of the server
    fn base_url(&self) -> &str;
}
