//! FHIR Bundle wire models
//!
//! Only the Bundle envelope is typed; resources stay as `serde_json::Value` so
//! unknown elements pass through untouched.

use crate::domain::ids::{PageCursor, RemoteId};
use crate::domain::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Link relation of the next page of a search
pub const LINK_NEXT: &str = "next";

/// FHIR Bundle resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// Always "Bundle"
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    /// Logical id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Purpose of the bundle
    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    /// Total number of matches (searchset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Links (self, next, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    /// Entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,

    /// Remaining elements (meta, timestamp, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_resource_type() -> String {
    "Bundle".to_string()
}

/// Type of Bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Document,
    Message,
    /// Processed atomically
    Transaction,
    TransactionResponse,
    /// Processed entry by entry
    Batch,
    BatchResponse,
    History,
    Searchset,
    Collection,
}

/// Link related to a Bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

/// HTTP verb of a transaction or batch entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
}

/// Entry of a Bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    /// Absolute URL or `urn:uuid:` placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleResponse>,

    /// Remaining elements (search, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request of a transaction or batch entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequest {
    pub method: HttpVerb,
    pub url: String,
}

/// Outcome of one transaction or batch entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleResponse {
    /// Status line, e.g. "201 Created"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

impl BundleResponse {
    /// Numeric HTTP status, if the status line starts with one
    pub fn status_code(&self) -> Option<u16> {
        self.status
            .split_whitespace()
            .next()
            .and_then(|code| code.parse().ok())
    }

    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        self.status_code()
            .map(|code| (200..300).contains(&code))
            .unwrap_or(false)
    }
}

impl Bundle {
    /// Creates an empty bundle of the given type
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: default_resource_type(),
            id: None,
            bundle_type,
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Atomic bundle of the given entries
    pub fn transaction(entry: Vec<BundleEntry>) -> Self {
        Self {
            entry,
            ..Self::new(BundleType::Transaction)
        }
    }

    /// Non-atomic bundle of the given entries
    pub fn batch(entry: Vec<BundleEntry>) -> Self {
        Self {
            entry,
            ..Self::new(BundleType::Batch)
        }
    }

    /// URL of the next page, if more results exist
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|link| link.relation == LINK_NEXT)
            .map(|link| link.url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// Cursor of the next page, if more results exist
    pub fn next_cursor(&self) -> Option<PageCursor> {
        self.next_link().map(PageCursor::new)
    }

    /// Resources of the given FHIR type, in entry order
    pub fn resources_of<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Value> {
        self.entry
            .iter()
            .filter_map(|entry| entry.resource.as_ref())
            .filter(move |resource| resource_type_of(resource) == Some(resource_type))
    }

    /// Distinct resource types in order of first appearance
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for resource_type in self
            .entry
            .iter()
            .filter_map(|entry| entry.resource.as_ref())
            .filter_map(resource_type_of)
        {
            if !types.iter().any(|t| t == resource_type) {
                types.push(resource_type.to_string());
            }
        }
        types
    }
}

impl BundleEntry {
    /// Empty entry
    pub fn new() -> Self {
        Self {
            full_url: None,
            resource: None,
            request: None,
            response: None,
            extra: Map::new(),
        }
    }

    /// `POST {Type}` entry with a fresh `urn:uuid:` full URL
    pub fn create(kind: ResourceKind, resource: Value) -> Self {
        Self {
            full_url: Some(format!("urn:uuid:{}", uuid::Uuid::new_v4())),
            resource: Some(resource),
            request: Some(BundleRequest {
                method: HttpVerb::Post,
                url: kind.resource_type().to_string(),
            }),
            ..Self::new()
        }
    }

    /// `DELETE {target}` entry
    pub fn delete(target: impl Into<String>) -> Self {
        Self {
            request: Some(BundleRequest {
                method: HttpVerb::Delete,
                url: target.into(),
            }),
            ..Self::new()
        }
    }

    /// Persisted locator of the entry's resource
    ///
    /// The `fullUrl` when present, otherwise `{Type}/{id}` from the resource.
    pub fn locator(&self) -> Option<String> {
        if let Some(full_url) = self.full_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(full_url.to_string());
        }
        let resource = self.resource.as_ref()?;
        let resource_type = resource_type_of(resource)?;
        let id = resource.get("id").and_then(Value::as_str)?;
        Some(format!("{resource_type}/{id}"))
    }

    /// Remote id carried in the response location
    pub fn created_id(&self, resource_type: &str) -> Option<RemoteId> {
        self.response
            .as_ref()
            .and_then(|response| response.location.as_deref())
            .and_then(|location| RemoteId::from_location(resource_type, location))
    }
}

impl Default for BundleEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// `resourceType` element of a resource
pub fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}
