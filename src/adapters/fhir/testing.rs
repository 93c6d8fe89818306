//! In-memory repository for unit tests
//!
//! Stores resources by type, answers identifier searches, pages `search` results
//! and applies transaction and batch bundles. Failures and hand-made pages can be
//! scripted, and every call is counted.

use super::models::{
    resource_type_of, Bundle, BundleEntry, BundleLink, BundleResponse, BundleType, HttpVerb,
    LINK_NEXT,
};
use super::repository::{identifier_token, CreateOutcome, RemoteRepository, SearchQuery};
use crate::domain::ids::RemoteId;
use crate::domain::{RepositoryError, Result, SyncError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const BASE_URL: &str = "http://scripted.test/fhir";

#[derive(Default)]
struct State {
    resources: Vec<Value>,
    next_id: usize,
    default_page_size: Option<usize>,
    scripted_first: HashMap<String, Bundle>,
    scripted_pages: HashMap<String, Bundle>,
    failing_keys: HashSet<String>,
    failing_submissions: HashSet<usize>,
    failing_creates: HashSet<usize>,
    failing_pages: HashSet<usize>,
    snapshots: Vec<Vec<Value>>,
    searches: Vec<SearchQuery>,
    next_pages: usize,
    creates: usize,
    submitted: Vec<Bundle>,
}

/// Scripted in-memory [`RemoteRepository`]
pub struct ScriptedRepository {
    state: Mutex<State>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Stores a resource, assigning an id if it has none; returns the id
    pub fn add_resource(&self, mut resource: Value) -> String {
        let mut state = self.state();
        let id = match resource.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = state.next_id.to_string();
                state.next_id += 1;
                resource["id"] = Value::String(id.clone());
                id
            }
        };
        state.resources.push(resource);
        id
    }

    /// Stores a resource carrying one identifier
    pub fn add_identified(
        &self,
        resource_type: &str,
        id: &str,
        system: &str,
        value: &str,
    ) -> String {
        self.add_resource(serde_json::json!({
            "resourceType": resource_type,
            "id": id,
            "identifier": [{"system": system, "value": value}]
        }))
    }

    /// Stores `count` bare resources of a type
    pub fn add_many(&self, resource_type: &str, count: usize) {
        for _ in 0..count {
            self.add_resource(serde_json::json!({ "resourceType": resource_type }));
        }
    }

    /// Page size used when a search has no `_count`
    pub fn set_page_size(&self, size: usize) {
        self.state().default_page_size = Some(size);
    }

    /// Answers the next search of `resource_type` with a fixed first page
    pub fn script_first_page(&self, resource_type: &str, page: Bundle) {
        self.state()
            .scripted_first
            .insert(resource_type.to_string(), page);
    }

    /// Answers a next-link URL with a fixed page
    pub fn script_page(&self, url: &str, page: Bundle) {
        self.state().scripted_pages.insert(url.to_string(), page);
    }

    /// Identifier searches for this value fail with a timeout
    pub fn fail_lookup(&self, value: &str) {
        self.state().failing_keys.insert(value.to_string());
    }

    /// The n-th bundle submission (1-based) fails with a server error
    pub fn fail_submission(&self, n: usize) {
        self.state().failing_submissions.insert(n);
    }

    /// The n-th create (1-based) fails with a server error
    pub fn fail_create(&self, n: usize) {
        self.state().failing_creates.insert(n);
    }

    /// The n-th next-page fetch (1-based) fails with a server error
    pub fn fail_next_page(&self, n: usize) {
        self.state().failing_pages.insert(n);
    }

    pub fn search_count(&self) -> usize {
        self.state().searches.len()
    }

    /// Identifier searches issued so far
    pub fn lookup_count(&self) -> usize {
        self.state()
            .searches
            .iter()
            .filter(|q| q.param("identifier").is_some())
            .count()
    }

    pub fn next_page_count(&self) -> usize {
        self.state().next_pages
    }

    pub fn create_count(&self) -> usize {
        self.state().creates
    }

    /// Bundles submitted so far, including failed submissions
    pub fn submitted(&self) -> Vec<Bundle> {
        self.state().submitted.clone()
    }

    /// Stored resources of a type
    pub fn resources_of(&self, resource_type: &str) -> Vec<Value> {
        self.state()
            .resources
            .iter()
            .filter(|r| resource_type_of(r) == Some(resource_type))
            .cloned()
            .collect()
    }

    fn store(state: &mut State, mut resource: Value) -> Result<RemoteId> {
        let id = state.next_id.to_string();
        state.next_id += 1;
        resource["id"] = Value::String(id.clone());
        state.resources.push(resource);
        RemoteId::new(id).map_err(SyncError::Other)
    }

    /// One page of a result snapshot; the next link names the snapshot
    fn page(
        resources: &[Value],
        resource_type: &str,
        snapshot: usize,
        offset: usize,
        size: usize,
    ) -> Bundle {
        let mut bundle = Bundle::new(BundleType::Searchset);
        bundle.total = Some(resources.len() as u64);
        bundle.entry = resources
            .iter()
            .skip(offset)
            .take(size)
            .map(|resource| BundleEntry {
                full_url: resource
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|id| format!("{BASE_URL}/{resource_type}/{id}")),
                resource: Some(resource.clone()),
                ..BundleEntry::new()
            })
            .collect();
        if offset + size < resources.len() {
            bundle.link.push(BundleLink {
                relation: LINK_NEXT.to_string(),
                url: format!(
                    "{BASE_URL}?_getpages={snapshot}&_type={resource_type}&_offset={}&_count={size}",
                    offset + size
                ),
            });
        }
        bundle
    }

    fn matches_identifier(resource: &Value, token: &str) -> bool {
        resource
            .get("identifier")
            .and_then(Value::as_array)
            .map(|identifiers| {
                identifiers.iter().any(|i| {
                    match (
                        i.get("system").and_then(Value::as_str),
                        i.get("value").and_then(Value::as_str),
                    ) {
                        (Some(system), Some(value)) => identifier_token(system, value) == token,
                        _ => false,
                    }
                })
            })
            .unwrap_or(false)
    }

    fn delete(state: &mut State, target: &str) -> bool {
        let before = state.resources.len();
        state.resources.retain(|resource| {
            let Some(resource_type) = resource_type_of(resource) else {
                return true;
            };
            let Some(id) = resource.get("id").and_then(Value::as_str) else {
                return true;
            };
            let relative = format!("{resource_type}/{id}");
            target != relative && !target.ends_with(&format!("/{relative}"))
        });
        state.resources.len() < before
    }
}

impl Default for ScriptedRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn server_error(message: &str) -> SyncError {
    RepositoryError::ServerError {
        status: 500,
        message: message.to_string(),
    }
    .into()
}

fn response(status: &str, location: Option<String>) -> BundleEntry {
    BundleEntry {
        response: Some(BundleResponse {
            status: status.to_string(),
            location,
            etag: None,
            outcome: None,
        }),
        ..BundleEntry::new()
    }
}

#[async_trait]
impl RemoteRepository for ScriptedRepository {
    async fn create(&self, resource: &Value) -> Result<CreateOutcome> {
        let mut state = self.state();
        state.creates += 1;
        if state.failing_creates.contains(&state.creates) {
            return Err(server_error("scripted create failure"));
        }
        let remote_id = Self::store(&mut state, resource.clone())?;
        let mut created = resource.clone();
        created["id"] = Value::String(remote_id.to_string());
        Ok(CreateOutcome {
            remote_id,
            resource: Some(created),
        })
    }

    async fn submit_transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        let mut state = self.state();
        state.submitted.push(bundle.clone());
        let n = state.submitted.len();
        if state.failing_submissions.contains(&n) {
            return Err(server_error("scripted submission failure"));
        }

        let response_type = match bundle.bundle_type {
            BundleType::Batch => BundleType::BatchResponse,
            _ => BundleType::TransactionResponse,
        };
        let mut out = Bundle::new(response_type);
        for entry in &bundle.entry {
            let Some(request) = &entry.request else {
                out.entry.push(response("400 Bad Request", None));
                continue;
            };
            match (request.method, &entry.resource) {
                (HttpVerb::Post, Some(resource)) => {
                    let id = Self::store(&mut state, resource.clone())?;
                    let location = format!("{}/{}/_history/1", request.url, id);
                    out.entry.push(response("201 Created", Some(location)));
                }
                (HttpVerb::Delete, _) => {
                    let status = if Self::delete(&mut state, &request.url) {
                        "204 No Content"
                    } else {
                        "404 Not Found"
                    };
                    out.entry.push(response(status, None));
                }
                _ => out.entry.push(response("200 OK", None)),
            }
        }
        Ok(out)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Bundle> {
        let mut state = self.state();
        state.searches.push(query.clone());

        if let Some(token) = query.param("identifier") {
            let value = token.split_once('|').map(|(_, v)| v).unwrap_or(token);
            if state.failing_keys.contains(value) {
                return Err(RepositoryError::Timeout("scripted lookup timeout".to_string()).into());
            }
            let matches: Vec<Value> = state
                .resources
                .iter()
                .filter(|r| resource_type_of(r) == Some(query.resource_type.as_str()))
                .filter(|r| Self::matches_identifier(r, token))
                .cloned()
                .collect();
            let size = query
                .param("_count")
                .and_then(|c| c.parse().ok())
                .unwrap_or(matches.len().max(1));
            let mut page = Self::page(&matches, &query.resource_type, 0, 0, size);
            page.link.clear();
            return Ok(page);
        }

        if let Some(page) = state.scripted_first.remove(&query.resource_type) {
            return Ok(page);
        }

        let resources: Vec<Value> = state
            .resources
            .iter()
            .filter(|r| resource_type_of(r) == Some(query.resource_type.as_str()))
            .cloned()
            .collect();
        let size = query
            .param("_count")
            .and_then(|c| c.parse().ok())
            .or(state.default_page_size)
            .unwrap_or(resources.len().max(1));
        let snapshot = state.snapshots.len();
        let page = Self::page(&resources, &query.resource_type, snapshot, 0, size);
        state.snapshots.push(resources);
        Ok(page)
    }

    async fn fetch_next_page(&self, page: &Bundle) -> Result<Bundle> {
        let mut state = self.state();
        state.next_pages += 1;
        if state.failing_pages.contains(&state.next_pages) {
            return Err(server_error("scripted page failure"));
        }

        let url = page
            .next_link()
            .ok_or_else(|| RepositoryError::NotFound("no next link".to_string()))?
            .to_string();
        if let Some(scripted) = state.scripted_pages.get(&url) {
            return Ok(scripted.clone());
        }

        let parsed = url::Url::parse(&url)
            .map_err(|e| RepositoryError::InvalidResponse(e.to_string()))?;
        let param = |name: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let number = |name: &str| param(name).and_then(|v| v.parse::<usize>().ok());
        let snapshot = number("_getpages")
            .ok_or_else(|| RepositoryError::NotFound(format!("unknown page {url}")))?;
        let resource_type = param("_type").unwrap_or_default();
        let offset = number("_offset").unwrap_or(0);
        let size = number("_count").unwrap_or(1);

        let resources = state
            .snapshots
            .get(snapshot)
            .ok_or_else(|| RepositoryError::NotFound(format!("expired page {url}")))?;
        Ok(Self::page(resources, &resource_type, snapshot, offset, size))
    }

    fn base_url(&self) -> &str {
        BASE_URL
    }
}
