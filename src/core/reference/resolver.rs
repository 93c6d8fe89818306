//! Business key resolution against the remote repository
//!
//! The cache is consulted first. A miss costs exactly one identifier search;
//! only a single unambiguous match is cached.

use super::cache::{ReferenceCache, ResolvedReference};
use crate::adapters::fhir::codec::display_for;
use crate::adapters::fhir::{RemoteRepository, SearchQuery};
use crate::config::IdentifierConfig;
use crate::domain::ids::{BusinessKey, RemoteId};
use crate::domain::{ResourceKind, Result, SyncError};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of resolving one business key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedReference),
    /// No remote resource carries the key (yet)
    Unresolved,
}

impl Resolution {
    pub fn resolved(&self) -> Option<&ResolvedReference> {
        match self {
            Resolution::Resolved(resolved) => Some(resolved),
            Resolution::Unresolved => None,
        }
    }
}

/// Resolves business keys to remote identities, memoizing hits
pub struct ReferenceResolver {
    repo: Arc<dyn RemoteRepository>,
    identifiers: IdentifierConfig,
    cache: ReferenceCache,
    lookups: usize,
}

impl ReferenceResolver {
    pub fn new(repo: Arc<dyn RemoteRepository>, identifiers: IdentifierConfig) -> Self {
        Self {
            repo,
            identifiers,
            cache: ReferenceCache::new(),
            lookups: 0,
        }
    }

    /// Resolves `key` among resources of `kind`
    ///
    /// # Errors
    ///
    /// - [`SyncError::ResolutionTransport`] if the lookup could not be performed
    /// - [`SyncError::AmbiguousReference`] if more than one resource matches
    ///
    /// Neither outcome is cached, and neither is a "no match".
    pub async fn resolve(&mut self, kind: ResourceKind, key: &BusinessKey) -> Result<Resolution> {
        if let Some(hit) = self.cache.get(kind, key) {
            return Ok(Resolution::Resolved(hit.clone()));
        }

        self.lookups += 1;
        let system = self.identifiers.system_for(kind);
        let query = SearchQuery::by_identifier(kind, system, key.as_str());
        let page = match self.repo.search(&query).await {
            Ok(page) => page,
            Err(SyncError::Repository(source)) => {
                tracing::warn!(
                    kind = %kind,
                    key = %key,
                    error = %source,
                    "Reference lookup failed"
                );
                return Err(SyncError::ResolutionTransport {
                    kind,
                    key: key.to_string(),
                    source,
                });
            }
            Err(e) => return Err(e),
        };

        let matches: Vec<(Option<&str>, &Value)> = page
            .entry
            .iter()
            .filter_map(|entry| {
                entry
                    .resource
                    .as_ref()
                    .filter(|r| r.get("resourceType").and_then(Value::as_str) == Some(kind.resource_type()))
                    .map(|r| (entry.full_url.as_deref(), r))
            })
            .collect();
        let total = page
            .total
            .map(|t| t as usize)
            .unwrap_or(0)
            .max(matches.len());

        match (total, matches.first()) {
            (0, _) | (_, None) => {
                tracing::debug!(kind = %kind, key = %key, "No remote match");
                Ok(Resolution::Unresolved)
            }
            (1, Some((full_url, resource))) => {
                let remote_id = remote_id_of(kind, *full_url, resource).ok_or_else(|| {
                    SyncError::Validation(format!(
                        "{kind} matching '{key}' has no id"
                    ))
                })?;
                let resolved = ResolvedReference {
                    kind,
                    key: key.clone(),
                    remote_id,
                    display: display_for(kind, resource),
                };
                tracing::debug!(
                    kind = %kind,
                    key = %key,
                    remote_id = %resolved.remote_id,
                    "Resolved reference"
                );
                Ok(Resolution::Resolved(
                    self.cache.insert_if_absent(resolved).clone(),
                ))
            }
            (matches, _) => Err(SyncError::AmbiguousReference {
                kind,
                key: key.to_string(),
                matches,
            }),
        }
    }

    /// Caches an identity learned without a lookup (e.g. from a create response)
    pub fn prime(
        &mut self,
        kind: ResourceKind,
        key: BusinessKey,
        remote_id: RemoteId,
        display: Option<String>,
    ) {
        self.cache.insert_if_absent(ResolvedReference {
            kind,
            key,
            remote_id,
            display,
        });
    }

    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    /// Remote lookups issued so far
    pub fn lookups(&self) -> usize {
        self.lookups
    }
}

fn remote_id_of(kind: ResourceKind, full_url: Option<&str>, resource: &Value) -> Option<RemoteId> {
    resource
        .get("id")
        .and_then(Value::as_str)
        .and_then(|id| RemoteId::new(id).ok())
        .or_else(|| full_url.and_then(|url| RemoteId::from_location(kind.resource_type(), url)))
}
