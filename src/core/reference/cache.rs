//! Memo of resolved references for one run

use crate::domain::ids::{BusinessKey, RemoteId};
use crate::domain::ResourceKind;
use std::collections::HashMap;

/// A business key paired with the remote identity it resolved to
///
/// Created once per unique (kind, key) and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub kind: ResourceKind,
    pub key: BusinessKey,
    pub remote_id: RemoteId,
    /// Human-readable hint copied onto rewritten references
    pub display: Option<String>,
}

/// (kind, business key) to [`ResolvedReference`]
///
/// Owned by one upload run. Entries are only ever added.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    entries: HashMap<(ResourceKind, BusinessKey), ResolvedReference>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ResourceKind, key: &BusinessKey) -> Option<&ResolvedReference> {
        self.entries.get(&(kind, key.clone()))
    }

    /// Stores a resolution unless the key is already present
    ///
    /// Returns the entry held by the cache afterwards, which is the earlier one
    /// when the key was already cached.
    pub fn insert_if_absent(&mut self, resolved: ResolvedReference) -> &ResolvedReference {
        self.entries
            .entry((resolved.kind, resolved.key.clone()))
            .or_insert(resolved)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached entries of one kind
    pub fn count_of(&self, kind: ResourceKind) -> usize {
        self.entries.keys().filter(|(k, _)| *k == kind).count()
    }
}
