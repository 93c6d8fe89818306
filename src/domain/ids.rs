//! Domain identifier types with validation
//!
//! Newtype wrappers keep business keys, server-assigned identities and page
//! cursors from being mixed up.

use super::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business key newtype wrapper
///
/// A stable identifier embedded in source data that denotes the same real-world
/// entity across systems. It is used to find an already-persisted record remotely.
///
/// # Examples
///
/// ```
/// use fhirsync::domain::ids::BusinessKey;
///
/// let key = BusinessKey::new("P1").unwrap();
/// assert_eq!(key.as_str(), "P1");
/// assert!(BusinessKey::new("  ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusinessKey(String);

impl BusinessKey {
    /// Creates a new BusinessKey from a string
    ///
    /// Returns `Err` if the key is empty or whitespace only.
    pub fn new(key: impl Into<String>) -> Result<Self, String> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err("Business key cannot be empty".to_string());
        }
        Ok(Self(key))
    }

    /// Returns the business key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key without a `urn:uuid:` prefix or a `{Type}/` prefix
    ///
    /// Bundle files reference their own entries as `urn:uuid:<id>` or `Patient/<id>`;
    /// this is the part that matches the referenced resource's local `id`.
    pub fn local_part(&self) -> &str {
        let key = self.0.strip_prefix("urn:uuid:").unwrap_or(&self.0);
        match key.rsplit_once('/') {
            Some((_, id)) if !id.is_empty() => id,
            _ => key,
        }
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BusinessKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for BusinessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Server-assigned logical id of a persisted resource
///
/// # Examples
///
/// ```
/// use fhirsync::domain::ids::RemoteId;
/// use fhirsync::domain::ResourceKind;
///
/// let id = RemoteId::new("123").unwrap();
/// assert_eq!(id.reference(ResourceKind::Patient), "Patient/123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteId(String);

impl RemoteId {
    /// Creates a new RemoteId from a string
    ///
    /// Ids containing `/` are rejected: a logical id is a single path segment.
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Remote id cannot be empty".to_string());
        }
        if id.contains('/') {
            return Err(format!("Remote id must not contain '/': {id}"));
        }
        Ok(Self(id))
    }

    /// Extracts the logical id from a resource location
    ///
    /// Accepts relative (`Patient/123`, `Patient/123/_history/2`) and absolute
    /// (`https://host/fhir/Patient/123/_history/2`) locations. Returns `None` if the
    /// location does not name a resource of the given type.
    pub fn from_location(resource_type: &str, location: &str) -> Option<Self> {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let position = segments.iter().rposition(|s| *s == resource_type)?;
        segments
            .get(position + 1)
            .and_then(|id| RemoteId::new(*id).ok())
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative reference string (`{Type}/{id}`)
    pub fn reference(&self, kind: ResourceKind) -> String {
        format!("{}/{}", kind.resource_type(), self.0)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Opaque continuation token of a paginated search
///
/// The server decides its content; this crate only compares cursors for
/// equality and follows them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor(String);

impl PageCursor {
    /// Wraps a server-provided continuation token
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    /// Returns the cursor as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
