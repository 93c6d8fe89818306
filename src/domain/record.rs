//! Clinical records and their reference fields
//!
//! A [`Record`] is one resource awaiting submission. Its outgoing references start
//! out as business keys and are rewritten to remote identities by the linker.

use super::ids::{BusinessKey, RemoteId};
use super::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// What a reference currently points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceTarget {
    /// Not yet resolved; carries the key used for lookup
    BusinessKey(BusinessKey),
    /// Resolved to a persisted resource
    Remote(RemoteId),
}

/// Outgoing reference of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Current target
    pub target: ReferenceTarget,
    /// Human-readable hint (e.g. patient name)
    pub display: Option<String>,
}

impl Reference {
    /// Unresolved reference by business key
    pub fn business_key(key: BusinessKey) -> Self {
        Self {
            target: ReferenceTarget::BusinessKey(key),
            display: None,
        }
    }

    /// Resolved reference to a remote identity
    pub fn remote(id: RemoteId, display: Option<String>) -> Self {
        Self {
            target: ReferenceTarget::Remote(id),
            display,
        }
    }

    /// Business key if still unresolved
    pub fn pending_key(&self) -> Option<&BusinessKey> {
        match &self.target {
            ReferenceTarget::BusinessKey(key) => Some(key),
            ReferenceTarget::Remote(_) => None,
        }
    }

    /// True once the reference points at a remote identity
    pub fn is_resolved(&self) -> bool {
        matches!(self.target, ReferenceTarget::Remote(_))
    }

    /// Wire form of the reference string
    ///
    /// Unresolved references keep their business key verbatim.
    pub fn reference_string(&self, kind: ResourceKind) -> String {
        match &self.target {
            ReferenceTarget::BusinessKey(key) => key.as_str().to_string(),
            ReferenceTarget::Remote(id) => id.reference(kind),
        }
    }
}

/// Reference field of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceField {
    /// `subject` (the patient)
    Subject,
    /// `encounter`
    Encounter,
    /// `result[index]` (an observation of a diagnostic report)
    Result(usize),
}

impl ReferenceField {
    /// Kind of resource the field points at
    pub fn target_kind(&self) -> ResourceKind {
        match self {
            ReferenceField::Subject => ResourceKind::Patient,
            ReferenceField::Encounter => ResourceKind::Encounter,
            ReferenceField::Result(_) => ResourceKind::Observation,
        }
    }

    /// Whether an unresolved value keeps the record from being ready
    pub fn is_required(&self) -> bool {
        !matches!(self, ReferenceField::Result(_))
    }
}

impl fmt::Display for ReferenceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceField::Subject => f.write_str("subject"),
            ReferenceField::Encounter => f.write_str("encounter"),
            ReferenceField::Result(index) => write!(f, "result[{index}]"),
        }
    }
}

/// A clinical record
///
/// `content` holds every resource element except the reference fields, which are
/// kept typed so the linker can rewrite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Resource kind
    pub kind: ResourceKind,

    /// Id assigned by the source (e.g. bundle entry id), if any
    pub local_id: Option<String>,

    /// Business key identifying this record across systems
    pub business_key: Option<BusinessKey>,

    /// `subject` reference
    pub subject: Option<Reference>,

    /// `encounter` reference
    pub encounter: Option<Reference>,

    /// `result` references (diagnostic reports)
    pub results: Vec<Reference>,

    /// Remaining resource content
    pub content: Map<String, Value>,
}

impl Record {
    /// Creates an empty record of the given kind
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            local_id: None,
            business_key: None,
            subject: None,
            encounter: None,
            results: Vec::new(),
            content: Map::new(),
        }
    }

    /// Sets the business key
    pub fn with_business_key(mut self, key: BusinessKey) -> Self {
        self.business_key = Some(key);
        self
    }

    /// Sets the local id
    pub fn with_local_id(mut self, id: impl Into<String>) -> Self {
        self.local_id = Some(id.into());
        self
    }

    /// Sets the subject reference to a business key
    pub fn with_subject(mut self, key: BusinessKey) -> Self {
        self.subject = Some(Reference::business_key(key));
        self
    }

    /// Sets the encounter reference to a business key
    pub fn with_encounter(mut self, key: BusinessKey) -> Self {
        self.encounter = Some(Reference::business_key(key));
        self
    }

    /// Appends a result reference by business key
    pub fn with_result(mut self, key: BusinessKey) -> Self {
        self.results.push(Reference::business_key(key));
        self
    }

    /// Sets a content element
    pub fn with_content(mut self, name: impl Into<String>, value: Value) -> Self {
        self.content.insert(name.into(), value);
        self
    }

    /// Reference stored in a field
    pub fn reference(&self, field: ReferenceField) -> Option<&Reference> {
        match field {
            ReferenceField::Subject => self.subject.as_ref(),
            ReferenceField::Encounter => self.encounter.as_ref(),
            ReferenceField::Result(index) => self.results.get(index),
        }
    }

    /// Mutable reference stored in a field
    pub fn reference_mut(&mut self, field: ReferenceField) -> Option<&mut Reference> {
        match field {
            ReferenceField::Subject => self.subject.as_mut(),
            ReferenceField::Encounter => self.encounter.as_mut(),
            ReferenceField::Result(index) => self.results.get_mut(index),
        }
    }

    /// Every populated reference field, in resolution order
    pub fn reference_fields(&self) -> Vec<ReferenceField> {
        let mut fields = Vec::with_capacity(2 + self.results.len());
        if self.subject.is_some() {
            fields.push(ReferenceField::Subject);
        }
        if self.encounter.is_some() {
            fields.push(ReferenceField::Encounter);
        }
        fields.extend((0..self.results.len()).map(ReferenceField::Result));
        fields
    }

    /// Label used in logs and failure reports
    pub fn label(&self) -> String {
        match (&self.business_key, &self.local_id) {
            (Some(key), _) => format!("{}[{}]", self.kind, key),
            (None, Some(id)) => format!("{}/{}", self.kind, id),
            (None, None) => self.kind.to_string(),
        }
    }
}
