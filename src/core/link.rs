//! Reference rewriting
//!
//! [`GraphLinker`] rewrites a record's business-key references to the remote
//! identities they resolve to. Unresolvable references stay as business keys and
//! are reported; the record is never rejected here.

use crate::config::LinkPolicy;
use crate::core::reference::{ReferenceResolver, Resolution, ResolvedReference};
use crate::domain::ids::BusinessKey;
use crate::domain::{Record, Reference, ReferenceField, SyncError};
use std::fmt;

/// Whether a linked record has every required reference resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Ready,
    Incomplete,
}

/// Why a reference was left as a business key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    NoMatch,
    Ambiguous(usize),
    /// The lookup itself failed
    Failed(String),
    /// Resolvable, but left alone because a required field was not
    Withheld,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::NoMatch => f.write_str("no match"),
            UnresolvedReason::Ambiguous(n) => write!(f, "{n} matches"),
            UnresolvedReason::Failed(message) => write!(f, "lookup failed: {message}"),
            UnresolvedReason::Withheld => f.write_str("withheld"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub field: ReferenceField,
    pub key: BusinessKey,
    pub reason: UnresolvedReason,
}

/// A record after linking
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedRecord {
    pub record: Record,
    pub status: LinkStatus,
    pub unresolved: Vec<UnresolvedReference>,
}

impl LinkedRecord {
    pub fn is_ready(&self) -> bool {
        self.status == LinkStatus::Ready
    }

    /// One-line summary of the unresolved fields, for logs
    pub fn describe_unresolved(&self) -> String {
        self.unresolved
            .iter()
            .map(|u| format!("{} '{}' ({})", u.field, u.key, u.reason))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Rewrites record references through a [`ReferenceResolver`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphLinker {
    policy: LinkPolicy,
}

impl GraphLinker {
    pub fn new(policy: LinkPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    /// Resolves and rewrites every pending reference of `record`
    ///
    /// References that already point at a remote identity are left untouched,
    /// so linking a linked record changes nothing and issues no lookups.
    pub async fn link(&self, mut record: Record, resolver: &mut ReferenceResolver) -> LinkedRecord {
        let mut resolved: Vec<(ReferenceField, ResolvedReference)> = Vec::new();
        let mut unresolved: Vec<UnresolvedReference> = Vec::new();

        for field in record.reference_fields() {
            let Some(key) = record.reference(field).and_then(Reference::pending_key).cloned() else {
                continue;
            };
            let kind = field.target_kind();
            let reason = match resolver.resolve(kind, &key).await {
                Ok(Resolution::Resolved(hit)) => {
                    resolved.push((field, hit));
                    continue;
                }
                Ok(Resolution::Unresolved) => UnresolvedReason::NoMatch,
                Err(SyncError::AmbiguousReference { matches, .. }) => {
                    UnresolvedReason::Ambiguous(matches)
                }
                Err(e) => UnresolvedReason::Failed(e.to_string()),
            };
            unresolved.push(UnresolvedReference { field, key, reason });
        }

        let missing_required = unresolved.iter().any(|u| u.field.is_required());
        let status = if missing_required {
            LinkStatus::Incomplete
        } else {
            LinkStatus::Ready
        };

        if missing_required && self.policy == LinkPolicy::AllRequired {
            unresolved.extend(resolved.into_iter().map(|(field, hit)| UnresolvedReference {
                field,
                key: hit.key,
                reason: UnresolvedReason::Withheld,
            }));
        } else {
            for (field, hit) in resolved {
                if let Some(reference) = record.reference_mut(field) {
                    let display = hit.display.or_else(|| reference.display.take());
                    *reference = Reference::remote(hit.remote_id, display);
                }
            }
        }

        if status == LinkStatus::Incomplete {
            tracing::debug!(
                record = %record.label(),
                unresolved = unresolved.len(),
                "Record has unresolved required references"
            );
        }

        LinkedRecord {
            record,
            status,
            unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fhir::testing::ScriptedRepository;
    use crate::config::IdentifierConfig;
    use crate::domain::ResourceKind;
    use std::sync::Arc;

    const SYSTEM: &str = "urn:oid:2.16.840.1.113883.3.552";
    const OBS_SYSTEM: &str = "https://fhir.cerner.com/ceuuid";

    fn key(value: &str) -> BusinessKey {
        BusinessKey::new(value).unwrap()
    }

    fn setup() -> (Arc<ScriptedRepository>, ReferenceResolver) {
        let repo = Arc::new(ScriptedRepository::new());
        let resolver = ReferenceResolver::new(repo.clone(), IdentifierConfig::default());
        (repo, resolver)
    }

    fn observation() -> Record {
        Record::new(ResourceKind::Observation)
            .with_business_key(key("O1"))
            .with_subject(key("P1"))
            .with_encounter(key("E404"))
    }

    #[tokio::test]
    async fn test_unresolvable_encounter_keeps_business_key() {
        let (repo, mut resolver) = setup();
        repo.add_identified("Patient", "id1", SYSTEM, "P1");

        let linked = GraphLinker::new(LinkPolicy::PerField)
            .link(observation(), &mut resolver)
            .await;

        let subject = linked.record.subject.as_ref().unwrap();
        assert_eq!(subject.reference_string(ResourceKind::Patient), "Patient/id1");
        let encounter = linked.record.encounter.as_ref().unwrap();
        assert_eq!(encounter.pending_key(), Some(&key("E404")));

        assert_eq!(linked.status, LinkStatus::Incomplete);
        assert_eq!(
            linked.unresolved,
            vec![UnresolvedReference {
                field: ReferenceField::Encounter,
                key: key("E404"),
                reason: UnresolvedReason::NoMatch,
            }]
        );
    }

    #[tokio::test]
    async fn test_all_required_policy_rewrites_nothing_on_gap() {
        let (repo, mut resolver) = setup();
        repo.add_identified("Patient", "id1", SYSTEM, "P1");

        let linked = GraphLinker::new(LinkPolicy::AllRequired)
            .link(observation(), &mut resolver)
            .await;

        assert!(!linked.record.subject.as_ref().unwrap().is_resolved());
        assert_eq!(linked.unresolved.len(), 2);
        assert!(linked
            .unresolved
            .iter()
            .any(|u| u.field == ReferenceField::Subject && u.reason == UnresolvedReason::Withheld));
    }

    #[tokio::test]
    async fn test_fully_resolved_record_is_ready() {
        let (repo, mut resolver) = setup();
        repo.add_resource(serde_json::json!({
            "resourceType": "Patient",
            "id": "id1",
            "identifier": [{"system": SYSTEM, "value": "P1"}],
            "name": [{"text": "Jane Doe"}]
        }));
        repo.add_identified("Encounter", "e1", SYSTEM, "E404");

        for policy in [LinkPolicy::PerField, LinkPolicy::AllRequired] {
            let linked = GraphLinker::new(policy)
                .link(observation(), &mut resolver)
                .await;
            assert!(linked.is_ready());
            assert!(linked.unresolved.is_empty());
            assert_eq!(
                linked.record.subject.as_ref().unwrap().display.as_deref(),
                Some("Jane Doe")
            );
            assert_eq!(
                linked.record.encounter.as_ref().unwrap().reference_string(ResourceKind::Encounter),
                "Encounter/e1"
            );
        }
        assert_eq!(repo.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_results_resolve_independently() {
        let (repo, mut resolver) = setup();
        repo.add_identified("Patient", "id1", SYSTEM, "P1");
        repo.add_identified("Observation", "o1", OBS_SYSTEM, "O1");
        repo.add_identified("Observation", "o3", OBS_SYSTEM, "O3");

        let report = Record::new(ResourceKind::DiagnosticReport)
            .with_subject(key("P1"))
            .with_result(key("O1"))
            .with_result(key("O2"))
            .with_result(key("O3"));
        let linked = GraphLinker::default().link(report, &mut resolver).await;

        let refs: Vec<String> = linked
            .record
            .results
            .iter()
            .map(|r| r.reference_string(ResourceKind::Observation))
            .collect();
        assert_eq!(refs, vec!["Observation/o1", "O2", "Observation/o3"]);
        assert!(linked.is_ready());
        assert_eq!(linked.unresolved[0].field, ReferenceField::Result(1));
    }

    #[tokio::test]
    async fn test_linking_is_idempotent() {
        let (repo, mut resolver) = setup();
        repo.add_identified("Patient", "id1", SYSTEM, "P1");
        let linker = GraphLinker::default();

        let once = linker.link(observation(), &mut resolver).await;
        let lookups = repo.lookup_count();
        let twice = linker.link(once.record.clone(), &mut resolver).await;

        assert_eq!(twice.record, once.record);
        // the still-pending encounter is looked up again, the rewritten subject is not
        assert_eq!(repo.lookup_count(), lookups + 1);

        let (repo, mut resolver) = setup();
        repo.add_identified("Patient", "id1", SYSTEM, "P1");
        repo.add_identified("Encounter", "e1", SYSTEM, "E404");
        let ready = linker.link(observation(), &mut resolver).await;
        let relinked = linker.link(ready.record.clone(), &mut resolver).await;
        assert_eq!(relinked, ready);
        assert_eq!(repo.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_lookup_failures_are_reported_per_field() {
        let (repo, mut resolver) = setup();
        repo.add_identified("Patient", "id1", SYSTEM, "P1");
        repo.add_identified("Encounter", "x", SYSTEM, "E1");
        repo.add_identified("Encounter", "y", SYSTEM, "E1");
        repo.fail_lookup("O1");

        let report = Record::new(ResourceKind::DiagnosticReport)
            .with_subject(key("P1"))
            .with_encounter(key("E1"))
            .with_result(key("O1"));
        let linked = GraphLinker::default().link(report, &mut resolver).await;

        assert!(linked.record.subject.as_ref().unwrap().is_resolved());
        assert_eq!(linked.unresolved[0].reason, UnresolvedReason::Ambiguous(2));
        assert!(matches!(linked.unresolved[1].reason, UnresolvedReason::Failed(_)));
        assert!(linked.describe_unresolved().contains("encounter 'E1' (2 matches)"));
    }
}
