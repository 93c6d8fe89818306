//! Bundle file uploads
//!
//! Two ways to load a bundle whose entries reference each other by `urn:uuid:`:
//! submit it unchanged as one transaction and let the server rewrite the
//! references, or cascade it patient by patient with explicit creates.

use super::summary::UploadSummary;
use crate::adapters::fhir::codec::{display_for, encode_record};
use crate::adapters::fhir::models::{resource_type_of, BundleRequest, BundleType, HttpVerb};
use crate::adapters::fhir::{Bundle, BundleEntry, CreateOutcome, RemoteRepository};
use crate::adapters::source::{BundleSource, RecordSource};
use crate::core::batch::BatchFailure;
use crate::domain::ids::RemoteId;
use crate::domain::{Record, Reference, ResourceKind, Result, SyncError};
use std::collections::HashMap;
use std::time::Instant;

/// Outcome of a pass-through upload
#[derive(Debug, Clone, PartialEq)]
pub struct PassThroughOutcome {
    /// Entries sent
    pub submitted: usize,
    /// Response entries with a 2xx status
    pub succeeded: usize,
    pub response: Bundle,
}

/// Submits a bundle unchanged as one transaction
///
/// A bundle of any other type is re-typed to `transaction`. Entries keep their
/// `fullUrl` so the server resolves internal references; an entry without a
/// request gets a POST to its resource type.
///
/// # Errors
///
/// Returns [`SyncError::Validation`] if an entry has neither a request nor a
/// resource type, [`SyncError::Submission`] if the transaction is rejected.
pub async fn submit_as_is(
    repo: &dyn RemoteRepository,
    source: &BundleSource,
) -> Result<PassThroughOutcome> {
    let mut bundle = source.bundle().clone();
    if bundle.bundle_type != BundleType::Transaction {
        tracing::info!(
            bundle = source.name(),
            bundle_type = ?bundle.bundle_type,
            "Submitting bundle as a transaction"
        );
        bundle.bundle_type = BundleType::Transaction;
    }
    for (index, entry) in bundle.entry.iter_mut().enumerate() {
        if entry.request.is_some() {
            continue;
        }
        let resource_type = entry
            .resource
            .as_ref()
            .and_then(resource_type_of)
            .ok_or_else(|| {
                SyncError::Validation(format!(
                    "{}: entry {index} has no request and no resourceType",
                    source.name()
                ))
            })?;
        entry.request = Some(BundleRequest {
            method: HttpVerb::Post,
            url: resource_type.to_string(),
        });
    }

    let submitted = bundle.entry.len();
    let response = repo
        .submit_transaction(&bundle)
        .await
        .map_err(|e| SyncError::Submission(format!("{}: {e}", source.name())))?;
    let succeeded = response
        .entry
        .iter()
        .filter(|e| e.response.as_ref().map(|r| r.is_success()).unwrap_or(false))
        .count();

    tracing::info!(
        bundle = source.name(),
        submitted = submitted,
        succeeded = succeeded,
        "Bundle submitted"
    );
    Ok(PassThroughOutcome {
        submitted,
        succeeded,
        response,
    })
}

/// Patient-by-patient upload of a bundle
///
/// Each patient is created on its own, then each of its encounters with the
/// subject pointing at the created patient, then one transaction per encounter
/// holding that encounter's observations. A failed create skips the records that
/// depend on it; the cascade moves on to the next patient.
pub struct CascadeUploader<'a> {
    repo: &'a dyn RemoteRepository,
}

/// Created parent for the records of one cascade step
struct Parent {
    local_id: String,
    remote_id: RemoteId,
    display: Option<String>,
}

impl<'a> CascadeUploader<'a> {
    pub fn new(repo: &'a dyn RemoteRepository) -> Self {
        Self { repo }
    }

    pub async fn upload(&self, source: &BundleSource) -> Result<UploadSummary> {
        let started = Instant::now();
        let mut summary = UploadSummary::new();

        let mut parsed = Vec::new();
        for kind in [
            ResourceKind::Patient,
            ResourceKind::Encounter,
            ResourceKind::Observation,
        ] {
            let outcome = source.parse_all(kind)?;
            let stats = summary.kind_mut(kind);
            stats.parsed = outcome.records.len();
            stats.parse_errors = outcome.errors.len();
            summary.parse_errors.extend(outcome.errors);
            parsed.push(outcome.records);
        }
        let mut observations = parsed.pop().unwrap_or_default();
        let mut encounters = parsed.pop().unwrap_or_default();
        let patients = parsed.pop().unwrap_or_default();

        let reports = source.parse_all(ResourceKind::DiagnosticReport)?.records.len();
        if reports > 0 {
            tracing::info!(
                count = reports,
                "Diagnostic reports are not part of the cascade, skipping"
            );
        }

        let mut windows = WindowCounter::default();
        for patient in patients {
            let local_id = patient.local_id.clone();
            let label = patient.label();
            let (own_encounters, rest): (Vec<Record>, Vec<Record>) = encounters
                .into_iter()
                .partition(|e| refers_to(&e.subject, local_id.as_deref()));
            encounters = rest;

            let created = match self.create(&patient).await {
                Ok(created) => {
                    windows.advance(ResourceKind::Patient, 1);
                    summary.kind_mut(ResourceKind::Patient).submitted += 1;
                    created
                }
                Err(e) => {
                    tracing::error!(patient = %label, error = %e, "Patient create failed, skipping its records");
                    summary
                        .failures
                        .push(windows.failure(ResourceKind::Patient, 1, &e));
                    summary.kind_mut(ResourceKind::Encounter).skipped += own_encounters.len();
                    continue;
                }
            };
            let patient = Parent {
                local_id: local_id.unwrap_or_default(),
                display: created
                    .resource
                    .as_ref()
                    .and_then(|r| display_for(ResourceKind::Patient, r))
                    .or_else(|| display_for(ResourceKind::Patient, &encode_record(&patient))),
                remote_id: created.remote_id,
            };

            for mut encounter in own_encounters {
                let enc_local = encounter.local_id.clone();
                let (own_observations, rest): (Vec<Record>, Vec<Record>) = observations
                    .into_iter()
                    .partition(|o| refers_to(&o.encounter, enc_local.as_deref()));
                observations = rest;

                encounter.subject = Some(Reference::remote(
                    patient.remote_id.clone(),
                    patient.display.clone(),
                ));
                let created = match self.create(&encounter).await {
                    Ok(created) => {
                        windows.advance(ResourceKind::Encounter, 1);
                        summary.kind_mut(ResourceKind::Encounter).submitted += 1;
                        created
                    }
                    Err(e) => {
                        tracing::error!(
                            patient = %patient.local_id,
                            error = %e,
                            "Encounter create failed, skipping its observations"
                        );
                        summary
                            .failures
                            .push(windows.failure(ResourceKind::Encounter, 1, &e));
                        summary.kind_mut(ResourceKind::Observation).skipped += own_observations.len();
                        continue;
                    }
                };
                let encounter = Parent {
                    local_id: enc_local.unwrap_or_default(),
                    remote_id: created.remote_id,
                    display: None,
                };

                if own_observations.is_empty() {
                    continue;
                }
                let size = own_observations.len();
                match self
                    .submit_observations(&patient, &encounter, own_observations)
                    .await
                {
                    Ok(()) => {
                        windows.advance(ResourceKind::Observation, size);
                        summary.kind_mut(ResourceKind::Observation).submitted += size;
                    }
                    Err(e) => {
                        tracing::error!(
                            encounter = %encounter.local_id,
                            error = %e,
                            "Observation transaction failed"
                        );
                        summary
                            .failures
                            .push(windows.failure(ResourceKind::Observation, size, &e));
                    }
                }
            }
        }

        let orphans = encounters.len() + observations.len();
        if orphans > 0 {
            tracing::warn!(
                encounters = encounters.len(),
                observations = observations.len(),
                "Records without a parent in the bundle were not uploaded"
            );
            summary.kind_mut(ResourceKind::Encounter).skipped += encounters.len();
            summary.kind_mut(ResourceKind::Observation).skipped += observations.len();
        }

        summary.duration = started.elapsed();
        Ok(summary)
    }

    async fn create(&self, record: &Record) -> Result<CreateOutcome> {
        let resource = encode_record(record);
        self.repo
            .create(&resource)
            .await
            .map_err(|e| SyncError::Submission(format!("create {}: {e}", record.label())))
    }

    async fn submit_observations(
        &self,
        patient: &Parent,
        encounter: &Parent,
        observations: Vec<Record>,
    ) -> Result<()> {
        let entries = observations
            .into_iter()
            .map(|mut observation| {
                observation.subject = Some(Reference::remote(
                    patient.remote_id.clone(),
                    patient.display.clone(),
                ));
                observation.encounter = Some(Reference::remote(encounter.remote_id.clone(), None));
                BundleEntry::create(ResourceKind::Observation, encode_record(&observation))
            })
            .collect::<Vec<_>>();
        let size = entries.len();

        self.repo
            .submit_transaction(&Bundle::transaction(entries))
            .await
            .map_err(|e| SyncError::Submission(format!("observations of {}: {e}", encounter.local_id)))?;
        crate::log_batch_submitted!(ResourceKind::Observation.resource_type(), 0, size);
        Ok(())
    }
}

/// Whether a reference points at the bundle entry with this local id
fn refers_to(reference: &Option<Reference>, local_id: Option<&str>) -> bool {
    match (reference.as_ref().and_then(Reference::pending_key), local_id) {
        (Some(key), Some(id)) => key.local_part() == id,
        _ => false,
    }
}

/// Per-kind window and record positions across the whole cascade
#[derive(Default)]
struct WindowCounter {
    /// (windows, records) attempted so far, per kind
    seen: HashMap<ResourceKind, (usize, usize)>,
}

impl WindowCounter {
    /// Records an attempted window of `size` records
    fn advance(&mut self, kind: ResourceKind, size: usize) -> (usize, usize) {
        let slot = self.seen.entry(kind).or_default();
        let position = *slot;
        slot.0 += 1;
        slot.1 += size;
        position
    }

    fn failure(&mut self, kind: ResourceKind, size: usize, error: &SyncError) -> BatchFailure {
        let (window_index, offset) = self.advance(kind, size);
        BatchFailure {
            label: kind.resource_type().to_string(),
            window_index,
            offset,
            size,
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fhir::testing::ScriptedRepository;
    use crate::config::IdentifierConfig;
    use serde_json::{json, Value};

    fn synthea() -> BundleSource {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"fullUrl": "urn:uuid:p1", "resource": {
                    "resourceType": "Patient", "id": "p1",
                    "name": [{"given": ["Ann"], "family": "Lee"}]}},
                {"fullUrl": "urn:uuid:p2", "resource": {"resourceType": "Patient", "id": "p2"}},
                {"fullUrl": "urn:uuid:e1", "resource": {
                    "resourceType": "Encounter", "id": "e1", "status": "finished",
                    "subject": {"reference": "urn:uuid:p1"}}},
                {"fullUrl": "urn:uuid:e2", "resource": {
                    "resourceType": "Encounter", "id": "e2", "status": "finished",
                    "subject": {"reference": "urn:uuid:p2"}}},
                {"fullUrl": "urn:uuid:o1", "resource": {
                    "resourceType": "Observation", "id": "o1", "status": "final",
                    "subject": {"reference": "urn:uuid:p1"},
                    "encounter": {"reference": "urn:uuid:e1"}}},
                {"fullUrl": "urn:uuid:o2", "resource": {
                    "resourceType": "Observation", "id": "o2", "status": "final",
                    "subject": {"reference": "urn:uuid:p1"},
                    "encounter": {"reference": "urn:uuid:e1"}}},
                {"fullUrl": "urn:uuid:o3", "resource": {
                    "resourceType": "Observation", "id": "o3", "status": "final",
                    "subject": {"reference": "urn:uuid:p2"},
                    "encounter": {"reference": "urn:uuid:e2"}}}
            ]
        });
        BundleSource::from_json("synthea.json", &bundle.to_string(), IdentifierConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_as_is_retypes_bundle() {
        let repo = ScriptedRepository::new();
        let outcome = submit_as_is(&repo, &synthea()).await.unwrap();

        assert_eq!(outcome.submitted, 7);
        assert_eq!(outcome.succeeded, 7);
        let sent = repo.submitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bundle_type, BundleType::Transaction);
        assert_eq!(sent[0].entry.len(), 7);
        for entry in &sent[0].entry {
            let request = entry.request.as_ref().unwrap();
            let resource_type = resource_type_of(entry.resource.as_ref().unwrap()).unwrap();
            assert_eq!(request.method, HttpVerb::Post);
            assert_eq!(request.url, resource_type);
            assert!(entry.full_url.as_ref().unwrap().starts_with("urn:uuid:"));
        }
    }

    #[tokio::test]
    async fn test_submit_as_is_keeps_existing_requests() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                {"fullUrl": "urn:uuid:p1",
                 "resource": {"resourceType": "Patient", "id": "p1"},
                 "request": {"method": "PUT", "url": "Patient/p1"}},
                {"fullUrl": "urn:uuid:o1",
                 "resource": {"resourceType": "Observation", "status": "final",
                              "subject": {"reference": "urn:uuid:p1"}}}
            ]
        });
        let source =
            BundleSource::from_json("tx.json", &bundle.to_string(), IdentifierConfig::default())
                .unwrap();
        let repo = ScriptedRepository::new();
        submit_as_is(&repo, &source).await.unwrap();

        let sent = &repo.submitted()[0];
        let put = sent.entry[0].request.as_ref().unwrap();
        assert_eq!(put.method, HttpVerb::Put);
        assert_eq!(put.url, "Patient/p1");
        let post = sent.entry[1].request.as_ref().unwrap();
        assert_eq!(post.method, HttpVerb::Post);
        assert_eq!(post.url, "Observation");
    }

    #[tokio::test]
    async fn test_submit_as_is_failure() {
        let repo = ScriptedRepository::new();
        repo.fail_submission(1);
        let err = submit_as_is(&repo, &synthea()).await.unwrap_err();
        assert!(matches!(err, SyncError::Submission(_)));
    }

    #[tokio::test]
    async fn test_cascade_rewrites_references() {
        let repo = ScriptedRepository::new();
        let summary = CascadeUploader::new(&repo).upload(&synthea()).await.unwrap();

        assert_eq!(repo.create_count(), 4);
        assert_eq!(repo.submitted().len(), 2);
        assert_eq!(summary.kind(ResourceKind::Patient).unwrap().submitted, 2);
        assert_eq!(summary.kind(ResourceKind::Encounter).unwrap().submitted, 2);
        assert_eq!(summary.kind(ResourceKind::Observation).unwrap().submitted, 3);
        assert!(summary.is_successful());

        let patient_id = repo.resources_of("Patient")[0]["id"].as_str().unwrap().to_string();
        let encounter = &repo.resources_of("Encounter")[0];
        assert_eq!(encounter["subject"]["reference"], format!("Patient/{patient_id}"));
        assert_eq!(encounter["subject"]["display"], "Ann Lee");

        let encounter_id = encounter["id"].as_str().unwrap();
        let first_tx = &repo.submitted()[0];
        assert_eq!(first_tx.entry.len(), 2);
        for entry in &first_tx.entry {
            let resource: &Value = entry.resource.as_ref().unwrap();
            assert_eq!(resource["encounter"]["reference"], format!("Encounter/{encounter_id}"));
            assert!(resource.get("id").is_none());
        }
    }

    #[tokio::test]
    async fn test_failed_observation_transaction_continues() {
        let repo = ScriptedRepository::new();
        repo.fail_submission(1);
        let summary = CascadeUploader::new(&repo).upload(&synthea()).await.unwrap();

        assert_eq!(repo.submitted().len(), 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].label, "Observation");
        assert_eq!(summary.failures[0].size, 2);
        assert_eq!(summary.kind(ResourceKind::Observation).unwrap().submitted, 1);
    }

    #[tokio::test]
    async fn test_cascade_failures_have_distinct_windows() {
        let repo = ScriptedRepository::new();
        // creates run p1, e1, p2, e2
        repo.fail_create(2);
        repo.fail_create(4);
        let summary = CascadeUploader::new(&repo).upload(&synthea()).await.unwrap();

        let encounter_failures: Vec<_> = summary
            .failures
            .iter()
            .filter(|f| f.label == "Encounter")
            .collect();
        assert_eq!(encounter_failures.len(), 2);
        assert_eq!(encounter_failures[0].window_index, 0);
        assert_eq!(encounter_failures[1].window_index, 1);
        assert_eq!(encounter_failures[1].offset, 1);
        assert_eq!(summary.kind(ResourceKind::Observation).unwrap().skipped, 3);
        assert!(repo.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_cascade_failure_window_counts_successes() {
        let repo = ScriptedRepository::new();
        repo.fail_submission(2);
        let summary = CascadeUploader::new(&repo).upload(&synthea()).await.unwrap();

        assert_eq!(summary.failures.len(), 1);
        let failure = &summary.failures[0];
        assert_eq!(failure.label, "Observation");
        assert_eq!(failure.window_index, 1);
        assert_eq!(failure.offset, 2);
        assert_eq!(failure.size, 1);
    }
}
