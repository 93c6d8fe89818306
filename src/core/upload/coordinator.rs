//! Kind-by-kind upload through create transactions
//!
//! Kinds run in the configured dependency order. Each kind's records are
//! windowed by the [`Batcher`]; a window is linked right before it is submitted,
//! so it sees every identity created by earlier kinds and earlier windows.

use super::summary::{KindSummary, UploadSummary};
use crate::adapters::fhir::codec::{display_for, encode_record};
use crate::adapters::fhir::{Bundle, BundleEntry, RemoteRepository};
use crate::adapters::source::{ParseOutcome, RecordSource};
use crate::config::{IdentifierConfig, UploadConfig};
use crate::core::batch::{BatchSink, BatchWindow, Batcher};
use crate::core::link::GraphLinker;
use crate::core::reference::ReferenceResolver;
use crate::domain::ids::BusinessKey;
use crate::domain::{Record, ResourceKind, Result, SyncError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Uploads records kind by kind as create transactions
pub struct BulkUploader {
    repo: Arc<dyn RemoteRepository>,
    resolver: ReferenceResolver,
    linker: GraphLinker,
    config: UploadConfig,
}

impl BulkUploader {
    pub fn new(
        repo: Arc<dyn RemoteRepository>,
        identifiers: IdentifierConfig,
        config: UploadConfig,
    ) -> Self {
        Self {
            resolver: ReferenceResolver::new(repo.clone(), identifiers),
            linker: GraphLinker::new(config.link_policy),
            repo,
            config,
        }
    }

    /// Resolver shared by every kind of this run
    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    /// Parses and uploads every configured kind
    ///
    /// # Errors
    ///
    /// Only an unreadable source aborts the run. Rejected lines and failed
    /// windows are reported in the summary.
    pub async fn upload(&mut self, source: &dyn RecordSource) -> Result<UploadSummary> {
        let started = Instant::now();
        let mut summary = UploadSummary::new();

        for kind in self.config.order.clone() {
            let outcome = source.parse_all(kind)?;
            self.upload_kind(kind, outcome, &mut summary).await?;
        }

        summary.duration = started.elapsed();
        Ok(summary)
    }

    /// Uploads one kind's parsed records
    pub async fn upload_kind(
        &mut self,
        kind: ResourceKind,
        outcome: ParseOutcome,
        summary: &mut UploadSummary,
    ) -> Result<()> {
        let ParseOutcome { records, errors } = outcome;
        for error in &errors {
            tracing::warn!(kind = %kind, error = %error, "Skipping malformed line");
        }

        let batch_size = self.config.batch_size_for(kind);
        tracing::info!(
            kind = %kind,
            records = records.len(),
            batch_size = batch_size,
            "Uploading kind"
        );

        let mut stats = KindSummary {
            parsed: records.len(),
            parse_errors: errors.len(),
            ..KindSummary::default()
        };
        summary.parse_errors.extend(errors);

        let mut sink = TransactionSink {
            kind,
            repo: self.repo.clone(),
            resolver: &mut self.resolver,
            linker: self.linker,
            submit_incomplete: self.config.submit_incomplete,
            stats: &mut stats,
        };
        let report = Batcher::run(batch_size, records, &mut sink).await?;

        stats.add_batches(&report);
        summary.failures.extend(report.failures);
        *summary.kind_mut(kind) = stats;
        Ok(())
    }
}

/// Links a window and submits it as one create transaction
struct TransactionSink<'a> {
    kind: ResourceKind,
    repo: Arc<dyn RemoteRepository>,
    resolver: &'a mut ReferenceResolver,
    linker: GraphLinker,
    submit_incomplete: bool,
    stats: &'a mut KindSummary,
}

#[async_trait]
impl<'a> BatchSink<Record> for TransactionSink<'a> {
    fn label(&self) -> String {
        self.kind.resource_type().to_string()
    }

    async fn submit(&mut self, window: BatchWindow<Record>) -> Result<usize> {
        let mut keys: Vec<Option<BusinessKey>> = Vec::with_capacity(window.len());
        let mut entries = Vec::with_capacity(window.len());

        for record in window.items {
            let linked = self.linker.link(record, self.resolver).await;
            if !linked.is_ready() {
                self.stats.incomplete += 1;
                if !self.submit_incomplete {
                    tracing::warn!(
                        record = %linked.record.label(),
                        unresolved = %linked.describe_unresolved(),
                        "Skipping record with unresolved references"
                    );
                    self.stats.skipped += 1;
                    continue;
                }
                tracing::warn!(
                    record = %linked.record.label(),
                    unresolved = %linked.describe_unresolved(),
                    "Submitting record with unresolved references"
                );
            }
            keys.push(linked.record.business_key.clone());
            entries.push(BundleEntry::create(self.kind, encode_record(&linked.record)));
        }

        if entries.is_empty() {
            tracing::debug!(kind = %self.kind, window = window.index, "Nothing to submit in window");
            return Ok(0);
        }

        let size = entries.len();
        let bundle = Bundle::transaction(entries);
        let response = self.repo.submit_transaction(&bundle).await.map_err(|e| {
            SyncError::Submission(format!(
                "{} window {} ({} records): {e}",
                self.kind, window.index, size
            ))
        })?;
        crate::log_batch_submitted!(self.kind.resource_type(), window.index, size);

        self.prime_from_response(&bundle, &response, &keys);
        self.stats.submitted += size;
        Ok(size)
    }
}

impl TransactionSink<'_> {
    /// Caches the created identities so later windows and kinds skip lookups
    ///
    /// Response entries follow request order.
    fn prime_from_response(
        &mut self,
        request: &Bundle,
        response: &Bundle,
        keys: &[Option<BusinessKey>],
    ) {
        if response.entry.len() != request.entry.len() {
            tracing::warn!(
                kind = %self.kind,
                requested = request.entry.len(),
                returned = response.entry.len(),
                "Transaction response does not match request, not caching created ids"
            );
            return;
        }

        let resource_type = self.kind.resource_type();
        for ((key, sent), received) in keys.iter().zip(&request.entry).zip(&response.entry) {
            let (Some(key), Some(remote_id)) = (key, received.created_id(resource_type)) else {
                continue;
            };
            let display = sent
                .resource
                .as_ref()
                .and_then(|resource| display_for(self.kind, resource));
            self.resolver.prime(self.kind, key.clone(), remote_id, display);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fhir::models::{BundleType, HttpVerb};
    use crate::adapters::fhir::testing::ScriptedRepository;
    use crate::adapters::source::tsv::parse_tsv;
    use crate::config::LinkPolicy;
    use crate::domain::ReferenceField;
    use std::collections::BTreeMap;

    const SYSTEM: &str = "urn:oid:2.16.840.1.113883.3.552";

    fn key(value: &str) -> BusinessKey {
        BusinessKey::new(value).unwrap()
    }

    fn config(batch_size: usize) -> UploadConfig {
        UploadConfig {
            batch_size,
            batch_size_overrides: BTreeMap::new(),
            ..UploadConfig::default()
        }
    }

    fn patients(n: usize) -> ParseOutcome {
        ParseOutcome {
            records: (0..n)
                .map(|i| {
                    Record::new(ResourceKind::Patient)
                        .with_business_key(key(&format!("P{i}")))
                        .with_content("gender", serde_json::json!("female"))
                })
                .collect(),
            errors: vec![],
        }
    }

    struct FixedSource(BTreeMap<ResourceKind, ParseOutcome>);

    impl RecordSource for FixedSource {
        fn parse_all(&self, kind: ResourceKind) -> Result<ParseOutcome> {
            Ok(self.0.get(&kind).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_windows_become_transactions() {
        let repo = Arc::new(ScriptedRepository::new());
        let mut uploader = BulkUploader::new(repo.clone(), IdentifierConfig::default(), config(4));
        let mut summary = UploadSummary::new();

        uploader
            .upload_kind(ResourceKind::Patient, patients(10), &mut summary)
            .await
            .unwrap();

        let submitted = repo.submitted();
        let sizes: Vec<usize> = submitted.iter().map(|b| b.entry.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(submitted.iter().all(|b| b.bundle_type == BundleType::Transaction));

        let entry = &submitted[0].entry[0];
        assert!(entry.full_url.as_deref().unwrap().starts_with("urn:uuid:"));
        let request = entry.request.as_ref().unwrap();
        assert_eq!(request.method, HttpVerb::Post);
        assert_eq!(request.url, "Patient");

        let stats = summary.kind(ResourceKind::Patient).unwrap();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.windows, 3);
        assert_eq!(repo.resources_of("Patient").len(), 10);
    }

    #[tokio::test]
    async fn test_created_ids_are_primed() {
        let repo = Arc::new(ScriptedRepository::new());
        let mut uploader = BulkUploader::new(repo.clone(), IdentifierConfig::default(), config(10));
        let mut summary = UploadSummary::new();

        uploader
            .upload_kind(ResourceKind::Patient, patients(3), &mut summary)
            .await
            .unwrap();
        assert_eq!(uploader.resolver().cache().count_of(ResourceKind::Patient), 3);

        let encounters = ParseOutcome {
            records: vec![Record::new(ResourceKind::Encounter)
                .with_business_key(key("E1"))
                .with_subject(key("P2"))],
            errors: vec![],
        };
        uploader
            .upload_kind(ResourceKind::Encounter, encounters, &mut summary)
            .await
            .unwrap();

        assert_eq!(repo.lookup_count(), 0);
        let encounter = &repo.submitted()[1].entry[0];
        let reference = encounter.resource.as_ref().unwrap()["subject"]["reference"]
            .as_str()
            .unwrap()
            .to_string();
        let p2 = uploader
            .resolver()
            .cache()
            .get(ResourceKind::Patient, &key("P2"))
            .unwrap();
        assert_eq!(reference, format!("Patient/{}", p2.remote_id));
    }

    #[tokio::test]
    async fn test_failed_window_is_isolated() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.fail_submission(2);
        let mut uploader = BulkUploader::new(repo.clone(), IdentifierConfig::default(), config(3));
        let mut summary = UploadSummary::new();

        uploader
            .upload_kind(ResourceKind::Patient, patients(9), &mut summary)
            .await
            .unwrap();

        assert_eq!(repo.submitted().len(), 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].label, "Patient");
        assert_eq!(summary.failures[0].window_index, 1);
        let stats = summary.kind(ResourceKind::Patient).unwrap();
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.failed_windows, 1);
        assert!(!summary.is_successful());
    }

    #[tokio::test]
    async fn test_incomplete_records_can_be_skipped() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.add_identified("Patient", "id1", SYSTEM, "P1");
        let upload = UploadConfig {
            submit_incomplete: false,
            ..config(10)
        };
        let mut uploader = BulkUploader::new(repo.clone(), IdentifierConfig::default(), upload);
        let mut summary = UploadSummary::new();

        let encounters = ParseOutcome {
            records: vec![
                Record::new(ResourceKind::Encounter).with_subject(key("P1")),
                Record::new(ResourceKind::Encounter).with_subject(key("P404")),
            ],
            errors: vec![],
        };
        uploader
            .upload_kind(ResourceKind::Encounter, encounters, &mut summary)
            .await
            .unwrap();

        let stats = summary.kind(ResourceKind::Encounter).unwrap();
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.submitted, 1);
        assert_eq!(repo.submitted()[0].entry.len(), 1);
    }

    #[tokio::test]
    async fn test_window_with_only_skipped_records_submits_nothing() {
        let repo = Arc::new(ScriptedRepository::new());
        let upload = UploadConfig {
            submit_incomplete: false,
            link_policy: LinkPolicy::AllRequired,
            ..config(5)
        };
        let mut uploader = BulkUploader::new(repo.clone(), IdentifierConfig::default(), upload);
        let mut summary = UploadSummary::new();

        let observations = ParseOutcome {
            records: vec![Record::new(ResourceKind::Observation).with_subject(key("P404"))],
            errors: vec![],
        };
        uploader
            .upload_kind(ResourceKind::Observation, observations, &mut summary)
            .await
            .unwrap();

        assert!(repo.submitted().is_empty());
        assert_eq!(summary.kind(ResourceKind::Observation).unwrap().skipped, 1);
    }

    #[tokio::test]
    async fn test_full_run_in_dependency_order() {
        let identifiers = IdentifierConfig::default();
        let mut inputs = BTreeMap::new();
        inputs.insert(
            ResourceKind::Patient,
            parse_tsv(
                ResourceKind::Patient,
                "patients.tsv",
                "patient_id\tfamily\tgiven\tgender\tbirth_date\nP1\tDoe\tJane\tfemale\t1980-01-01\nP2\tRoe\tRick\tmale\tnot-a-date\n".as_bytes(),
                &identifiers,
            ),
        );
        inputs.insert(
            ResourceKind::Encounter,
            parse_tsv(
                ResourceKind::Encounter,
                "encounters.tsv",
                "encounter_id\tpatient_id\tstatus\tclass_code\tstart\tend\nE1\tP1\tfinished\tAMB\t2024-01-01\t\n".as_bytes(),
                &identifiers,
            ),
        );
        inputs.insert(
            ResourceKind::Observation,
            parse_tsv(
                ResourceKind::Observation,
                "observations.tsv",
                "observation_id\tpatient_id\tencounter_id\tstatus\tcode\tcode_display\tvalue\tunit\teffective\nO1\tP1\tE1\tfinal\t8867-4\tHeart rate\t72\t/min\t\nO2\tP1\tE1\tfinal\t8310-5\tBody temperature\t37.1\tCel\t\n".as_bytes(),
                &identifiers,
            ),
        );
        inputs.insert(
            ResourceKind::DiagnosticReport,
            parse_tsv(
                ResourceKind::DiagnosticReport,
                "diagnostic_report.tsv",
                "report_id\tpatient_id\tencounter_id\tstatus\tcode\tcode_display\tresult_ids\tissued\nR1\tP1\tE1\tfinal\t85353-1\tVitals\tO1;O2\t\n".as_bytes(),
                &identifiers,
            ),
        );

        let repo = Arc::new(ScriptedRepository::new());
        let mut uploader = BulkUploader::new(repo.clone(), identifiers, UploadConfig::default());
        let summary = uploader.upload(&FixedSource(inputs)).await.unwrap();

        let types: Vec<String> = repo
            .submitted()
            .iter()
            .map(|b| b.resource_types()[0].clone())
            .collect();
        assert_eq!(types, vec!["Patient", "Encounter", "Observation", "DiagnosticReport"]);
        assert_eq!(repo.lookup_count(), 0);
        assert_eq!(summary.total_submitted(), 5);
        assert_eq!(summary.parse_errors.len(), 1);

        let report = repo.resources_of("DiagnosticReport").remove(0);
        let report = crate::adapters::fhir::codec::decode_record(report, SYSTEM).unwrap();
        assert!(report.reference_fields().iter().all(|f| {
            let reference = report.reference(*f).unwrap();
            let expected = match f {
                ReferenceField::Subject => "Patient/",
                ReferenceField::Encounter => "Encounter/",
                ReferenceField::Result(_) => "Observation/",
            };
            reference.pending_key().unwrap().as_str().starts_with(expected)
        }));
    }
}
