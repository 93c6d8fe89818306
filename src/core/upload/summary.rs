//! Upload summary and reporting

use crate::core::batch::{BatchFailure, BatchReport};
use crate::domain::{ParseError, ResourceKind};
use std::collections::BTreeMap;
use std::time::Duration;

/// Counters for one resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindSummary {
    /// Records parsed from the source
    pub parsed: usize,

    /// Lines rejected by the parser
    pub parse_errors: usize,

    /// Records accepted by the server
    pub submitted: usize,

    /// Records with an unresolved required reference
    pub incomplete: usize,

    /// Incomplete records left out of submission
    pub skipped: usize,

    /// Windows submitted
    pub windows: usize,

    /// Windows whose submission failed
    pub failed_windows: usize,
}

impl KindSummary {
    /// Folds a batched run into the counters
    pub fn add_batches(&mut self, report: &BatchReport) {
        self.windows += report.windows;
        self.failed_windows += report.failures.len();
    }
}

/// Summary of an upload run
#[derive(Debug, Clone, Default)]
pub struct UploadSummary {
    /// Per-kind counters, in kind order
    pub kinds: BTreeMap<ResourceKind, KindSummary>,

    /// Rejected input lines
    pub parse_errors: Vec<ParseError>,

    /// Failed submissions
    pub failures: Vec<BatchFailure>,

    pub duration: Duration,
}

impl UploadSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Counters of a kind, created on first use
    pub fn kind_mut(&mut self, kind: ResourceKind) -> &mut KindSummary {
        self.kinds.entry(kind).or_default()
    }

    pub fn kind(&self, kind: ResourceKind) -> Option<&KindSummary> {
        self.kinds.get(&kind)
    }

    pub fn total_submitted(&self) -> usize {
        self.kinds.values().map(|k| k.submitted).sum()
    }

    pub fn total_parsed(&self) -> usize {
        self.kinds.values().map(|k| k.parsed).sum()
    }

    /// No failed submission and no rejected line
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty() && self.parse_errors.is_empty()
    }

    /// Log the summary
    pub fn log_summary(&self) {
        for (kind, stats) in &self.kinds {
            tracing::info!(
                kind = %kind,
                parsed = stats.parsed,
                parse_errors = stats.parse_errors,
                submitted = stats.submitted,
                incomplete = stats.incomplete,
                skipped = stats.skipped,
                windows = stats.windows,
                failed_windows = stats.failed_windows,
                "Kind uploaded"
            );
        }

        tracing::info!(
            parsed = self.total_parsed(),
            submitted = self.total_submitted(),
            failures = self.failures.len(),
            duration_secs = self.duration.as_secs(),
            "Upload completed"
        );

        if !self.failures.is_empty() {
            tracing::warn!(
                failure_count = self.failures.len(),
                "Upload completed with failed submissions"
            );
            for failure in &self.failures {
                tracing::warn!(
                    label = %failure.label,
                    window = failure.window_index,
                    size = failure.size,
                    error = %failure.error,
                    "Failed submission"
                );
            }
        }
    }
}
