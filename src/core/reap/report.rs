//! Purge reporting

use crate::core::batch::BatchFailure;

/// Outcome of draining and deleting one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub resource_type: String,

    /// Pages read, the first search page included
    pub pages_fetched: usize,

    /// Entries seen across all pages
    pub entries_seen: usize,

    /// Delete bundles submitted
    pub delete_submissions: usize,

    /// Entries the server reported as deleted
    pub deleted: usize,

    /// Failed delete submissions
    pub failures: Vec<BatchFailure>,

    /// Why draining stopped before the last page, if it did
    pub halted: Option<String>,
}

impl ReapReport {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    /// Drained to the end with every submission accepted
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty() && self.halted.is_none()
    }

    /// Log the report
    pub fn log_summary(&self) {
        tracing::info!(
            resource_type = %self.resource_type,
            pages = self.pages_fetched,
            entries = self.entries_seen,
            submissions = self.delete_submissions,
            deleted = self.deleted,
            failures = self.failures.len(),
            "Purge completed"
        );
        if let Some(reason) = &self.halted {
            tracing::warn!(
                resource_type = %self.resource_type,
                reason = %reason,
                "Purge stopped before the last page"
            );
        }
        for failure in &self.failures {
            tracing::warn!(
                resource_type = %self.resource_type,
                window = failure.window_index,
                size = failure.size,
                error = %failure.error,
                "Failed delete submission"
            );
        }
    }
}
