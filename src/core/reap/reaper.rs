//! Paged drain and bulk delete
//!
//! The drain follows `next` links from the first search page until a page has
//! none. A cursor that was already followed halts the drain with a
//! [`SyncError::PaginationStall`] instead of looping forever.

use super::report::ReapReport;
use crate::adapters::fhir::models::resource_type_of;
use crate::adapters::fhir::{Bundle, BundleEntry, RemoteRepository, SearchQuery};
use crate::config::{PurgeConfig, PurgeMode};
use crate::core::batch::{BatchFailure, BatchSink, BatchWindow, Batcher};
use crate::domain::ids::PageCursor;
use crate::domain::{ResourceKind, Result, SyncError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// How drained entries are deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Collect every page, then delete everything in one transaction
    Accumulate,
    /// Delete in non-atomic batches of `batch_size` while draining
    Windowed { batch_size: usize },
}

impl DeleteMode {
    pub fn from_config(config: &PurgeConfig) -> Self {
        match config.mode {
            PurgeMode::Accumulate => DeleteMode::Accumulate,
            PurgeMode::Windowed => DeleteMode::Windowed {
                batch_size: config.batch_size,
            },
        }
    }
}

/// Drains paged searches and deletes what they return
pub struct PagedReaper {
    repo: Arc<dyn RemoteRepository>,
}

/// Walks the pages of one search
struct PageWalker<'a> {
    repo: &'a dyn RemoteRepository,
    followed: HashSet<PageCursor>,
    pages: usize,
}

impl<'a> PageWalker<'a> {
    fn new(repo: &'a dyn RemoteRepository) -> Self {
        Self {
            repo,
            followed: HashSet::new(),
            pages: 1,
        }
    }

    /// Page after `page`, or `None` on the last page
    async fn next(&mut self, page: &Bundle) -> Result<Option<Bundle>> {
        let Some(cursor) = page.next_cursor() else {
            return Ok(None);
        };
        if !self.followed.insert(cursor.clone()) {
            return Err(SyncError::PaginationStall {
                cursor: cursor.to_string(),
            });
        }
        let next = self.repo.fetch_next_page(page).await?;
        self.pages += 1;
        tracing::debug!(page = self.pages, entries = next.entry.len(), "Fetched next page");
        Ok(Some(next))
    }
}

impl PagedReaper {
    pub fn new(repo: Arc<dyn RemoteRepository>) -> Self {
        Self { repo }
    }

    /// Every entry of every page, in page order
    ///
    /// # Errors
    ///
    /// Fails on the first page fetch error or pagination stall.
    pub async fn collect_all(&self, first: Bundle) -> Result<Vec<BundleEntry>> {
        let mut walker = PageWalker::new(self.repo.as_ref());
        let mut page = first;
        let mut entries = Vec::new();
        loop {
            entries.extend(std::mem::take(&mut page.entry));
            match walker.next(&page).await? {
                Some(next) => page = next,
                None => return Ok(entries),
            }
        }
    }

    /// Drains from `first` and deletes every entry
    ///
    /// A failed page fetch or a stall halts the drain. Windowed mode still
    /// deletes the entries collected so far; accumulate mode deletes nothing.
    pub async fn drain_and_delete(
        &self,
        resource_type: &str,
        first: Bundle,
        mode: DeleteMode,
    ) -> ReapReport {
        let mut report = ReapReport::new(resource_type);
        let mut walker = PageWalker::new(self.repo.as_ref());
        let mut sink = DeleteSink {
            repo: self.repo.clone(),
            resource_type: resource_type.to_string(),
            atomic: false,
        };
        let mut windowed = match mode {
            DeleteMode::Windowed { batch_size } => match Batcher::new(batch_size) {
                Ok(batcher) => Some(batcher),
                Err(e) => {
                    report.halted = Some(e.to_string());
                    return report;
                }
            },
            DeleteMode::Accumulate => None,
        };
        let mut accumulated: Vec<String> = Vec::new();

        let mut page = first;
        loop {
            for entry in std::mem::take(&mut page.entry) {
                report.entries_seen += 1;
                let Some(target) = entry.locator() else {
                    tracing::warn!(resource_type = %resource_type, "Entry has no locator, skipping");
                    continue;
                };
                match windowed.as_mut() {
                    Some(batcher) => batcher.push(target, &mut sink).await,
                    None => accumulated.push(target),
                }
            }

            match walker.next(&page).await {
                Ok(Some(next)) => page = next,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        resource_type = %resource_type,
                        page = walker.pages,
                        error = %e,
                        "Draining halted"
                    );
                    report.halted = Some(e.to_string());
                    break;
                }
            }
        }
        report.pages_fetched = walker.pages;

        if let Some(batcher) = windowed {
            let batches = batcher.finish(&mut sink).await;
            report.delete_submissions = batches.windows;
            report.deleted = batches.succeeded;
            report.failures = batches.failures;
        } else if report.halted.is_some() {
            tracing::warn!(
                resource_type = %resource_type,
                collected = accumulated.len(),
                "Drain incomplete, nothing deleted"
            );
        } else if !accumulated.is_empty() {
            sink.atomic = true;
            let size = accumulated.len();
            let window = BatchWindow {
                index: 0,
                offset: 0,
                items: accumulated,
            };
            report.delete_submissions = 1;
            match sink.submit(window).await {
                Ok(deleted) => report.deleted = deleted,
                Err(e) => report.failures.push(BatchFailure {
                    label: resource_type.to_string(),
                    window_index: 0,
                    offset: 0,
                    size,
                    error: e.to_string(),
                }),
            }
        }

        report
    }

    /// Searches every resource of a type and deletes it
    ///
    /// # Errors
    ///
    /// Fails only if the first search page cannot be read.
    pub async fn purge(
        &self,
        resource_type: &str,
        mode: DeleteMode,
        page_size: Option<usize>,
    ) -> Result<ReapReport> {
        tracing::info!(resource_type = %resource_type, mode = ?mode, "Purging resources");
        let first = self
            .repo
            .search(&SearchQuery::all(resource_type, page_size))
            .await?;
        Ok(self.drain_and_delete(resource_type, first, mode).await)
    }

    /// Purges several types one after another
    ///
    /// A type whose first page cannot be read gets a halted report and the
    /// remaining types still run.
    pub async fn purge_all(
        &self,
        resource_types: &[String],
        mode: DeleteMode,
        page_size: Option<usize>,
    ) -> Vec<ReapReport> {
        let mut reports = Vec::with_capacity(resource_types.len());
        for resource_type in resource_types {
            let report = match self.purge(resource_type, mode, page_size).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(resource_type = %resource_type, error = %e, "Purge failed");
                    ReapReport {
                        halted: Some(e.to_string()),
                        ..ReapReport::new(resource_type.as_str())
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

/// Orders resource types so dependants are deleted before what they reference
///
/// Types outside the known kinds go first in their given order, then the known
/// kinds from the most dependent to the least.
pub fn dependants_first(resource_types: &[String]) -> Vec<String> {
    let mut unknown: Vec<String> = Vec::new();
    let mut known: Vec<ResourceKind> = Vec::new();
    for resource_type in resource_types {
        match ResourceKind::from_resource_type(resource_type) {
            Some(kind) if !known.contains(&kind) => known.push(kind),
            Some(_) => {}
            None if !unknown.contains(resource_type) => unknown.push(resource_type.clone()),
            None => {}
        }
    }
    known.sort_by(|a, b| b.cmp(a));
    unknown
        .into_iter()
        .chain(known.into_iter().map(|k| k.resource_type().to_string()))
        .collect()
}

/// Types found in a bundle, in deletion order
pub fn bundle_purge_order(bundle: &Bundle) -> Vec<String> {
    let types: Vec<String> = bundle
        .entry
        .iter()
        .filter_map(|e| e.resource.as_ref())
        .filter_map(resource_type_of)
        .map(str::to_string)
        .collect();
    dependants_first(&types)
}

/// Submits DELETE bundles
struct DeleteSink {
    repo: Arc<dyn RemoteRepository>,
    resource_type: String,
    /// Transaction instead of batch
    atomic: bool,
}

#[async_trait]
impl BatchSink<String> for DeleteSink {
    fn label(&self) -> String {
        self.resource_type.clone()
    }

    async fn submit(&mut self, window: BatchWindow<String>) -> Result<usize> {
        let size = window.len();
        let entries: Vec<BundleEntry> = window.items.into_iter().map(BundleEntry::delete).collect();
        let bundle = if self.atomic {
            Bundle::transaction(entries)
        } else {
            Bundle::batch(entries)
        };

        let response = self.repo.submit_transaction(&bundle).await.map_err(|e| {
            SyncError::Submission(format!(
                "delete {} window {} ({size} entries): {e}",
                self.resource_type, window.index
            ))
        })?;
        crate::log_batch_submitted!(self.resource_type, window.index, size);

        let mut deleted = 0;
        for entry in &response.entry {
            match &entry.response {
                Some(r) if r.is_success() => deleted += 1,
                Some(r) => tracing::warn!(
                    resource_type = %self.resource_type,
                    status = %r.status,
                    "Delete entry not applied"
                ),
                None => {}
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fhir::models::{BundleLink, BundleType, HttpVerb, LINK_NEXT};
    use crate::adapters::fhir::testing::ScriptedRepository;
    use serde_json::json;

    fn reaper(repo: &Arc<ScriptedRepository>) -> PagedReaper {
        PagedReaper::new(repo.clone())
    }

    fn page(ids: &[&str], next: Option<&str>) -> Bundle {
        let mut bundle = Bundle::new(BundleType::Searchset);
        bundle.entry = ids
            .iter()
            .map(|id| BundleEntry {
                resource: Some(json!({"resourceType": "Patient", "id": id})),
                ..BundleEntry::new()
            })
            .collect();
        if let Some(url) = next {
            bundle.link.push(BundleLink {
                relation: LINK_NEXT.to_string(),
                url: url.to_string(),
            });
        }
        bundle
    }

    #[tokio::test]
    async fn test_windowed_delete_over_three_pages() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.add_many("Observation", 1000);
        repo.set_page_size(400);

        let report = reaper(&repo)
            .purge("Observation", DeleteMode::Windowed { batch_size: 250 }, None)
            .await
            .unwrap();

        let submitted = repo.submitted();
        assert_eq!(submitted.len(), 4);
        assert!(submitted.iter().all(|b| b.entry.len() == 250));
        assert!(submitted.iter().all(|b| b.bundle_type == BundleType::Batch));
        assert_eq!(repo.next_page_count(), 2);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.entries_seen, 1000);
        assert_eq!(report.delete_submissions, 4);
        assert_eq!(report.deleted, 1000);
        assert!(report.is_successful());
        assert!(repo.resources_of("Observation").is_empty());
    }

    #[tokio::test]
    async fn test_accumulate_deletes_in_one_transaction() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.add_many("Encounter", 25);
        repo.set_page_size(10);

        let report = reaper(&repo)
            .purge("Encounter", DeleteMode::Accumulate, None)
            .await
            .unwrap();

        let submitted = repo.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].bundle_type, BundleType::Transaction);
        assert_eq!(submitted[0].entry.len(), 25);
        let request = submitted[0].entry[0].request.as_ref().unwrap();
        assert_eq!(request.method, HttpVerb::Delete);
        assert!(request.url.ends_with("/Encounter/1"));
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.deleted, 25);
    }

    #[tokio::test]
    async fn test_empty_drain_submits_nothing() {
        let repo = Arc::new(ScriptedRepository::new());
        for mode in [DeleteMode::Accumulate, DeleteMode::Windowed { batch_size: 5 }] {
            let report = reaper(&repo).purge("Patient", mode, Some(10)).await.unwrap();
            assert_eq!(report.pages_fetched, 1);
            assert_eq!(report.delete_submissions, 0);
        }
        assert!(repo.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_cursor_halts_with_stall() {
        let repo = Arc::new(ScriptedRepository::new());
        let loop_url = "http://scripted.test/fhir?_getpages=loop";
        repo.script_page(loop_url, page(&["b"], Some(loop_url)));

        let report = reaper(&repo)
            .drain_and_delete(
                "Patient",
                page(&["a"], Some(loop_url)),
                DeleteMode::Windowed { batch_size: 10 },
            )
            .await;

        assert_eq!(repo.next_page_count(), 1);
        assert_eq!(report.pages_fetched, 2);
        assert!(report.halted.as_deref().unwrap().contains("Pagination stalled"));
        // entries collected before the stall are still deleted
        assert_eq!(repo.submitted().len(), 1);
        assert_eq!(repo.submitted()[0].entry.len(), 2);
    }

    #[tokio::test]
    async fn test_halted_accumulate_deletes_nothing() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.add_many("Patient", 30);
        repo.set_page_size(10);
        repo.fail_next_page(2);

        let report = reaper(&repo)
            .purge("Patient", DeleteMode::Accumulate, None)
            .await
            .unwrap();

        assert!(report.halted.is_some());
        assert_eq!(report.entries_seen, 20);
        assert!(repo.submitted().is_empty());
        assert_eq!(repo.resources_of("Patient").len(), 30);
    }

    #[tokio::test]
    async fn test_failed_delete_window_does_not_stop_drain() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.add_many("Observation", 30);
        repo.set_page_size(10);
        repo.fail_submission(1);

        let report = reaper(&repo)
            .purge("Observation", DeleteMode::Windowed { batch_size: 10 }, None)
            .await
            .unwrap();

        assert_eq!(report.delete_submissions, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].window_index, 0);
        assert_eq!(report.deleted, 20);
        assert_eq!(repo.resources_of("Observation").len(), 10);
    }

    #[tokio::test]
    async fn test_collect_all() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.add_many("Patient", 7);
        repo.set_page_size(3);

        let first = repo.search(&SearchQuery::all("Patient", None)).await.unwrap();
        let entries = reaper(&repo).collect_all(first).await.unwrap();

        assert_eq!(entries.len(), 7);
        assert_eq!(repo.next_page_count(), 2);
    }

    #[tokio::test]
    async fn test_locator_falls_back_to_type_and_id() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.add_resource(json!({"resourceType": "Patient", "id": "x1"}));

        reaper(&repo)
            .drain_and_delete("Patient", page(&["x1"], None), DeleteMode::Accumulate)
            .await;

        let request = repo.submitted()[0].entry[0].request.clone().unwrap();
        assert_eq!(request.url, "Patient/x1");
        assert!(repo.resources_of("Patient").is_empty());
    }

    #[test]
    fn test_dependants_first() {
        let types: Vec<String> = ["Patient", "Encounter", "Claim", "Observation", "Patient", "DiagnosticReport"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            dependants_first(&types),
            vec!["Claim", "DiagnosticReport", "Observation", "Encounter", "Patient"]
        );
    }
}
