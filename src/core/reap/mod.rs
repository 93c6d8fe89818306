//! Draining paged searches and deleting the results
//!
//! - [`reaper`] - [`PagedReaper`] and the delete modes
//! - [`report`] - per-type purge report

pub mod reaper;
pub mod report;

pub use reaper::{bundle_purge_order, dependants_first, DeleteMode, PagedReaper};
pub use report::ReapReport;
