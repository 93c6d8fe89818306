//! Uploading records to the FHIR server
//!
//! - [`coordinator`] - [`BulkUploader`], kind-by-kind create transactions
//! - [`bundle`] - bundle files, as one transaction or as a patient cascade
//! - [`summary`] - per-kind counters and failure list

pub mod bundle;
pub mod coordinator;
pub mod summary;

pub use bundle::{submit_as_is, CascadeUploader, PassThroughOutcome};
pub use coordinator::BulkUploader;
pub use summary::{KindSummary, UploadSummary};
