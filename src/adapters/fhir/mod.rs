//! FHIR server integration
//!
//! - [`models`] - Bundle wire models
//! - [`repository`] - the [`RemoteRepository`] trait and [`SearchQuery`]
//! - [`client`] - HTTP implementation ([`FhirClient`])
//! - [`dry_run`] - decorator that logs writes instead of sending them
//! - [`codec`] - record to resource conversion

pub mod client;
pub mod codec;
pub mod dry_run;
pub mod models;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;

pub use client::FhirClient;
pub use dry_run::DryRunRepository;
pub use models::{Bundle, BundleEntry, BundleType};
pub use repository::{CreateOutcome, RemoteRepository, SearchQuery};

use crate::config::SyncConfig;
use crate::domain::Result;
use std::sync::Arc;

/// Builds the repository for a run
///
/// Wraps the HTTP client in a [`DryRunRepository`] when `dry_run` is set.
pub fn build_repository(config: &SyncConfig, dry_run: bool) -> Result<Arc<dyn RemoteRepository>> {
    let client: Arc<dyn RemoteRepository> = Arc::new(FhirClient::new(config.fhir.clone())?);
    if dry_run {
        tracing::info!("Dry run: no resources will be created or deleted");
        Ok(Arc::new(DryRunRepository::new(client)))
    } else {
        Ok(client)
    }
}
