//! External system integrations for fhirsync.
//!
//! - [`fhir`] - FHIR server access behind the [`fhir::RemoteRepository`] trait
//! - [`source`] - record sources (TSV directories, bundle files)
//!
//! The core only sees the repository trait and [`crate::domain::Record`]s, so the
//! HTTP client can be swapped for the dry-run decorator or an in-memory double.
//!
//! ```rust,no_run
//! use fhirsync::adapters::fhir::{FhirClient, RemoteRepository, SearchQuery};
//! use fhirsync::config::FhirConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FhirClient::new(FhirConfig {
//!     base_url: "https://hapi.example.org/fhir".to_string(),
//!     ..FhirConfig::default()
//! })?;
//! let page = client.search(&SearchQuery::all("Patient", Some(100))).await?;
//! println!("{} patients on the first page", page.entry.len());
//! # Ok(())
//! # }
//! ```

pub mod fhir;
pub mod source;
