//! Core synchronization logic for fhirsync.
//!
//! # Modules
//!
//! - [`reference`] - cache-first resolution of business keys to remote ids
//! - [`link`] - rewriting record references to resolved identities
//! - [`batch`] - fixed-size windowing with per-window failure isolation
//! - [`upload`] - kind-by-kind create transactions and bundle uploads
//! - [`reap`] - paged drain and bulk delete
//!
//! # Upload Workflow
//!
//! 1. **Parse**: read one kind's records from the source
//! 2. **Window**: split them into batches of the kind's batch size
//! 3. **Link**: resolve each window's references right before submission
//! 4. **Submit**: send the window as one create transaction
//! 5. **Prime**: cache the created ids for the kinds that follow
//!
//! # Example
//!
//! ```rust,no_run
//! use fhirsync::adapters::fhir::build_repository;
//! use fhirsync::adapters::source::TsvDirectory;
//! use fhirsync::config::load_config;
//! use fhirsync::core::upload::BulkUploader;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("fhirsync.toml")?;
//! let repo = build_repository(&config, false)?;
//!
//! let source = TsvDirectory::new("data/", config.identifiers.clone());
//! let mut uploader = BulkUploader::new(repo, config.identifiers.clone(), config.upload.clone());
//! let summary = uploader.upload(&source).await?;
//!
//! println!("Submitted: {}", summary.total_submitted());
//! println!("Failed windows: {}", summary.failures.len());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod link;
pub mod reap;
pub mod reference;
pub mod upload;
