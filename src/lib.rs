// fhirsync - Batch synchronization client for FHIR repositories
// Copyright (c) 2025 fhirsync Contributors
// Licensed under the MIT License

//! # fhirsync - batch synchronization against a FHIR repository
//!
//! fhirsync loads clinical records (patients, encounters, observations,
//! diagnostic reports) into a FHIR server in bounded transactions, linking
//! each record's business-key references to server-assigned ids, and purges
//! resources by draining paged search results.
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Reference resolution, linking, batching, upload and purge
//! - [`adapters`] - FHIR REST client and record sources (TSV, Bundle JSON)
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fhirsync::adapters::fhir::build_repository;
//! use fhirsync::adapters::source::TsvDirectory;
//! use fhirsync::config::load_config;
//! use fhirsync::core::upload::BulkUploader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("fhirsync.toml")?;
//!     let repo = build_repository(&config, false)?;
//!
//!     let source = TsvDirectory::new("data", config.identifiers.clone());
//!     let mut uploader = BulkUploader::new(repo, config.identifiers.clone(), config.upload.clone());
//!     let summary = uploader.upload(&source).await?;
//!
//!     println!("Submitted {} records", summary.total_submitted());
//!     Ok(())
//! }
//! ```
//!
//! ## Purging
//!
//! ```rust,no_run
//! use fhirsync::core::reap::{DeleteMode, PagedReaper};
//! # use std::sync::Arc;
//! # use fhirsync::adapters::fhir::RemoteRepository;
//!
//! # async fn example(repo: Arc<dyn RemoteRepository>) -> Result<(), Box<dyn std::error::Error>> {
//! let reaper = PagedReaper::new(repo);
//! let report = reaper
//!     .purge("Observation", DeleteMode::Windowed { batch_size: 250 }, None)
//!     .await?;
//!
//! println!("Deleted {} of {}", report.deleted, report.entries_seen);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Library operations return [`domain::Result`], whose error is
//! [`domain::SyncError`]. Per-record and per-window failures are collected
//! into summaries instead of aborting a run.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
