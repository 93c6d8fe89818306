//! Upload command implementation
//!
//! Uploads the TSV files of a directory kind by kind.

use super::{
    confirm, connect_or_report, load_or_report, print_upload_summary, upload_exit_code,
    EXIT_CONFIG, EXIT_FATAL, EXIT_OK,
};
use crate::adapters::source::TsvDirectory;
use crate::core::upload::BulkUploader;
use crate::domain::ResourceKind;
use clap::Args;
use std::path::PathBuf;

/// Arguments for the upload command
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Directory holding patients.tsv, encounters.tsv, observations.tsv and diagnostic_report.tsv
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Kinds to upload (comma-separated); the configured order is kept
    #[arg(long, value_delimiter = ',')]
    pub kind: Vec<ResourceKind>,

    /// Records per transaction for every kind
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Log writes instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

impl UploadArgs {
    /// Execute the upload command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(dir = %self.dir.display(), "Starting upload command");

        let mut config = match load_or_report(config_path) {
            Ok(config) => config,
            Err(code) => return Ok(code),
        };

        if let Some(batch_size) = self.batch_size {
            if batch_size == 0 {
                eprintln!("--batch-size must be at least 1");
                return Ok(EXIT_CONFIG);
            }
            tracing::info!(batch_size = batch_size, "Overriding batch size from CLI");
            config.upload.batch_size = batch_size;
            config.upload.batch_size_overrides.clear();
        }

        if !self.kind.is_empty() {
            config.upload.order.retain(|kind| self.kind.contains(kind));
            tracing::info!(kinds = ?config.upload.order, "Restricting kinds from CLI");
        }

        if !self.dir.is_dir() {
            eprintln!("Input directory not found: {}", self.dir.display());
            return Ok(EXIT_CONFIG);
        }

        let dry_run = self.dry_run || config.application.dry_run;
        if dry_run {
            println!("🔍 DRY RUN MODE - No resources will be created");
            println!();
        }

        if !self.yes && !dry_run {
            println!("Upload Configuration:");
            println!("  FHIR server: {}", config.fhir.base_url);
            println!("  Input: {}", self.dir.display());
            println!("  Kinds: {:?}", config.upload.order);
            println!("  Batch size: {}", config.upload.batch_size);
            println!();
            if !confirm("Proceed with upload?")? {
                println!("Upload cancelled.");
                return Ok(EXIT_OK);
            }
        }

        let repo = match connect_or_report(&config, dry_run) {
            Ok(repo) => repo,
            Err(code) => return Ok(code),
        };

        let source = TsvDirectory::new(self.dir.clone(), config.identifiers.clone());
        let mut uploader = BulkUploader::new(repo, config.identifiers.clone(), config.upload.clone());

        println!("🚀 Starting upload...");
        let summary = match uploader.upload(&source).await {
            Ok(summary) => summary,
            Err(e) => {
                crate::log_error_with_context!(e, "Upload failed");
                eprintln!("Upload failed: {e}");
                return Ok(EXIT_FATAL);
            }
        };

        summary.log_summary();
        print_upload_summary(&summary);
        Ok(upload_exit_code(&summary))
    }
}
