//! Upload-bundle command implementation

use super::{
    confirm, connect_or_report, load_or_report, print_upload_summary, upload_exit_code,
    EXIT_CONFIG, EXIT_FATAL, EXIT_OK, EXIT_PARTIAL,
};
use crate::adapters::source::BundleSource;
use crate::core::upload::{submit_as_is, CascadeUploader};
use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// How a bundle file is uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BundleMode {
    /// One transaction, references resolved by the server
    AsIs,
    /// Patient by patient with explicit creates
    Cascade,
}

/// Arguments for the upload-bundle command
#[derive(Args, Debug)]
pub struct UploadBundleArgs {
    /// Bundle JSON file
    pub file: PathBuf,

    /// Upload mode
    #[arg(long, value_enum, default_value_t = BundleMode::AsIs)]
    pub mode: BundleMode,

    /// Log writes instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

impl UploadBundleArgs {
    /// Execute the upload-bundle command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(file = %self.file.display(), mode = ?self.mode, "Starting bundle upload");

        let config = match load_or_report(config_path) {
            Ok(config) => config,
            Err(code) => return Ok(code),
        };

        let source = match BundleSource::load(&self.file, config.identifiers.clone()) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Failed to read bundle: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let dry_run = self.dry_run || config.application.dry_run;
        if dry_run {
            println!("🔍 DRY RUN MODE - No resources will be created");
            println!();
        }

        if !self.yes && !dry_run {
            println!("Bundle Upload:");
            println!("  FHIR server: {}", config.fhir.base_url);
            println!("  File: {}", self.file.display());
            println!("  Resources: {}", source.resource_count());
            println!("  Mode: {:?}", self.mode);
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

        match self.mode {
            BundleMode::AsIs => match submit_as_is(repo.as_ref(), &source).await {
                Ok(outcome) => {
                    println!(
                        "✅ Bundle submitted: {} of {} entries succeeded",
                        outcome.succeeded, outcome.submitted
                    );
                    Ok(if outcome.succeeded == outcome.submitted {
                        EXIT_OK
                    } else {
                        EXIT_PARTIAL
                    })
                }
                Err(e) => {
                    crate::log_error_with_context!(e, "Bundle upload failed");
                    eprintln!("Bundle upload failed: {e}");
                    Ok(EXIT_FATAL)
                }
            },
            BundleMode::Cascade => {
                let summary = match CascadeUploader::new(repo.as_ref()).upload(&source).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        crate::log_error_with_context!(e, "Bundle upload failed");
                        eprintln!("Bundle upload failed: {e}");
                        return Ok(EXIT_FATAL);
                    }
                };
                summary.log_summary();
                print_upload_summary(&summary);
                Ok(upload_exit_code(&summary))
            }
        }
    }
}
