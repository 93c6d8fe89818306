//! CLI command implementations
//!
//! Exit codes: 0 success, 1 partial failure, 2 configuration error,
//! 4 connection error, 5 fatal error.

pub mod bundle;
pub mod purge;
pub mod upload;
pub mod validate;

use crate::adapters::fhir::{build_repository, RemoteRepository};
use crate::config::{load_config, SyncConfig};
use crate::core::upload::UploadSummary;
use std::io::{self, Write};
use std::sync::Arc;

pub(crate) const EXIT_OK: i32 = 0;
pub(crate) const EXIT_PARTIAL: i32 = 1;
pub(crate) const EXIT_CONFIG: i32 = 2;
pub(crate) const EXIT_CONNECTION: i32 = 4;
pub(crate) const EXIT_FATAL: i32 = 5;

/// Loads the configuration, printing the error on failure
pub(crate) fn load_or_report(config_path: &str) -> Result<SyncConfig, i32> {
    load_config(config_path).map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        eprintln!("Failed to load configuration: {e}");
        EXIT_CONFIG
    })
}

/// Builds the repository, printing the error on failure
pub(crate) fn connect_or_report(
    config: &SyncConfig,
    dry_run: bool,
) -> Result<Arc<dyn RemoteRepository>, i32> {
    build_repository(config, dry_run).map_err(|e| {
        tracing::error!(error = %e, "Failed to create FHIR client");
        eprintln!("Failed to connect to FHIR server: {e}");
        EXIT_CONNECTION
    })
}

/// Asks for a y/N confirmation on stdin
pub(crate) fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

pub(crate) fn print_upload_summary(summary: &UploadSummary) {
    println!();
    println!("📊 Upload Summary:");
    for (kind, stats) in &summary.kinds {
        println!(
            "  {kind}: {} parsed, {} submitted, {} incomplete, {} skipped, {} windows ({} failed)",
            stats.parsed,
            stats.submitted,
            stats.incomplete,
            stats.skipped,
            stats.windows,
            stats.failed_windows
        );
    }
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());

    if !summary.parse_errors.is_empty() {
        println!();
        println!("⚠️  Rejected lines:");
        for error in summary.parse_errors.iter().take(10) {
            println!("  - {error}");
        }
        if summary.parse_errors.len() > 10 {
            println!("  ... and {} more", summary.parse_errors.len() - 10);
        }
    }

    if !summary.failures.is_empty() {
        println!();
        println!("⚠️  Failed submissions:");
        for failure in &summary.failures {
            println!(
                "  - {} window {} ({} records): {}",
                failure.label, failure.window_index, failure.size, failure.error
            );
        }
    }
    println!();
}

/// Exit code for a finished upload
pub(crate) fn upload_exit_code(summary: &UploadSummary) -> i32 {
    if summary.is_successful() {
        println!("✅ Upload completed successfully!");
        EXIT_OK
    } else {
        println!("⚠️  Upload completed with failures");
        EXIT_PARTIAL
    }
}
