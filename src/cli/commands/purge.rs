//! Purge command implementation
//!
//! Deletes every resource of the selected kinds, or of the resource types found
//! in a bundle file, dependants first.

use super::{
    confirm, connect_or_report, load_or_report, EXIT_CONFIG, EXIT_OK, EXIT_PARTIAL,
};
use crate::adapters::source::BundleSource;
use crate::config::{PurgeConfig, PurgeMode};
use crate::core::reap::{bundle_purge_order, dependants_first, DeleteMode, PagedReaper};
use crate::domain::ResourceKind;
use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// Delete mode on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Batch deletes while draining
    Windowed,
    /// One transaction after the drain
    Accumulate,
}

impl From<ModeArg> for PurgeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Windowed => PurgeMode::Windowed,
            ModeArg::Accumulate => PurgeMode::Accumulate,
        }
    }
}

/// Arguments for the purge command
#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Kinds to purge (comma-separated); defaults to the configured kinds
    #[arg(long, value_delimiter = ',', conflicts_with = "from_bundle")]
    pub kind: Vec<ResourceKind>,

    /// Delete mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Delete targets per batch in windowed mode
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Page size requested from the server
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Purge the resource types present in this bundle file
    #[arg(long)]
    pub from_bundle: Option<PathBuf>,

    /// Log deletes instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

impl PurgeArgs {
    /// Bundle purges are windowed unless accumulate is asked for on the command line
    fn bundle_delete_mode(&self, purge: &PurgeConfig) -> DeleteMode {
        match self.mode {
            Some(ModeArg::Accumulate) => DeleteMode::Accumulate,
            _ => DeleteMode::Windowed {
                batch_size: purge.batch_size,
            },
        }
    }

    /// Execute the purge command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Starting purge command");

        let mut config = match load_or_report(config_path) {
            Ok(config) => config,
            Err(code) => return Ok(code),
        };

        if let Some(mode) = self.mode {
            config.purge.mode = mode.into();
        }
        if let Some(batch_size) = self.batch_size {
            config.purge.batch_size = batch_size;
        }
        if self.page_size.is_some() {
            config.purge.page_size = self.page_size;
        }
        if let Err(e) = config.validate() {
            eprintln!("Configuration validation failed: {e}");
            return Ok(EXIT_CONFIG);
        }

        let (resource_types, mode) = match &self.from_bundle {
            Some(path) => {
                let source = match BundleSource::load(path, config.identifiers.clone()) {
                    Ok(source) => source,
                    Err(e) => {
                        eprintln!("Failed to read bundle: {e}");
                        return Ok(EXIT_CONFIG);
                    }
                };
                let types = bundle_purge_order(source.bundle());
                (types, self.bundle_delete_mode(&config.purge))
            }
            None => {
                let kinds = if self.kind.is_empty() {
                    config.purge.kinds.clone()
                } else {
                    self.kind.clone()
                };
                let types: Vec<String> = kinds
                    .iter()
                    .map(|k| k.resource_type().to_string())
                    .collect();
                (dependants_first(&types), DeleteMode::from_config(&config.purge))
            }
        };

        if resource_types.is_empty() {
            println!("Nothing to purge.");
            return Ok(EXIT_OK);
        }

        let dry_run = self.dry_run || config.application.dry_run;
        if dry_run {
            println!("🔍 DRY RUN MODE - No resources will be deleted");
            println!();
        }

        if !self.yes && !dry_run {
            println!("Purge Configuration:");
            println!("  FHIR server: {}", config.fhir.base_url);
            println!("  Resource types: {}", resource_types.join(", "));
            println!("  Mode: {mode:?}");
            println!();
            if !confirm("Delete ALL resources of these types?")? {
                println!("Purge cancelled.");
                return Ok(EXIT_OK);
            }
        }

        let repo = match connect_or_report(&config, dry_run) {
            Ok(repo) => repo,
            Err(code) => return Ok(code),
        };

        let reaper = PagedReaper::new(repo);
        let reports = reaper
            .purge_all(&resource_types, mode, config.purge.page_size)
            .await;

        println!();
        println!("📊 Purge Summary:");
        for report in &reports {
            report.log_summary();
            println!(
                "  {}: {} seen over {} pages, {} deleted in {} submissions",
                report.resource_type,
                report.entries_seen,
                report.pages_fetched,
                report.deleted,
                report.delete_submissions
            );
            if let Some(reason) = &report.halted {
                println!("    ⚠️  stopped early: {reason}");
            }
            for failure in &report.failures {
                println!(
                    "    ⚠️  window {} ({} entries): {}",
                    failure.window_index, failure.size, failure.error
                );
            }
        }
        println!();

        if reports.iter().all(|r| r.is_successful()) {
            println!("✅ Purge completed successfully!");
            Ok(EXIT_OK)
        } else {
            println!("⚠️  Purge completed with failures");
            Ok(EXIT_PARTIAL)
        }
    }
}
