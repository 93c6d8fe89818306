//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for fhirsync using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// fhirsync - batch loader and purger for FHIR servers
#[derive(Parser, Debug)]
#[command(name = "fhirsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "fhirsync.toml", env = "FHIRSYNC_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "FHIRSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload TSV records kind by kind as create transactions
    Upload(commands::upload::UploadArgs),

    /// Upload a FHIR Bundle file
    UploadBundle(commands::bundle::UploadBundleArgs),

    /// Delete every resource of the selected kinds
    Purge(commands::purge::PurgeArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),
}
