//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the fhirsync configuration file.

use super::{EXIT_CONFIG, EXIT_OK};
use crate::config::load_config;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates after substitution and overrides
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Environment: {:?}", config.environment);
        println!("  Log Level: {}", config.application.log_level);
        println!("  Dry Run: {}", config.application.dry_run);
        println!("  FHIR Server: {}", config.fhir.base_url);
        println!("  Auth Type: {}", config.fhir.auth_type);
        println!("  TLS Verify: {}", config.fhir.tls_verify);
        println!("  Upload Order: {:?}", config.upload.order);
        println!("  Upload Batch Size: {}", config.upload.batch_size);
        for (kind, size) in &config.upload.batch_size_overrides {
            println!("    {kind}: {size}");
        }
        println!("  Link Policy: {:?}", config.upload.link_policy);
        println!("  Purge Mode: {:?}", config.purge.mode);
        println!("  Purge Batch Size: {}", config.purge.batch_size);
        println!();
        Ok(EXIT_OK)
    }
}
