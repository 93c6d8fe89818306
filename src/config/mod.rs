//! Configuration management for fhirsync.
//!
//! TOML configuration with `${VAR_NAME}` substitution, `FHIRSYNC_*` environment
//! overrides, defaults for every optional setting and validation on load.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fhirsync::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("fhirsync.toml")?;
//!
//! println!("FHIR server: {}", config.fhir.base_url);
//! println!("Batch size: {}", config.upload.batch_size);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - log level, dry run
//! - [`FhirConfig`] - server URL, authentication, TLS, timeout and read retries
//! - [`IdentifierConfig`] - identifier system per resource kind
//! - [`UploadConfig`] - batch sizes, kind order, link policy
//! - [`PurgeConfig`] - delete mode, batch size, page size, kinds
//! - [`LoggingConfig`] - optional JSON log files
//!
//! # Example Configuration
//!
//! ```toml
//! environment = "production"
//!
//! [application]
//! log_level = "info"
//!
//! [fhir]
//! base_url = "https://fhir.example.com/r4"
//! auth_type = "bearer"
//! access_token = "${FHIR_ACCESS_TOKEN}"
//!
//! [upload]
//! batch_size = 500
//! order = ["patient", "encounter", "observation", "diagnostic_report"]
//!
//! [upload.batch_size_overrides]
//! diagnostic_report = 1
//!
//! [purge]
//! mode = "windowed"
//! batch_size = 250
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::load_config;
pub use schema::{
    ApplicationConfig, Environment, FhirConfig, IdentifierConfig, LinkPolicy, LoggingConfig,
    PurgeConfig, PurgeMode, RetryConfig, SyncConfig, UploadConfig,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
