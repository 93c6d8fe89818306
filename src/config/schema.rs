//! Configuration schema types
//!
//! This module defines the configuration structure for fhirsync.

use crate::config::SecretString;
use crate::domain::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Runtime environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment
    #[default]
    Development,
    /// Staging environment
    Staging,
    /// Production environment
    Production,
}

/// Main fhirsync configuration
///
/// This is the root configuration structure that maps to the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: Environment,

    /// FHIR server configuration
    pub fhir: FhirConfig,

    /// Identifier systems used for business-key lookups
    #[serde(default)]
    pub identifiers: IdentifierConfig,

    /// Upload settings
    #[serde(default)]
    pub upload: UploadConfig,

    /// Purge settings
    #[serde(default)]
    pub purge: PurgeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.fhir.validate(&self.environment)?;
        self.identifiers.validate()?;
        self.upload.validate()?;
        self.purge.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dry run mode (log writes instead of sending them)
    #[serde(default)]
    pub dry_run: bool,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
        }
    }
}

/// Retry configuration for read requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("fhir.retry.max_retries must be > 0".to_string());
        }
        if self.max_retries > 10 {
            return Err("fhir.retry.max_retries must be <= 10".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("fhir.retry.backoff_multiplier must be >= 1.0".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err("fhir.retry.initial_delay_ms must be <= max_delay_ms".to_string());
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// FHIR server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FhirConfig {
    /// Base URL of the FHIR server (e.g. `https://host/fhir`)
    pub base_url: String,

    /// Authentication type (none, bearer, basic)
    #[serde(default = "default_auth_type")]
    pub auth_type: String,

    /// Bearer access token (required if auth_type = bearer)
    /// Stored securely in memory and automatically zeroized on drop
    #[serde(default)]
    pub access_token: Option<SecretString>,

    /// Username for basic authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic authentication
    /// Stored securely in memory and automatically zeroized on drop
    #[serde(default)]
    pub password: Option<SecretString>,

    /// TLS certificate verification enabled
    ///
    /// **SECURITY WARNING**: Disabling TLS verification exposes the application to
    /// man-in-the-middle attacks. Validation rejects `false` in production.
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retry configuration (searches and page fetches only)
    #[serde(default)]
    pub retry: RetryConfig,
}

impl FhirConfig {
    fn validate(&self, environment: &Environment) -> Result<(), String> {
        use secrecy::ExposeSecret;

        if self.base_url.is_empty() {
            return Err("fhir.base_url cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("fhir.base_url must start with http:// or https://".to_string());
        }

        let valid_auth_types = ["none", "bearer", "basic"];
        if !valid_auth_types.contains(&self.auth_type.as_str()) {
            return Err(format!(
                "Invalid auth_type '{}'. Must be one of: {}",
                self.auth_type,
                valid_auth_types.join(", ")
            ));
        }

        if self.auth_type == "basic" {
            if self.username.as_ref().map(|s| s.is_empty()).unwrap_or(true) {
                return Err("fhir.username cannot be empty when auth_type is 'basic'".to_string());
            }

            if self
                .password
                .as_ref()
                .map(|s| s.expose_secret().is_empty())
                .unwrap_or(true)
            {
                return Err("fhir.password cannot be empty when auth_type is 'basic'".to_string());
            }
        }

        if self.auth_type == "bearer"
            && self
                .access_token
                .as_ref()
                .map(|s| s.expose_secret().is_empty())
                .unwrap_or(true)
        {
            return Err(
                "fhir.access_token cannot be empty when auth_type is 'bearer'".to_string(),
            );
        }

        if self.timeout_seconds == 0 {
            return Err("fhir.timeout_seconds must be > 0".to_string());
        }

        if *environment == Environment::Production && !self.tls_verify {
            return Err(
                "TLS certificate verification cannot be disabled in production environments. \
                Set 'tls_verify = true', or use environment = \"development\" or \"staging\" \
                for testing against self-signed servers."
                    .to_string(),
            );
        }

        self.retry.validate()
    }
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            auth_type: default_auth_type(),
            access_token: None,
            username: None,
            password: None,
            tls_verify: true,
            timeout_seconds: default_timeout_seconds(),
            retry: RetryConfig::default(),
        }
    }
}

/// Identifier systems used to search remote resources by business key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierConfig {
    /// System of patient identifiers
    #[serde(default = "default_record_system")]
    pub patient: String,

    /// System of encounter identifiers
    #[serde(default = "default_record_system")]
    pub encounter: String,

    /// System of observation identifiers
    #[serde(default = "default_observation_system")]
    pub observation: String,

    /// System of diagnostic report identifiers
    #[serde(default = "default_record_system")]
    pub diagnostic_report: String,
}

impl IdentifierConfig {
    /// Identifier system for a resource kind
    pub fn system_for(&self, kind: ResourceKind) -> &str {
        match kind {
            ResourceKind::Patient => &self.patient,
            ResourceKind::Encounter => &self.encounter,
            ResourceKind::Observation => &self.observation,
            ResourceKind::DiagnosticReport => &self.diagnostic_report,
        }
    }

    fn validate(&self) -> Result<(), String> {
        for kind in ResourceKind::ALL {
            let system = self.system_for(kind);
            if system.trim().is_empty() {
                return Err(format!(
                    "identifiers.{} cannot be empty",
                    kind.config_name()
                ));
            }
            if system.contains('|') {
                return Err(format!(
                    "identifiers.{} must not contain '|'",
                    kind.config_name()
                ));
            }
        }
        Ok(())
    }
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            patient: default_record_system(),
            encounter: default_record_system(),
            observation: default_observation_system(),
            diagnostic_report: default_record_system(),
        }
    }
}

/// How the linker treats a record whose references only partly resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkPolicy {
    /// Rewrite every field that resolves, leave the rest as business keys
    #[default]
    PerField,
    /// Rewrite nothing unless every required field resolves
    AllRequired,
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Records per create transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Kind processing order; each kind may only reference kinds before it
    #[serde(default = "default_order")]
    pub order: Vec<ResourceKind>,

    /// Link policy
    #[serde(default)]
    pub link_policy: LinkPolicy,

    /// Submit records whose required references did not resolve
    #[serde(default = "default_true")]
    pub submit_incomplete: bool,

    /// Per-kind batch size overrides
    #[serde(default = "default_batch_size_overrides")]
    pub batch_size_overrides: BTreeMap<ResourceKind, usize>,
}

impl UploadConfig {
    /// Effective batch size for a kind
    pub fn batch_size_for(&self, kind: ResourceKind) -> usize {
        self.batch_size_overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.batch_size)
    }

    fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("upload.batch_size must be >= 1".to_string());
        }

        if self.order.is_empty() {
            return Err("upload.order cannot be empty".to_string());
        }

        let mut seen = HashSet::new();
        for kind in &self.order {
            if !seen.insert(kind) {
                return Err(format!(
                    "upload.order lists '{}' more than once",
                    kind.config_name()
                ));
            }
        }

        for (kind, size) in &self.batch_size_overrides {
            if *size == 0 {
                return Err(format!(
                    "upload.batch_size_overrides.{} must be >= 1",
                    kind.config_name()
                ));
            }
        }

        Ok(())
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            order: default_order(),
            link_policy: LinkPolicy::default(),
            submit_incomplete: true,
            batch_size_overrides: default_batch_size_overrides(),
        }
    }
}

/// How drained entries are deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PurgeMode {
    /// Non-atomic batch deletes while draining, bounded working set
    #[default]
    Windowed,
    /// One transaction deleting everything after the drain
    Accumulate,
}

/// Purge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Delete mode
    #[serde(default)]
    pub mode: PurgeMode,

    /// Delete targets per batch in windowed mode
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Page size requested from the server (`_count`)
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Kinds to purge, dependants first
    #[serde(default = "default_purge_kinds")]
    pub kinds: Vec<ResourceKind>,
}

impl PurgeConfig {
    fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("purge.batch_size must be >= 1".to_string());
        }
        if self.page_size == Some(0) {
            return Err("purge.page_size must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            mode: PurgeMode::default(),
            batch_size: default_batch_size(),
            page_size: None,
            kinds: default_purge_kinds(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy (daily, hourly, never)
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }

        if self.local_enabled && self.local_path.trim().is_empty() {
            return Err("logging.local_path cannot be empty when local logging is enabled".to_string());
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_auth_type() -> String {
    "none".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_record_system() -> String {
    "urn:oid:2.16.840.1.113883.3.552".to_string()
}

fn default_observation_system() -> String {
    "https://fhir.cerner.com/ceuuid".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_order() -> Vec<ResourceKind> {
    ResourceKind::ALL.to_vec()
}

fn default_batch_size_overrides() -> BTreeMap<ResourceKind, usize> {
    BTreeMap::from([(ResourceKind::DiagnosticReport, 1)])
}

fn default_purge_kinds() -> Vec<ResourceKind> {
    ResourceKind::ALL.iter().rev().copied().collect()
}

fn default_local_path() -> String {
    "logs".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}
