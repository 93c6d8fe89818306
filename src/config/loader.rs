//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{LinkPolicy, PurgeMode, SyncConfig};
use super::secret::secret_string;
use crate::domain::errors::SyncError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`SyncConfig`]
/// 4. Applies environment variable overrides (`FHIRSYNC_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`SyncError::Configuration`] if the file is missing or unreadable, a
/// referenced variable is unset, the TOML is invalid or validation fails.
///
/// # Examples
///
/// ```no_run
/// use fhirsync::config::loader::load_config;
///
/// let config = load_config("fhirsync.toml").expect("Failed to load config");
/// println!("{}", config.fhir.base_url);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<SyncConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(SyncError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        SyncError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut config: SyncConfig = toml::from_str(&contents)?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        SyncError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are copied unchanged.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| SyncError::Other(format!("Invalid substitution pattern: {e}")))?;
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let substituted = re.replace_all(line, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    String::new()
                }
            }
        });
        lines.push(substituted.into_owned());
    }

    if !missing_vars.is_empty() {
        return Err(SyncError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

/// Parses an override value, naming the variable on failure
fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        SyncError::Configuration(format!("Invalid value '{value}' for {name}"))
    })
}

/// Applies environment variable overrides using the `FHIRSYNC_*` prefix
///
/// Variables follow the pattern `FHIRSYNC_<SECTION>_<KEY>`, for example
/// `FHIRSYNC_FHIR_BASE_URL` or `FHIRSYNC_UPLOAD_BATCH_SIZE`.
fn apply_env_overrides(config: &mut SyncConfig) -> Result<()> {
    let var = |name: &str| std::env::var(name).ok();

    // Application overrides
    if let Some(val) = var("FHIRSYNC_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = var("FHIRSYNC_APPLICATION_DRY_RUN") {
        config.application.dry_run = parse_override("FHIRSYNC_APPLICATION_DRY_RUN", &val)?;
    }

    // FHIR server overrides
    if let Some(val) = var("FHIRSYNC_FHIR_BASE_URL") {
        config.fhir.base_url = val;
    }
    if let Some(val) = var("FHIRSYNC_FHIR_AUTH_TYPE") {
        config.fhir.auth_type = val;
    }
    if let Some(val) = var("FHIRSYNC_FHIR_ACCESS_TOKEN") {
        config.fhir.access_token = Some(secret_string(val));
    }
    if let Some(val) = var("FHIRSYNC_FHIR_USERNAME") {
        config.fhir.username = Some(val);
    }
    if let Some(val) = var("FHIRSYNC_FHIR_PASSWORD") {
        config.fhir.password = Some(secret_string(val));
    }
    if let Some(val) = var("FHIRSYNC_FHIR_TLS_VERIFY") {
        config.fhir.tls_verify = parse_override("FHIRSYNC_FHIR_TLS_VERIFY", &val)?;
    }
    if let Some(val) = var("FHIRSYNC_FHIR_TIMEOUT_SECONDS") {
        config.fhir.timeout_seconds = parse_override("FHIRSYNC_FHIR_TIMEOUT_SECONDS", &val)?;
    }

    // Upload overrides
    if let Some(val) = var("FHIRSYNC_UPLOAD_BATCH_SIZE") {
        config.upload.batch_size = parse_override("FHIRSYNC_UPLOAD_BATCH_SIZE", &val)?;
    }
    if let Some(val) = var("FHIRSYNC_UPLOAD_LINK_POLICY") {
        config.upload.link_policy = match val.as_str() {
            "per_field" => LinkPolicy::PerField,
            "all_required" => LinkPolicy::AllRequired,
            other => {
                return Err(SyncError::Configuration(format!(
                    "Invalid value '{other}' for FHIRSYNC_UPLOAD_LINK_POLICY"
                )))
            }
        };
    }
    if let Some(val) = var("FHIRSYNC_UPLOAD_SUBMIT_INCOMPLETE") {
        config.upload.submit_incomplete =
            parse_override("FHIRSYNC_UPLOAD_SUBMIT_INCOMPLETE", &val)?;
    }

    // Purge overrides
    if let Some(val) = var("FHIRSYNC_PURGE_MODE") {
        config.purge.mode = match val.as_str() {
            "windowed" => PurgeMode::Windowed,
            "accumulate" => PurgeMode::Accumulate,
            other => {
                return Err(SyncError::Configuration(format!(
                    "Invalid value '{other}' for FHIRSYNC_PURGE_MODE"
                )))
            }
        };
    }
    if let Some(val) = var("FHIRSYNC_PURGE_BATCH_SIZE") {
        config.purge.batch_size = parse_override("FHIRSYNC_PURGE_BATCH_SIZE", &val)?;
    }

    // Logging overrides
    if let Some(val) = var("FHIRSYNC_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = parse_override("FHIRSYNC_LOGGING_LOCAL_ENABLED", &val)?;
    }
    if let Some(val) = var("FHIRSYNC_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("FHIRSYNC_LOADER_TEST_TOKEN", "tok-1");
        let input = "access_token = \"${FHIRSYNC_LOADER_TEST_TOKEN}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "access_token = \"tok-1\"");
        std::env::remove_var("FHIRSYNC_LOADER_TEST_TOKEN");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("FHIRSYNC_LOADER_MISSING");
        let input = "password = \"${FHIRSYNC_LOADER_MISSING}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("FHIRSYNC_LOADER_MISSING"));
    }

    #[test]
    fn test_substitute_env_vars_skips_comments() {
        std::env::remove_var("FHIRSYNC_LOADER_COMMENTED");
        let input = "# token = \"${FHIRSYNC_LOADER_COMMENTED}\"\nbatch_size = 10";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("${FHIRSYNC_LOADER_COMMENTED}"));
    }

    #[test]
    fn test_parse_override_reports_variable() {
        let err = parse_override::<usize>("FHIRSYNC_UPLOAD_BATCH_SIZE", "many").unwrap_err();
        assert!(err.to_string().contains("FHIRSYNC_UPLOAD_BATCH_SIZE"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent.toml");
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
environment = "staging"

[application]
log_level = "debug"

[fhir]
base_url = "https://fhir.example.com/r4"
auth_type = "basic"
username = "sync"
password = "secret"

[upload]
batch_size = 250
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.fhir.base_url, "https://fhir.example.com/r4");
        assert_eq!(config.upload.batch_size, 250);
    }

    #[test]
    fn test_load_config_invalid_batch_size() {
        let toml_content = r#"
[fhir]
base_url = "https://fhir.example.com/r4"

[upload]
batch_size = 0
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("upload.batch_size"));
    }
}
