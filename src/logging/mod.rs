//! Logging and observability
//!
//! Structured logging through `tracing`: human-readable console output plus
//! optional JSON log files with rotation.
//!
//! # Example
//!
//! ```no_run
//! use fhirsync::logging::init_logging;
//! use fhirsync::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(kind = "Patient", "Upload started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log a submitted window
///
/// # Example
///
/// ```no_run
/// use fhirsync::log_batch_submitted;
///
/// log_batch_submitted!("Observation", 3, 250);
/// ```
#[macro_export]
macro_rules! log_batch_submitted {
    ($resource_type:expr, $window:expr, $size:expr) => {
        tracing::info!(
            resource_type = %$resource_type,
            window = $window,
            batch_size = $size,
            "Batch submitted"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use fhirsync::log_error_with_context;
/// use fhirsync::domain::SyncError;
///
/// let error = SyncError::Submission("422 Unprocessable Entity".to_string());
/// log_error_with_context!(&error, "Transaction rejected");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use fhirsync::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, 2000u64, "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $delay_ms:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            delay_ms = $delay_ms,
            reason = %$reason,
            "Retrying request"
        );
    };
}
