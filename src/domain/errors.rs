//! Domain error types
//!
//! `SyncError` is the crate-wide error. Transport details are mapped into
//! `RepositoryError` so no HTTP client types leak out of the adapters.

use super::kind::ResourceKind;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote repository errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Malformed input row or document
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The lookup for a reference could not be performed
    ///
    /// Distinct from "no match": the remote state is unknown.
    #[error("Failed to resolve {kind} reference '{key}': {source}")]
    ResolutionTransport {
        kind: ResourceKind,
        key: String,
        source: RepositoryError,
    },

    /// A business key matched more than one remote resource
    #[error("Ambiguous {kind} reference '{key}': {matches} matching resources")]
    AmbiguousReference {
        kind: ResourceKind,
        key: String,
        matches: usize,
    },

    /// Create, transaction or delete submission failed
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The server returned a next-page cursor that was already followed
    #[error("Pagination stalled: cursor '{cursor}' was already followed")]
    PaginationStall { cursor: String },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// True for errors caused by the transport or the remote server
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Repository(_)
                | SyncError::ResolutionTransport { .. }
                | SyncError::Submission(_)
                | SyncError::PaginationStall { .. }
        )
    }
}

/// Remote repository errors
///
/// Errors that occur when talking to the FHIR server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Failed to connect to the server
    #[error("Failed to connect to FHIR server: {0}")]
    ConnectionFailed(String),

    /// Authentication failed (401/403)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Response could not be understood
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    /// Resource or page not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server error (5xx)
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Client error (4xx)
    #[error("Client error: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),
}

impl RepositoryError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RepositoryError::ConnectionFailed(_)
            | RepositoryError::Timeout(_)
            | RepositoryError::ServerError { .. } => true,
            RepositoryError::ClientError { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// A malformed input line or document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file} line {line}: {message}")]
pub struct ParseError {
    /// Input file or stream name
    pub file: String,

    /// 1-based line number (0 when unknown)
    pub line: u64,

    /// What was wrong
    pub message: String,
}

impl ParseError {
    /// Creates a new parse error
    pub fn new(file: impl Into<String>, line: u64, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Configuration(format!("TOML parse error: {err}"))
    }
}

// Conversion from csv reader errors that are not tied to a single row
impl From<csv::Error> for SyncError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            SyncError::Io(err.to_string())
        } else {
            SyncError::Serialization(err.to_string())
        }
    }
}
