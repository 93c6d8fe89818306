//! Result type alias
//!
//! Convenience alias that uses [`SyncError`] as the error type.

use super::errors::SyncError;

/// Result type alias for fhirsync operations
///
/// # Examples
///
/// ```
/// use fhirsync::domain::result::Result;
/// use fhirsync::domain::errors::SyncError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(SyncError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, SyncError>;
