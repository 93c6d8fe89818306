//! Domain models and types for fhirsync.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`BusinessKey`], [`RemoteId`], [`PageCursor`])
//! - **Resource kinds** ([`ResourceKind`]) in their dependency order
//! - **Records** ([`Record`]) with typed reference fields
//! - **Error types** ([`SyncError`], [`RepositoryError`], [`ParseError`])
//! - **Result type alias** ([`Result`])
//!
//! # Type Safety
//!
//! A reference holds either a business key or a remote id, never a bare string:
//!
//! ```rust
//! use fhirsync::domain::{BusinessKey, Record, ResourceKind};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let observation = Record::new(ResourceKind::Observation)
//!     .with_business_key(BusinessKey::new("OBS-1")?)
//!     .with_subject(BusinessKey::new("P1")?)
//!     .with_encounter(BusinessKey::new("E1")?);
//!
//! assert_eq!(observation.reference_fields().len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod ids;
pub mod kind;
pub mod record;
pub mod result;

// Re-export commonly used types for convenience
pub use errors::{ParseError, RepositoryError, SyncError};
pub use ids::{BusinessKey, PageCursor, RemoteId};
pub use kind::ResourceKind;
pub use record::{Record, Reference, ReferenceField, ReferenceTarget};
pub use result::Result;
