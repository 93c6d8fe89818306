//! Reference resolution
//!
//! - [`cache`] - per-run memo of resolved identities
//! - [`resolver`] - cache-first lookup by business identifier

pub mod cache;
pub mod resolver;

pub use cache::{ReferenceCache, ResolvedReference};
pub use resolver::{ReferenceResolver, Resolution};
