//! Record sources
//!
//! A source turns input files into [`Record`]s, one resource kind at a time.
//! Malformed lines are collected as [`ParseError`]s next to the records that did
//! parse, so one bad line never stops the rest of a file.
//!
//! - [`tsv`] - tab-separated files, one per kind, in an input directory
//! - [`bundle`] - a FHIR Bundle JSON file

pub mod bundle;
pub mod tsv;

pub use bundle::BundleSource;
pub use tsv::TsvDirectory;

use crate::domain::{ParseError, Record, ResourceKind, Result};

/// Records of one kind parsed from a source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    /// Records in input order
    pub records: Vec<Record>,

    /// One entry per rejected line
    pub errors: Vec<ParseError>,
}

impl ParseOutcome {
    /// True if neither records nor errors were produced
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.errors.is_empty()
    }
}

/// Source of records to upload
pub trait RecordSource {
    /// Parses every record of a kind
    ///
    /// # Errors
    ///
    /// Returns an error only when the input cannot be read at all; malformed
    /// lines are reported in [`ParseOutcome::errors`].
    fn parse_all(&self, kind: ResourceKind) -> Result<ParseOutcome>;
}
