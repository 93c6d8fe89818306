//! FHIR Bundle files

use super::{ParseOutcome, RecordSource};
use crate::adapters::fhir::codec::decode_record;
use crate::adapters::fhir::models::{resource_type_of, Bundle};
use crate::config::IdentifierConfig;
use crate::domain::{ParseError, ResourceKind, Result, SyncError};
use std::path::Path;

/// Bundle read from a JSON file
pub struct BundleSource {
    name: String,
    bundle: Bundle,
    identifiers: IdentifierConfig,
}

impl BundleSource {
    /// Reads and parses a bundle file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a Bundle.
    pub fn load(path: &Path, identifiers: IdentifierConfig) -> Result<Self> {
        if !path.exists() {
            return Err(SyncError::Io(format!(
                "Bundle file not found: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_json(&name, &contents, identifiers)
    }

    /// Parses bundle JSON text
    pub fn from_json(name: &str, json: &str, identifiers: IdentifierConfig) -> Result<Self> {
        let bundle: Bundle = serde_json::from_str(json)?;
        if bundle.resource_type != "Bundle" {
            return Err(SyncError::Validation(format!(
                "{name} is a {}, not a Bundle",
                bundle.resource_type
            )));
        }
        Ok(Self::new(name, bundle, identifiers))
    }

    pub fn new(name: impl Into<String>, bundle: Bundle, identifiers: IdentifierConfig) -> Self {
        Self {
            name: name.into(),
            bundle,
            identifiers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Distinct resource types in the bundle, in order of first appearance
    pub fn resource_types(&self) -> Vec<String> {
        self.bundle.resource_types()
    }

    /// Number of entries carrying a resource
    pub fn resource_count(&self) -> usize {
        self.bundle
            .entry
            .iter()
            .filter(|e| e.resource.is_some())
            .count()
    }
}

impl RecordSource for BundleSource {
    /// Entry positions (1-based) stand in for line numbers in parse errors.
    /// A record without a resource id takes the local part of its `fullUrl`.
    fn parse_all(&self, kind: ResourceKind) -> Result<ParseOutcome> {
        let system = self.identifiers.system_for(kind);
        let mut outcome = ParseOutcome::default();

        for (index, entry) in self.bundle.entry.iter().enumerate() {
            let Some(resource) = &entry.resource else {
                continue;
            };
            if resource_type_of(resource) != Some(kind.resource_type()) {
                continue;
            }
            match decode_record(resource.clone(), system) {
                Ok(mut record) => {
                    if record.local_id.is_none() {
                        record.local_id = entry.full_url.as_deref().map(|url| {
                            url.strip_prefix("urn:uuid:").unwrap_or(url).to_string()
                        });
                    }
                    outcome.records.push(record);
                }
                Err(e) => outcome.errors.push(ParseError::new(
                    self.name.as_str(),
                    index as u64 + 1,
                    e.to_string(),
                )),
            }
        }
        Ok(outcome)
    }
}
