//! Resource kinds handled by the synchronization engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of a clinical record
///
/// The declaration order is also the default dependency order: every kind may only
/// reference kinds declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Patient demographics
    Patient,
    /// Encounter of a patient with a care provider
    Encounter,
    /// Single measurement or finding
    Observation,
    /// Report grouping observations
    DiagnosticReport,
}

impl ResourceKind {
    /// All kinds in default dependency order
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Patient,
        ResourceKind::Encounter,
        ResourceKind::Observation,
        ResourceKind::DiagnosticReport,
    ];

    /// FHIR resource type name (e.g. `DiagnosticReport`)
    pub fn resource_type(&self) -> &'static str {
        match self {
            ResourceKind::Patient => "Patient",
            ResourceKind::Encounter => "Encounter",
            ResourceKind::Observation => "Observation",
            ResourceKind::DiagnosticReport => "DiagnosticReport",
        }
    }

    /// Configuration name (e.g. `diagnostic_report`)
    pub fn config_name(&self) -> &'static str {
        match self {
            ResourceKind::Patient => "patient",
            ResourceKind::Encounter => "encounter",
            ResourceKind::Observation => "observation",
            ResourceKind::DiagnosticReport => "diagnostic_report",
        }
    }

    /// Looks up a kind by its FHIR resource type name
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.resource_type() == resource_type)
    }

    /// Default TSV file name used by directory uploads
    pub fn tsv_file_name(&self) -> &'static str {
        match self {
            ResourceKind::Patient => "patients.tsv",
            ResourceKind::Encounter => "encounters.tsv",
            ResourceKind::Observation => "observations.tsv",
            ResourceKind::DiagnosticReport => "diagnostic_report.tsv",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_type())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.config_name().eq_ignore_ascii_case(trimmed)
                    || kind.resource_type().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| {
                format!(
                    "Unknown resource kind '{trimmed}'. Must be one of: patient, encounter, observation, diagnostic_report"
                )
            })
    }
}
