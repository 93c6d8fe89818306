//! Tab-separated record files
//!
//! One file per kind with a header row. Column layouts:
//!
//! | file | columns |
//! |------|---------|
//! | `patients.tsv` | patient_id, family, given, gender, birth_date |
//! | `encounters.tsv` | encounter_id, patient_id, status, class_code, start, end |
//! | `observations.tsv` | observation_id, patient_id, encounter_id, status, code, code_display, value, unit, effective |
//! | `diagnostic_report.tsv` | report_id, patient_id, encounter_id, status, code, code_display, result_ids, issued |

use super::{ParseOutcome, RecordSource};
use crate::config::IdentifierConfig;
use crate::domain::ids::BusinessKey;
use crate::domain::{ParseError, Record, ResourceKind, Result};
use chrono::{DateTime, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};

const ACT_CODE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";
const GENDERS: [&str; 4] = ["male", "female", "other", "unknown"];

/// Directory holding one TSV file per kind
pub struct TsvDirectory {
    dir: PathBuf,
    identifiers: IdentifierConfig,
}

impl TsvDirectory {
    pub fn new(dir: impl Into<PathBuf>, identifiers: IdentifierConfig) -> Self {
        Self {
            dir: dir.into(),
            identifiers,
        }
    }

    /// Path of the file holding a kind
    pub fn path_for(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(kind.tsv_file_name())
    }
}

impl RecordSource for TsvDirectory {
    fn parse_all(&self, kind: ResourceKind) -> Result<ParseOutcome> {
        let path = self.path_for(kind);
        if !path.exists() {
            tracing::info!(path = %path.display(), kind = %kind, "No input file, skipping kind");
            return Ok(ParseOutcome::default());
        }
        let file = std::fs::File::open(&path)?;
        Ok(parse_tsv(kind, &display_name(&path), file, &self.identifiers))
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Parses TSV text of one kind
///
/// `name` labels parse errors. Line numbers are 1-based and count the header.
pub fn parse_tsv(
    kind: ResourceKind,
    name: &str,
    input: impl Read,
    identifiers: &IdentifierConfig,
) -> ParseOutcome {
    let system = identifiers.system_for(kind);
    match kind {
        ResourceKind::Patient => parse_rows(name, input, |row: PatientRow| row.into_record(system)),
        ResourceKind::Encounter => {
            parse_rows(name, input, |row: EncounterRow| row.into_record(system))
        }
        ResourceKind::Observation => {
            parse_rows(name, input, |row: ObservationRow| row.into_record(system))
        }
        ResourceKind::DiagnosticReport => {
            parse_rows(name, input, |row: ReportRow| row.into_record(system))
        }
    }
}

fn parse_rows<R, F>(name: &str, input: impl Read, convert: F) -> ParseOutcome
where
    R: DeserializeOwned,
    F: Fn(R) -> std::result::Result<Record, String>,
{
    let mut outcome = ParseOutcome::default();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            outcome
                .errors
                .push(ParseError::new(name, 1, format!("unreadable header: {e}")));
            return outcome;
        }
    };

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                outcome.errors.push(ParseError::new(name, line, e.to_string()));
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        if row.iter().all(str::is_empty) {
            continue;
        }

        let parsed = row
            .deserialize::<R>(Some(&headers))
            .map_err(|e| deserialize_message(&e))
            .and_then(&convert);
        match parsed {
            Ok(record) => outcome.records.push(record),
            Err(message) => outcome.errors.push(ParseError::new(name, line, message)),
        }
    }

    tracing::debug!(
        file = name,
        records = outcome.records.len(),
        errors = outcome.errors.len(),
        "Parsed TSV file"
    );
    outcome
}

fn deserialize_message(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
        _ => err.to_string(),
    }
}

fn key(value: &str, column: &str) -> std::result::Result<BusinessKey, String> {
    BusinessKey::new(value).map_err(|_| format!("column '{column}' is empty"))
}

fn identifier(system: &str, value: &BusinessKey) -> Value {
    json!([{ "system": system, "value": value.as_str() }])
}

fn check_date(value: &str, column: &str) -> std::result::Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| format!("column '{column}' is not a YYYY-MM-DD date: '{value}'"))
}

/// Accepts a date or an RFC 3339 date-time
fn check_date_time(value: &str, column: &str) -> std::result::Result<(), String> {
    if DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
    {
        Ok(())
    } else {
        Err(format!("column '{column}' is not a date or date-time: '{value}'"))
    }
}

fn codeable_concept(code: &str, display: Option<&str>) -> Value {
    let mut coding = json!({ "code": code });
    if let Some(display) = display {
        coding["display"] = json!(display);
    }
    let mut concept = json!({ "coding": [coding] });
    if let Some(display) = display {
        concept["text"] = json!(display);
    }
    concept
}

#[derive(Debug, Deserialize)]
struct PatientRow {
    patient_id: String,
    family: Option<String>,
    given: Option<String>,
    gender: Option<String>,
    birth_date: Option<String>,
}

impl PatientRow {
    fn into_record(self, system: &str) -> std::result::Result<Record, String> {
        let business_key = key(&self.patient_id, "patient_id")?;

        let mut name = json!({});
        if let Some(family) = &self.family {
            name["family"] = json!(family);
        }
        if let Some(given) = &self.given {
            name["given"] = json!(given.split_whitespace().collect::<Vec<_>>());
        }

        let mut record = Record::new(ResourceKind::Patient)
            .with_content("identifier", identifier(system, &business_key));
        if name.as_object().map(|n| !n.is_empty()).unwrap_or(false) {
            record = record.with_content("name", json!([name]));
        }
        if let Some(gender) = self.gender {
            let gender = gender.to_lowercase();
            if !GENDERS.contains(&gender.as_str()) {
                return Err(format!("unknown gender '{gender}'"));
            }
            record = record.with_content("gender", json!(gender));
        }
        if let Some(birth_date) = self.birth_date {
            check_date(&birth_date, "birth_date")?;
            record = record.with_content("birthDate", json!(birth_date));
        }
        Ok(record.with_business_key(business_key))
    }
}

#[derive(Debug, Deserialize)]
struct EncounterRow {
    encounter_id: String,
    patient_id: String,
    status: String,
    class_code: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

impl EncounterRow {
    fn into_record(self, system: &str) -> std::result::Result<Record, String> {
        let business_key = key(&self.encounter_id, "encounter_id")?;
        if self.status.is_empty() {
            return Err("column 'status' is empty".to_string());
        }

        let mut record = Record::new(ResourceKind::Encounter)
            .with_content("identifier", identifier(system, &business_key))
            .with_content("status", json!(self.status))
            .with_subject(key(&self.patient_id, "patient_id")?);
        if let Some(code) = self.class_code {
            record = record.with_content("class", json!({ "system": ACT_CODE_SYSTEM, "code": code }));
        }

        let mut period = serde_json::Map::new();
        if let Some(start) = self.start {
            check_date_time(&start, "start")?;
            period.insert("start".to_string(), json!(start));
        }
        if let Some(end) = self.end {
            check_date_time(&end, "end")?;
            period.insert("end".to_string(), json!(end));
        }
        if !period.is_empty() {
            record = record.with_content("period", Value::Object(period));
        }
        Ok(record.with_business_key(business_key))
    }
}

#[derive(Debug, Deserialize)]
struct ObservationRow {
    observation_id: String,
    patient_id: String,
    encounter_id: Option<String>,
    status: String,
    code: String,
    code_display: Option<String>,
    value: Option<String>,
    unit: Option<String>,
    effective: Option<String>,
}

impl ObservationRow {
    fn into_record(self, system: &str) -> std::result::Result<Record, String> {
        let business_key = key(&self.observation_id, "observation_id")?;
        if self.code.is_empty() {
            return Err("column 'code' is empty".to_string());
        }

        let mut record = Record::new(ResourceKind::Observation)
            .with_content("identifier", identifier(system, &business_key))
            .with_content("status", json!(self.status))
            .with_content(
                "code",
                codeable_concept(&self.code, self.code_display.as_deref()),
            )
            .with_subject(key(&self.patient_id, "patient_id")?);
        if let Some(encounter_id) = &self.encounter_id {
            record = record.with_encounter(key(encounter_id, "encounter_id")?);
        }

        match (self.value, self.unit) {
            // NaN and infinities have no JSON number form
            (Some(value), unit) => match value.parse::<f64>().ok().filter(|n| n.is_finite()) {
                Some(number) => {
                    let mut quantity = json!({ "value": number });
                    if let Some(unit) = unit {
                        quantity["unit"] = json!(unit);
                    }
                    record = record.with_content("valueQuantity", quantity);
                }
                None => record = record.with_content("valueString", json!(value)),
            },
            (None, Some(_)) => return Err("column 'unit' is set without a value".to_string()),
            (None, None) => {}
        }

        if let Some(effective) = self.effective {
            check_date_time(&effective, "effective")?;
            record = record.with_content("effectiveDateTime", json!(effective));
        }
        Ok(record.with_business_key(business_key))
    }
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    report_id: String,
    patient_id: String,
    encounter_id: Option<String>,
    status: String,
    code: String,
    code_display: Option<String>,
    result_ids: Option<String>,
    issued: Option<String>,
}

impl ReportRow {
    fn into_record(self, system: &str) -> std::result::Result<Record, String> {
        let business_key = key(&self.report_id, "report_id")?;
        if self.code.is_empty() {
            return Err("column 'code' is empty".to_string());
        }

        let mut record = Record::new(ResourceKind::DiagnosticReport)
            .with_content("identifier", identifier(system, &business_key))
            .with_content("status", json!(self.status))
            .with_content(
                "code",
                codeable_concept(&self.code, self.code_display.as_deref()),
            )
            .with_subject(key(&self.patient_id, "patient_id")?);
        if let Some(encounter_id) = &self.encounter_id {
            record = record.with_encounter(key(encounter_id, "encounter_id")?);
        }
        if let Some(result_ids) = &self.result_ids {
            for id in result_ids
                .split([';', ','])
                .map(str::trim)
                .filter(|id| !id.is_empty())
            {
                record = record.with_result(key(id, "result_ids")?);
            }
        }
        if let Some(issued) = self.issued {
            check_date_time(&issued, "issued")?;
            record = record.with_content("issued", json!(issued));
        }
        Ok(record.with_business_key(business_key))
    }
}
