//! Conversion between [`Record`]s and FHIR resource JSON
//!
//! Used only at the repository boundary: sources decode resources into records,
//! and the uploader encodes linked records back into resources.

use crate::domain::ids::BusinessKey;
use crate::domain::{Record, Reference, ResourceKind, Result, SyncError};
use serde_json::{json, Map, Value};

/// Elements carried as typed fields on [`Record`] instead of in its content
const REFERENCE_ELEMENTS: [&str; 3] = ["subject", "encounter", "result"];

/// Encodes a record as a FHIR resource
///
/// Resolved references become `{Type}/{id}`; unresolved ones keep their
/// business key as the reference string.
pub fn encode_record(record: &Record) -> Value {
    let mut resource = Map::new();
    resource.insert(
        "resourceType".to_string(),
        Value::String(record.kind.resource_type().to_string()),
    );
    for (name, value) in &record.content {
        resource.insert(name.clone(), value.clone());
    }

    if let Some(subject) = &record.subject {
        resource.insert(
            "subject".to_string(),
            encode_reference(subject, ResourceKind::Patient),
        );
    }
    if let Some(encounter) = &record.encounter {
        resource.insert(
            "encounter".to_string(),
            encode_reference(encounter, ResourceKind::Encounter),
        );
    }
    if !record.results.is_empty() {
        let results = record
            .results
            .iter()
            .map(|r| encode_reference(r, ResourceKind::Observation))
            .collect();
        resource.insert("result".to_string(), Value::Array(results));
    }

    Value::Object(resource)
}

fn encode_reference(reference: &Reference, kind: ResourceKind) -> Value {
    let mut value = json!({ "reference": reference.reference_string(kind) });
    if let Some(display) = &reference.display {
        value["display"] = Value::String(display.clone());
    }
    value
}

/// Decodes a FHIR resource into a record
///
/// The business key is the value of the first identifier whose system equals
/// `identifier_system`. Reference strings are kept verbatim as business keys.
///
/// # Errors
///
/// Returns [`SyncError::Validation`] if the resource is not an object, has an
/// unsupported `resourceType`, or a reference element is malformed.
pub fn decode_record(resource: Value, identifier_system: &str) -> Result<Record> {
    let Value::Object(mut content) = resource else {
        return Err(SyncError::Validation("Resource is not a JSON object".to_string()));
    };

    let resource_type = content
        .remove("resourceType")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| SyncError::Validation("Resource has no resourceType".to_string()))?;
    let kind = ResourceKind::from_resource_type(&resource_type).ok_or_else(|| {
        SyncError::Validation(format!("Unsupported resource type: {resource_type}"))
    })?;

    let mut record = Record::new(kind);

    if let Some(id) = content.remove("id").as_ref().and_then(Value::as_str) {
        record.local_id = Some(id.to_string());
    }
    content.remove("meta");

    record.business_key = content
        .get("identifier")
        .and_then(Value::as_array)
        .and_then(|identifiers| {
            identifiers.iter().find(|identifier| {
                identifier.get("system").and_then(Value::as_str) == Some(identifier_system)
            })
        })
        .and_then(|identifier| identifier.get("value").and_then(Value::as_str))
        .and_then(|value| BusinessKey::new(value).ok());

    for element in REFERENCE_ELEMENTS {
        let Some(value) = content.remove(element) else {
            continue;
        };
        match element {
            "subject" => record.subject = Some(decode_reference(element, &value)?),
            "encounter" => record.encounter = Some(decode_reference(element, &value)?),
            _ => {
                let items = value.as_array().ok_or_else(|| {
                    SyncError::Validation(format!("{resource_type}.result must be an array"))
                })?;
                record.results = items
                    .iter()
                    .map(|item| decode_reference(element, item))
                    .collect::<Result<_>>()?;
            }
        }
    }

    record.content = content;
    Ok(record)
}

fn decode_reference(element: &str, value: &Value) -> Result<Reference> {
    let reference = value
        .get("reference")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Validation(format!("{element} has no reference string")))?;
    let key = BusinessKey::new(reference)
        .map_err(|e| SyncError::Validation(format!("{element}: {e}")))?;
    let mut decoded = Reference::business_key(key);
    decoded.display = value
        .get("display")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(decoded)
}

/// Display hint for a resource
///
/// Only patients have one: the first name's `text`, or its given names and
/// family name joined by spaces.
pub fn display_for(kind: ResourceKind, resource: &Value) -> Option<String> {
    if kind != ResourceKind::Patient {
        return None;
    }
    let name = resource.get("name")?.as_array()?.first()?;
    if let Some(text) = name.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let mut parts: Vec<&str> = name
        .get("given")
        .and_then(Value::as_array)
        .map(|given| given.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if let Some(family) = name.get("family").and_then(Value::as_str) {
        parts.push(family);
    }
    let display = parts.join(" ");
    (!display.trim().is_empty()).then_some(display)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::RemoteId;

    const SYSTEM: &str = "urn:oid:2.16.840.1.113883.3.552";

    fn key(value: &str) -> BusinessKey {
        BusinessKey::new(value).unwrap()
    }

    #[test]
    fn test_encode_observation_with_references() {
        let mut record = Record::new(ResourceKind::Observation)
            .with_subject(key("P1"))
            .with_encounter(key("E1"))
            .with_content("status", json!("final"));
        record.subject = Some(Reference::remote(
            RemoteId::new("17").unwrap(),
            Some("Jane Doe".to_string()),
        ));

        let resource = encode_record(&record);
        assert_eq!(resource["resourceType"], "Observation");
        assert_eq!(resource["status"], "final");
        assert_eq!(
            resource["subject"],
            json!({"reference": "Patient/17", "display": "Jane Doe"})
        );
        assert_eq!(resource["encounter"], json!({"reference": "E1"}));
        assert!(resource.get("result").is_none());
    }

    #[test]
    fn test_encode_report_results() {
        let record = Record::new(ResourceKind::DiagnosticReport)
            .with_result(key("O1"))
            .with_result(key("O2"));

        let resource = encode_record(&record);
        assert_eq!(
            resource["result"],
            json!([{"reference": "O1"}, {"reference": "O2"}])
        );
    }

    #[test]
    fn test_decode_encounter() {
        let record = decode_record(
            json!({
                "resourceType": "Encounter",
                "id": "enc-1",
                "meta": {"versionId": "1"},
                "identifier": [
                    {"system": "urn:other", "value": "X"},
                    {"system": SYSTEM, "value": "E1"}
                ],
                "status": "finished",
                "subject": {"reference": "urn:uuid:pat-1", "display": "John Smith"}
            }),
            SYSTEM,
        )
        .unwrap();

        assert_eq!(record.kind, ResourceKind::Encounter);
        assert_eq!(record.local_id.as_deref(), Some("enc-1"));
        assert_eq!(record.business_key, Some(key("E1")));
        let subject = record.subject.as_ref().unwrap();
        assert_eq!(subject.pending_key(), Some(&key("urn:uuid:pat-1")));
        assert_eq!(subject.display.as_deref(), Some("John Smith"));
        assert!(record.content.contains_key("status"));
        assert!(!record.content.contains_key("meta"));
        assert!(!record.content.contains_key("subject"));
    }

    #[test]
    fn test_decode_without_matching_identifier() {
        let record = decode_record(
            json!({"resourceType": "Patient", "identifier": [{"system": "urn:x", "value": "1"}]}),
            SYSTEM,
        )
        .unwrap();
        assert!(record.business_key.is_none());
    }

    #[test]
    fn test_decode_rejects_unsupported_type() {
        let err = decode_record(json!({"resourceType": "Claim"}), SYSTEM).unwrap_err();
        assert!(err.to_string().contains("Unsupported resource type: Claim"));
    }

    #[test]
    fn test_decode_rejects_malformed_reference() {
        let err = decode_record(
            json!({"resourceType": "Observation", "subject": {"display": "nobody"}}),
            SYSTEM,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_decode_then_encode_keeps_content() {
        let resource = json!({
            "resourceType": "DiagnosticReport",
            "status": "final",
            "code": {"text": "CBC"},
            "subject": {"reference": "P1"},
            "result": [{"reference": "O1"}]
        });
        let record = decode_record(resource.clone(), SYSTEM).unwrap();
        assert_eq!(encode_record(&record), resource);
    }

    #[test]
    fn test_display_for_patient() {
        let patient = json!({
            "resourceType": "Patient",
            "name": [{"family": "Doe", "given": ["Jane", "Q"]}]
        });
        assert_eq!(
            display_for(ResourceKind::Patient, &patient).as_deref(),
            Some("Jane Q Doe")
        );

        let with_text = json!({"name": [{"text": "Dr. Who", "family": "Who"}]});
        assert_eq!(
            display_for(ResourceKind::Patient, &with_text).as_deref(),
            Some("Dr. Who")
        );

        assert!(display_for(ResourceKind::Patient, &json!({})).is_none());
        assert!(display_for(ResourceKind::Encounter, &patient).is_none());
    }
}
