//! FHIR JSON to canonical lab results and patient records.

use labrisk_core::{LabResult, LabRiskError, LabStatus, PatientRecord, ReferenceRange, LAB_CATEGORY};
use serde_json::Value;

/// Above `high * CRITICAL_HIGH_FACTOR` a high value is critical.
pub const CRITICAL_HIGH_FACTOR: f64 = 1.5;
/// Below `low * CRITICAL_LOW_FACTOR` a low value is critical.
pub const CRITICAL_LOW_FACTOR: f64 = 0.5;

const MIMIC_PATIENT_IDENTIFIER: &str = "http://mimic.mit.edu/fhir/mimic/identifier/patient";

/// Read every Observation of a search Bundle from a JSON string.
pub fn lab_results_from_bundle_str(bundle_json: &str) -> Result<Vec<LabResult>, LabRiskError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| LabRiskError::Parse(err.to_string()))?;
    lab_results_from_bundle_value(&value)
}

/// Read every Observation of a search Bundle, keeping bundle order.
pub fn lab_results_from_bundle_value(bundle: &Value) -> Result<Vec<LabResult>, LabRiskError> {
    Ok(bundle_resources(bundle, "Observation")?
        .map(normalize_observation)
        .collect())
}

/// Read the Patient resources of a Bundle from a JSON string.
pub fn patients_from_bundle_str(bundle_json: &str) -> Result<Vec<PatientRecord>, LabRiskError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| LabRiskError::Parse(err.to_string()))?;
    patients_from_bundle_value(&value)
}

/// Read the Patient resources of a Bundle. Patients without an id are skipped.
pub fn patients_from_bundle_value(bundle: &Value) -> Result<Vec<PatientRecord>, LabRiskError> {
    Ok(bundle_resources(bundle, "Patient")?
        .filter_map(patient_record)
        .collect())
}

/// Convert one Observation resource into a `LabResult`.
pub fn normalize_observation(resource: &Value) -> LabResult {
    let quantity = resource.get("valueQuantity");
    let value = quantity.and_then(|q| q.get("value")).and_then(Value::as_f64);
    let unit = quantity
        .and_then(|q| q.get("unit"))
        .and_then(Value::as_str)
        .and_then(non_empty);

    let reference_range = resource
        .get("referenceRange")
        .and_then(Value::as_array)
        .and_then(|ranges| ranges.first())
        .map(parse_reference_range);

    let code = resource.get("code");

    LabResult {
        id: resource_id(resource, "observation"),
        code: code
            .and_then(first_coding)
            .and_then(|coding| coding.get("code"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: code
            .and_then(resolve_lab_name)
            .unwrap_or_else(|| "Unknown".to_string()),
        value,
        unit,
        status: classify_lab_status(value, reference_range.as_ref()),
        reference_range,
        effective_date_time: extract_effective(resource),
        category: LAB_CATEGORY.to_string(),
        interpretation: extract_interpretation(resource),
    }
}

/// Derive the lab status from a value and its reference range.
pub fn classify_lab_status(value: Option<f64>, range: Option<&ReferenceRange>) -> LabStatus {
    let (Some(value), Some(range)) = (value, range) else {
        return LabStatus::Normal;
    };

    if let Some(high) = range.high.filter(|high| value > *high) {
        return if value > high * CRITICAL_HIGH_FACTOR {
            LabStatus::Critical
        } else {
            LabStatus::Abnormal
        };
    }

    if let Some(low) = range.low.filter(|low| value < *low) {
        return if value < low * CRITICAL_LOW_FACTOR {
            LabStatus::Critical
        } else {
            LabStatus::Abnormal
        };
    }

    LabStatus::Normal
}

fn bundle_resources<'a>(
    bundle: &'a Value,
    resource_type: &'a str,
) -> Result<impl Iterator<Item = &'a Value> + 'a, LabRiskError> {
    let bundle_type = bundle
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or(LabRiskError::MissingData)?;

    if bundle_type != "Bundle" {
        return Err(LabRiskError::Parse(format!(
            "Expected resourceType Bundle, received {bundle_type}"
        )));
    }

    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(entries
        .iter()
        .filter_map(|entry| entry.get("resource"))
        .filter(move |resource| {
            resource.get("resourceType").and_then(Value::as_str) == Some(resource_type)
        }))
}

fn parse_reference_range(range: &Value) -> ReferenceRange {
    let bound = |field: &str| {
        range
            .get(field)
            .and_then(|quantity| quantity.get("value"))
            .and_then(Value::as_f64)
    };
    ReferenceRange {
        low: bound("low"),
        high: bound("high"),
        text: range
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn resolve_lab_name(code: &Value) -> Option<String> {
    if let Some(text) = code.get("text").and_then(Value::as_str).and_then(non_empty) {
        return Some(text);
    }
    first_coding(code)?
        .get("display")
        .and_then(Value::as_str)
        .and_then(non_empty)
}

fn first_coding(concept: &Value) -> Option<&Value> {
    concept.get("coding")?.as_array()?.first()
}

fn extract_interpretation(resource: &Value) -> Option<String> {
    let concept = resource.get("interpretation")?.as_array()?.first()?;
    first_coding(concept)
        .and_then(|coding| coding.get("display"))
        .and_then(Value::as_str)
        .and_then(non_empty)
        .or_else(|| concept.get("text").and_then(Value::as_str).and_then(non_empty))
}

fn extract_effective(resource: &Value) -> Option<String> {
    for field in ["effectiveDateTime", "effectiveInstant"] {
        if let Some(text) = resource.get(field).and_then(Value::as_str).and_then(non_empty) {
            return Some(text);
        }
    }

    let period = resource.get("effectivePeriod")?;
    ["end", "start"]
        .into_iter()
        .find_map(|field| period.get(field).and_then(Value::as_str).and_then(non_empty))
}

fn resource_id(resource: &Value, fallback: &str) -> String {
    resource
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{fallback}-unknown"))
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn patient_record(resource: &Value) -> Option<PatientRecord> {
    let id = resource.get("id").and_then(Value::as_str)?.to_string();
    let mimic_id = find_identifier(resource, |identifier| {
        identifier.get("system").and_then(Value::as_str) == Some(MIMIC_PATIENT_IDENTIFIER)
    });
    let mrn = find_identifier(resource, |identifier| {
        identifier
            .get("type")
            .and_then(first_coding)
            .and_then(|coding| coding.get("code"))
            .and_then(Value::as_str)
            == Some("MR")
    })
    .or_else(|| mimic_id.clone())
    .unwrap_or_else(|| "Unknown".to_string());

    Some(PatientRecord {
        name: patient_display_name(resource, mimic_id.as_deref()),
        birth_date: resource
            .get("birthDate")
            .and_then(Value::as_str)
            .map(str::to_string),
        gender: resource
            .get("gender")
            .and_then(Value::as_str)
            .map(str::to_string),
        id,
        mrn,
    })
}

fn patient_display_name(resource: &Value, mimic_id: Option<&str>) -> String {
    let first_name = resource
        .get("name")
        .and_then(Value::as_array)
        .and_then(|names| names.first());

    let Some(name) = first_name else {
        return match mimic_id {
            Some(identifier) => format!("Patient ID: {identifier}"),
            None => "Unknown Patient".to_string(),
        };
    };

    let given = name
        .get("given")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(Value::as_str)
        .unwrap_or("");
    let family = name.get("family").and_then(Value::as_str).unwrap_or("");

    // MIMIC exports use placeholder names such as `Patient_10000032`.
    if given.is_empty() {
        if let Some(suffix) = family.strip_prefix("Patient_") {
            return format!("Patient ID: {}", mimic_id.unwrap_or(suffix));
        }
    }

    let parts: Vec<&str> = [given, family]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        "Unknown Patient".to_string()
    } else {
        parts.join(" ")
    }
}

fn find_identifier(resource: &Value, predicate: impl Fn(&Value) -> bool) -> Option<String> {
    resource
        .get("identifier")?
        .as_array()?
        .iter()
        .find(|identifier| predicate(*identifier))
        .and_then(|identifier| identifier.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
