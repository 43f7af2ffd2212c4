//! Raw NVD record -> [`CveRecord`]
//!
//! A fixed projection: identifier, source identifier, published/modified
//! timestamps, status, tags, descriptions, metrics, weaknesses,
//! configurations and references (reduced to `{url, source}`). Everything
//! else the source sends is dropped.
//!
//! Only the identifier is mandatory. Optional fields that are missing or do
//! not have the expected shape come out empty rather than failing the record.

use chrono::{DateTime, Utc};
use cvedb_common::types::{parse_nvd_timestamp, CveRecord, Metrics, Reference};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{IngestError, Result};

/// Transform one raw record (the object under `vulnerabilities[].cve`).
pub fn transform(raw: &Value) -> Result<CveRecord> {
    let obj = raw
        .as_object()
        .ok_or_else(|| IngestError::TransformInvalid("record is not an object".into()))?;

    let id = match obj.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(_) => return Err(IngestError::TransformInvalid("'id' is not a usable string".into())),
        None => return Err(IngestError::TransformInvalid("missing 'id'".into())),
    };

    Ok(CveRecord {
        source_identifier: string_field(obj, "sourceIdentifier"),
        published: timestamp_field(&id, obj, "published"),
        last_modified: timestamp_field(&id, obj, "lastModified"),
        vuln_status: string_field(obj, "vulnStatus"),
        cve_tags: list_field(&id, obj, "cveTags"),
        descriptions: list_field(&id, obj, "descriptions"),
        metrics: typed_field::<Metrics>(&id, obj, "metrics").unwrap_or_default(),
        weaknesses: list_field(&id, obj, "weaknesses"),
        configurations: list_field(&id, obj, "configurations"),
        references: references(obj),
        id,
    })
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn timestamp_field(id: &str, obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = obj.get(key)?.as_str()?;
    match parse_nvd_timestamp(raw) {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!(cve_id = %id, field = key, error = %e, "Dropping unparseable timestamp");
            None
        },
    }
}

fn typed_field<T: DeserializeOwned>(id: &str, obj: &Map<String, Value>, key: &str) -> Option<T> {
    let value = obj.get(key).filter(|v| !v.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(cve_id = %id, field = key, error = %e, "Dropping field with unexpected shape");
            None
        },
    }
}

/// A list field; elements that do not match the expected shape are dropped
/// individually so one odd entry does not discard its siblings.
fn list_field<T: DeserializeOwned>(id: &str, obj: &Map<String, Value>, key: &str) -> Vec<T> {
    let Some(items) = obj.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(cve_id = %id, field = key, error = %e, "Dropping list entry");
                None
            },
        })
        .collect()
}

fn references(obj: &Map<String, Value>) -> Vec<Reference> {
    let Some(items) = obj.get("references").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| Reference {
            url: string_field(item, "url"),
            source: string_field(item, "source"),
        })
        .collect()
}
