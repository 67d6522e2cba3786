//! Audit Assembler: turns raw engine output into an [`AuditRecord`].
//!
//! Engines disagree on key casing (`rowsBefore` vs `rows_before`) and on which
//! optional fields they emit. Required counts must be present and numeric;
//! everything else is defaulted. Keys the assembler does not recognise are
//! carried through untouched in `engine_specific_insights`.

use std::collections::BTreeMap;

use log::warn;
use serde_json::{Map, Value};
use thiserror::Error;

use super::record::{AuditRecord, ColumnHealth, ColumnProfile, SampleRow};
use crate::engine::RawResult;
use crate::job::EngineKind;

/// Upper bound on preview rows kept per sample.
pub const MAX_SAMPLE_ROWS: usize = 10;

const ROWS_BEFORE: [&str; 2] = ["rowsBefore", "rows_before"];
const ROWS_AFTER: [&str; 2] = ["rowsAfter", "rows_after"];
const DUPLICATES_REMOVED: [&str; 2] = ["duplicatesRemoved", "duplicates_removed"];
const EMPTY_ROWS_REMOVED: [&str; 2] = ["emptyRowsRemoved", "empty_rows_removed"];
const QUALITY_SCORE: [&str; 2] = ["qualityScore", "quality_score"];
const COLUMN_PROFILE: [&str; 2] = ["columnProfile", "column_profile"];
const SAMPLE_BEFORE: [&str; 2] = ["sampleBefore", "sample_before"];
const SAMPLE_AFTER: [&str; 2] = ["sampleAfter", "sample_after"];
const INSIGHTS: [&str; 2] = ["engineSpecificInsights", "engine_specific_insights"];

const CANONICAL_KEYS: [[&str; 2]; 9] = [
    ROWS_BEFORE,
    ROWS_AFTER,
    DUPLICATES_REMOVED,
    EMPTY_ROWS_REMOVED,
    QUALITY_SCORE,
    COLUMN_PROFILE,
    SAMPLE_BEFORE,
    SAMPLE_AFTER,
    INSIGHTS,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuditError {
    #[error("audit document is not a JSON object")]
    NotAnObject,

    #[error("required audit field '{field}' is missing")]
    MissingField { field: &'static str },

    #[error("audit field '{field}' is not a non-negative integer: {value}")]
    NotNumeric { field: &'static str, value: String },
}

/// Normalizes a raw engine result into the canonical audit record.
pub fn normalize(raw: &RawResult, engine_kind: EngineKind) -> Result<AuditRecord, AuditError> {
    let doc = raw.audit.as_object().ok_or(AuditError::NotAnObject)?;

    let rows_before = required_count(doc, ROWS_BEFORE)?;
    let rows_after = required_count(doc, ROWS_AFTER)?;
    let duplicates_removed = optional_count(doc, DUPLICATES_REMOVED);
    let empty_rows_removed = optional_count(doc, EMPTY_ROWS_REMOVED);
    let quality_score = quality_score(doc);

    let column_profile = lookup(doc, COLUMN_PROFILE)
        .and_then(Value::as_object)
        .map(column_profiles)
        .unwrap_or_default();

    let sample_before = samples(lookup(doc, SAMPLE_BEFORE));
    let sample_after = samples(lookup(doc, SAMPLE_AFTER));

    Ok(AuditRecord {
        rows_before,
        rows_after,
        duplicates_removed,
        empty_rows_removed,
        quality_score,
        column_profile,
        sample_before,
        sample_after,
        engine_kind,
        source: raw.source,
        engine_specific_insights: insights(doc),
    })
}

fn lookup<'a>(doc: &'a Map<String, Value>, keys: [&'static str; 2]) -> Option<&'a Value> {
    keys.iter().find_map(|k| doc.get(*k)).filter(|v| !v.is_null())
}

fn as_count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as u64)
}

fn required_count(doc: &Map<String, Value>, keys: [&'static str; 2]) -> Result<u64, AuditError> {
    let value = lookup(doc, keys).ok_or(AuditError::MissingField { field: keys[0] })?;
    as_count(value).ok_or_else(|| AuditError::NotNumeric {
        field: keys[0],
        value: value.to_string(),
    })
}

fn optional_count(doc: &Map<String, Value>, keys: [&'static str; 2]) -> u64 {
    match lookup(doc, keys) {
        None => 0,
        Some(value) => as_count(value).unwrap_or_else(|| {
            warn!("Ignoring non-numeric audit field '{}': {}", keys[0], value);
            0
        }),
    }
}

fn quality_score(doc: &Map<String, Value>) -> u8 {
    match lookup(doc, QUALITY_SCORE).and_then(Value::as_f64) {
        Some(score) if score.is_finite() => score.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

fn column_profiles(profiles: &Map<String, Value>) -> BTreeMap<String, ColumnProfile> {
    profiles
        .iter()
        .filter_map(|(name, entry)| {
            let entry = entry.as_object()?;
            Some((name.clone(), column_profile(entry)))
        })
        .collect()
}

fn column_profile(entry: &Map<String, Value>) -> ColumnProfile {
    let number = |keys: [&'static str; 2]| lookup(entry, keys).and_then(Value::as_f64);

    let null_pct = number(["nullPct", "null_pct"]).unwrap_or(0.0);
    let health = lookup(entry, ["health", "health"])
        .and_then(|v| serde_json::from_value::<ColumnHealth>(v.clone()).ok())
        .unwrap_or_else(|| ColumnHealth::from_null_pct(null_pct));

    ColumnProfile {
        column_type: lookup(entry, ["type", "dtype"])
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        null_pct,
        null_count: lookup(entry, ["nullCount", "null_count"]).and_then(as_count),
        unique_count: lookup(entry, ["uniqueCount", "unique_count"])
            .and_then(as_count)
            .unwrap_or(0),
        health,
        min: number(["min", "min"]),
        max: number(["max", "max"]),
        mean: number(["mean", "mean"]),
    }
}

fn samples(value: Option<&Value>) -> Vec<SampleRow> {
    value
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.as_object().cloned())
                .take(MAX_SAMPLE_ROWS)
                .collect()
        })
        .unwrap_or_default()
}

fn insights(doc: &Map<String, Value>) -> Map<String, Value> {
    let mut out: Map<String, Value> = lookup(doc, INSIGHTS)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (key, value) in doc {
        let canonical = CANONICAL_KEYS.iter().any(|keys| keys.contains(&key.as_str()));
        if !canonical {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}
