use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::EngineKind;

/// One preview row: column name to cell value.
pub type SampleRow = Map<String, Value>;

/// Where an audit came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditSource {
    /// Produced by a real processing run.
    Engine,
    /// Synthesized because the processing backend was unavailable.
    Fallback,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnHealth {
    Healthy,
    Warning,
    Critical,
}

impl ColumnHealth {
    /// 0% nulls is healthy, under 20% is a warning, anything else is critical.
    pub fn from_null_pct(null_pct: f64) -> Self {
        if null_pct <= 0.0 {
            ColumnHealth::Healthy
        } else if null_pct < 20.0 {
            ColumnHealth::Warning
        } else {
            ColumnHealth::Critical
        }
    }
}

/// Per-column profiling summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProfile {
    #[serde(rename = "type")]
    pub column_type: String,
    pub null_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_count: Option<u64>,
    pub unique_count: u64,
    pub health: ColumnHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

/// Canonical audit committed alongside a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub rows_before: u64,
    /// Expected to be <= `rows_before`, not enforced.
    pub rows_after: u64,
    pub duplicates_removed: u64,
    pub empty_rows_removed: u64,
    /// 0..=100
    pub quality_score: u8,
    pub column_profile: BTreeMap<String, ColumnProfile>,
    pub sample_before: Vec<SampleRow>,
    pub sample_after: Vec<SampleRow>,
    pub engine_kind: EngineKind,
    pub source: AuditSource,
    /// Engine-specific extension fields, passed through uninterpreted.
    #[serde(default)]
    pub engine_specific_insights: Map<String, Value>,
}

impl AuditRecord {
    pub fn is_fallback(&self) -> bool {
        self.source == AuditSource::Fallback
    }
}
