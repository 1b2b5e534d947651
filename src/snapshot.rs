//! Snapshot values and the pure builder that composes them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    data::round2,
    frequency::{self, CategoryBucket, Dimension},
    quality::QualityReport,
    record::EmployeeRecord,
    stats::{self, SalarySummary},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    /// Rows of the file that belong to this unit.
    pub record_count: usize,
    pub ingested_at: DateTime<Utc>,
    /// Hex SHA-256 of the whole uploaded file.
    pub digest: String,
}

/// Period-over-period deltas in percent against the previous current snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub previous_version: u32,
    pub headcount: f64,
    pub mass: f64,
    pub average_salary: f64,
}

impl Trend {
    pub fn between(previous: &AnalysisSnapshot, current: &SnapshotDraft) -> Self {
        Self {
            previous_version: previous.version,
            headcount: percent_delta(previous.headcount as f64, current.headcount as f64),
            mass: percent_delta(previous.salary.mass, current.salary.mass),
            average_salary: percent_delta(previous.salary.average, current.salary.average),
        }
    }
}

pub fn percent_delta(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        if current > 0.0 { 100.0 } else { 0.0 }
    } else {
        round2((current - previous) / previous * 100.0)
    }
}

/// Unpersisted analysis for one unit; version and current flag are assigned
/// at commit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDraft {
    pub unit_id: String,
    pub unit_name: String,
    pub headcount: usize,
    pub dimensions: BTreeMap<Dimension, Vec<CategoryBucket>>,
    pub salary: SalarySummary,
    pub source: SourceFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub unit_id: String,
    pub unit_name: String,
    pub version: u32,
    pub current: bool,
    pub created_at: DateTime<Utc>,
    pub headcount: usize,
    pub dimensions: BTreeMap<Dimension, Vec<CategoryBucket>>,
    pub salary: SalarySummary,
    pub source: SourceFile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
}

impl AnalysisSnapshot {
    pub fn buckets(&self, dimension: Dimension) -> &[CategoryBucket] {
        self.dimensions
            .get(&dimension)
            .map(|buckets| buckets.as_slice())
            .unwrap_or_default()
    }
}

impl SnapshotDraft {
    pub fn into_snapshot(
        self,
        version: u32,
        created_at: DateTime<Utc>,
        trend: Option<Trend>,
    ) -> AnalysisSnapshot {
        AnalysisSnapshot {
            unit_id: self.unit_id,
            unit_name: self.unit_name,
            version,
            current: true,
            created_at,
            headcount: self.headcount,
            dimensions: self.dimensions,
            salary: self.salary,
            source: self.source,
            trend,
            quality: None,
        }
    }
}

/// Composes one partition's records into a draft. Date-derived dimensions are
/// bucketed relative to `now`.
pub fn build_draft(
    unit_id: &str,
    unit_name: &str,
    records: &[EmployeeRecord],
    source: SourceFile,
    now: DateTime<Utc>,
) -> SnapshotDraft {
    SnapshotDraft {
        unit_id: unit_id.to_string(),
        unit_name: unit_name.to_string(),
        headcount: records.len(),
        dimensions: frequency::aggregate_all(records, now),
        salary: stats::summarize(records),
        source,
    }
}
