//! Cross-snapshot views for the reporting layer: unit listings, the overall
//! overview, side-by-side comparison and dimension consolidation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    data::round2,
    frequency::{self, CategoryBucket, Dimension},
    snapshot::AnalysisSnapshot,
};

pub const SMALL_UNIT_LIMIT: usize = 100;
pub const LARGE_UNIT_FLOOR: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitSummary {
    pub unit_id: String,
    pub unit_name: String,
    pub headcount: usize,
    pub version: u32,
    pub last_ingested_at: DateTime<Utc>,
}

impl From<&AnalysisSnapshot> for UnitSummary {
    fn from(snapshot: &AnalysisSnapshot) -> Self {
        Self {
            unit_id: snapshot.unit_id.clone(),
            unit_name: snapshot.unit_name.clone(),
            headcount: snapshot.headcount,
            version: snapshot.version,
            last_ingested_at: snapshot.source.ingested_at,
        }
    }
}

pub fn list_units(snapshots: &[AnalysisSnapshot]) -> Vec<UnitSummary> {
    let mut units = snapshots.iter().map(UnitSummary::from).collect::<Vec<_>>();
    units.sort_by(|a, b| {
        a.unit_name
            .cmp(&b.unit_name)
            .then_with(|| a.unit_id.cmp(&b.unit_id))
    });
    units
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeClasses {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewRow {
    pub unit_id: String,
    pub unit_name: String,
    pub headcount: usize,
    pub mass: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub unit_count: usize,
    pub total_headcount: usize,
    pub total_mass: f64,
    pub size_classes: SizeClasses,
    /// Largest units first.
    pub units: Vec<OverviewRow>,
}

pub fn overview(snapshots: &[AnalysisSnapshot]) -> Overview {
    let mut size_classes = SizeClasses::default();
    for snapshot in snapshots {
        match snapshot.headcount {
            n if n < SMALL_UNIT_LIMIT => size_classes.small += 1,
            n if n < LARGE_UNIT_FLOOR => size_classes.medium += 1,
            _ => size_classes.large += 1,
        }
    }
    let mut units = snapshots
        .iter()
        .map(|snapshot| OverviewRow {
            unit_id: snapshot.unit_id.clone(),
            unit_name: snapshot.unit_name.clone(),
            headcount: snapshot.headcount,
            mass: snapshot.salary.mass,
        })
        .collect::<Vec<_>>();
    units.sort_by(|a, b| {
        b.headcount
            .cmp(&a.headcount)
            .then_with(|| a.unit_name.cmp(&b.unit_name))
    });
    Overview {
        unit_count: snapshots.len(),
        total_headcount: snapshots.iter().map(|s| s.headcount).sum(),
        total_mass: snapshots.iter().map(|s| s.salary.mass).sum(),
        size_classes,
        units,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSide {
    pub unit_id: String,
    pub unit_name: String,
    pub version: u32,
    pub headcount: usize,
    pub average_salary: f64,
    pub mass: f64,
}

impl From<&AnalysisSnapshot> for ComparisonSide {
    fn from(snapshot: &AnalysisSnapshot) -> Self {
        Self {
            unit_id: snapshot.unit_id.clone(),
            unit_name: snapshot.unit_name.clone(),
            version: snapshot.version,
            headcount: snapshot.headcount,
            average_salary: snapshot.salary.average,
            mass: snapshot.salary.mass,
        }
    }
}

/// Differences are always `left − right`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Differences {
    pub headcount: i64,
    pub average_salary: f64,
    pub mass: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub left: ComparisonSide,
    pub right: ComparisonSide,
    pub differences: Differences,
}

pub fn compare(left: &AnalysisSnapshot, right: &AnalysisSnapshot) -> ComparisonResult {
    ComparisonResult {
        left: ComparisonSide::from(left),
        right: ComparisonSide::from(right),
        differences: Differences {
            headcount: left.headcount as i64 - right.headcount as i64,
            average_salary: round2(left.salary.average - right.salary.average),
            mass: round2(left.salary.mass - right.salary.mass),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedDimension {
    pub dimension: Dimension,
    pub total: usize,
    pub buckets: Vec<CategoryBucket>,
}

pub fn consolidate(snapshots: &[AnalysisSnapshot], dimension: Dimension) -> ConsolidatedDimension {
    let buckets = frequency::consolidate(
        snapshots
            .iter()
            .flat_map(|snapshot| snapshot.buckets(dimension).iter()),
    );
    ConsolidatedDimension {
        dimension,
        total: buckets.iter().map(|bucket| bucket.count).sum(),
        buckets,
    }
}
