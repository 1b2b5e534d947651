//! Post-commit quality scoring of snapshots.
//!
//! Scoring never rejects a snapshot. It starts at 100, subtracts a fixed
//! penalty per detected problem and floors at 0.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::snapshot::AnalysisSnapshot;

pub const MAX_SCORE: u32 = 100;
const AVERAGE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    MissingHeadcount,
    ZeroPayrollMass,
    HeadcountWithoutPayroll,
    AverageSalaryMismatch,
    DimensionTotalMismatch,
}

impl ProblemKind {
    pub fn penalty(self) -> u32 {
        match self {
            ProblemKind::MissingHeadcount => 20,
            ProblemKind::ZeroPayrollMass => 15,
            ProblemKind::HeadcountWithoutPayroll => 25,
            ProblemKind::AverageSalaryMismatch => 10,
            ProblemKind::DimensionTotalMismatch => 5,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ProblemKind::MissingHeadcount | ProblemKind::HeadcountWithoutPayroll => {
                Severity::Critical
            }
            ProblemKind::ZeroPayrollMass => Severity::High,
            ProblemKind::AverageSalaryMismatch | ProblemKind::DimensionTotalMismatch => {
                Severity::Medium
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProblem {
    pub kind: ProblemKind,
    pub field: String,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: u32,
    pub problems: Vec<QualityProblem>,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    fn push(&mut self, kind: ProblemKind, field: &str, description: String) {
        self.score = self.score.saturating_sub(kind.penalty());
        self.problems.push(QualityProblem {
            kind,
            field: field.to_string(),
            severity: kind.severity(),
            description,
        });
    }
}

pub fn assess(snapshot: &AnalysisSnapshot) -> QualityReport {
    let mut report = QualityReport {
        score: MAX_SCORE,
        problems: Vec::new(),
    };
    let headcount = snapshot.headcount;
    let salary = &snapshot.salary;

    if headcount == 0 {
        report.push(
            ProblemKind::MissingHeadcount,
            "headcount",
            "Snapshot has no employees".to_string(),
        );
    }

    // Both payroll penalties apply to the same condition.
    if headcount > 0 && salary.mass == 0.0 {
        report.push(
            ProblemKind::ZeroPayrollMass,
            "salary.mass",
            format!("Payroll mass is zero for {headcount} employee(s)"),
        );
        report.push(
            ProblemKind::HeadcountWithoutPayroll,
            "salary.mass",
            "Headcount is positive but no employee has a positive base salary".to_string(),
        );
    }

    if salary.paid_count > 0 {
        let expected = salary.mass / salary.paid_count as f64;
        if expected != 0.0 && ((salary.average - expected) / expected).abs() > AVERAGE_TOLERANCE {
            report.push(
                ProblemKind::AverageSalaryMismatch,
                "salary.average",
                format!(
                    "Stated average {:.2} differs from mass / count {:.2} by more than 1%",
                    salary.average, expected
                ),
            );
        }
    }

    for (dimension, buckets) in &snapshot.dimensions {
        let total: usize = buckets.iter().map(|bucket| bucket.count).sum();
        if total != headcount {
            report.push(
                ProblemKind::DimensionTotalMismatch,
                dimension.key(),
                format!("Buckets add up to {total} instead of headcount {headcount}"),
            );
        }
    }

    for problem in &report.problems {
        warn!(
            "Quality problem on '{}' v{}: [{}] {}",
            snapshot.unit_id, snapshot.version, problem.severity, problem.description
        );
    }
    report
}
