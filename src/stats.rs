//! Salary statistics over strictly positive base salaries.
//!
//! Zero and unparsable salaries are left out of the summary while still
//! counting towards the unit's headcount; the quality validator flags the
//! resulting gap between headcount and payroll mass.

use serde::{Deserialize, Serialize};

use crate::record::EmployeeRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SalarySummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Total payroll mass.
    pub mass: f64,
    /// Number of salaries that contributed to the summary.
    pub paid_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SalaryAccumulator {
    sum: f64,
    count: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl SalaryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, salary: f64) {
        if !salary.is_finite() || salary <= 0.0 {
            return;
        }
        self.count += 1;
        self.sum += salary;
        self.min = Some(match self.min {
            Some(current) => current.min(salary),
            None => salary,
        });
        self.max = Some(match self.max {
            Some(current) => current.max(salary),
            None => salary,
        });
    }

    fn mean(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }

    pub fn finish(&self) -> SalarySummary {
        let Some(average) = self.mean() else {
            return SalarySummary::default();
        };
        SalarySummary {
            average,
            min: self.min.unwrap_or_default(),
            max: self.max.unwrap_or_default(),
            mass: self.sum,
            paid_count: self.count,
        }
    }
}

pub fn summarize(records: &[EmployeeRecord]) -> SalarySummary {
    let mut accumulator = SalaryAccumulator::new();
    for record in records {
        accumulator.add_value(record.base_salary);
    }
    accumulator.finish()
}
