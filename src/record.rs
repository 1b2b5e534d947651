//! Row normalization: one raw roster row into a typed [`EmployeeRecord`].
//!
//! Normalization never fails. Blank categorical cells become
//! [`UNSPECIFIED`](crate::data::UNSPECIFIED), unparsable dates become `None`
//! and unparsable salaries become `0.0`, so every row still counts towards
//! every dimension's headcount.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    config::ColumnMap,
    data::{normalize_label, normalize_unit_name, parse_naive_date, parse_salary},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub unit_name: String,
    pub contract_type: String,
    pub function: String,
    pub salary_scale: String,
    pub birth_date: Option<NaiveDate>,
    pub hire_date: Option<NaiveDate>,
    pub gender: String,
    pub base_salary: f64,
    pub department: String,
    pub subdepartment: String,
    pub position: String,
}

/// Header positions of the configured columns within one roster file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterLayout {
    unit: Option<usize>,
    contract_type: Option<usize>,
    function: Option<usize>,
    salary_scale: Option<usize>,
    birth_date: Option<usize>,
    hire_date: Option<usize>,
    gender: Option<usize>,
    base_salary: Option<usize>,
    department: Option<usize>,
    subdepartment: Option<usize>,
    position: Option<usize>,
}

impl RosterLayout {
    pub fn resolve(headers: &[String], columns: &ColumnMap) -> Self {
        let find = |name: &str| {
            let wanted = name.trim();
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(wanted))
        };
        Self {
            unit: find(&columns.unit),
            contract_type: find(&columns.contract_type),
            function: find(&columns.function),
            salary_scale: find(&columns.salary_scale),
            birth_date: find(&columns.birth_date),
            hire_date: find(&columns.hire_date),
            gender: find(&columns.gender),
            base_salary: find(&columns.base_salary),
            department: find(&columns.department),
            subdepartment: find(&columns.subdepartment),
            position: find(&columns.position),
        }
    }

    pub fn has_unit_column(&self) -> bool {
        self.unit.is_some()
    }

    /// Names of configured columns absent from the header row.
    pub fn missing_columns<'a>(&self, columns: &'a ColumnMap) -> Vec<&'a str> {
        [
            (self.unit, columns.unit.as_str()),
            (self.contract_type, columns.contract_type.as_str()),
            (self.function, columns.function.as_str()),
            (self.salary_scale, columns.salary_scale.as_str()),
            (self.birth_date, columns.birth_date.as_str()),
            (self.hire_date, columns.hire_date.as_str()),
            (self.gender, columns.gender.as_str()),
            (self.base_salary, columns.base_salary.as_str()),
        ]
        .into_iter()
        .filter(|(idx, _)| idx.is_none())
        .map(|(_, name)| name)
        .collect()
    }

    pub fn unit_name(&self, row: &[String]) -> String {
        normalize_unit_name(cell(row, self.unit))
    }

    pub fn normalize(&self, row: &[String]) -> EmployeeRecord {
        EmployeeRecord {
            unit_name: self.unit_name(row),
            contract_type: normalize_label(cell(row, self.contract_type)),
            function: normalize_label(cell(row, self.function)),
            salary_scale: normalize_label(cell(row, self.salary_scale)),
            birth_date: parse_naive_date(cell(row, self.birth_date)),
            hire_date: parse_naive_date(cell(row, self.hire_date)),
            gender: normalize_label(cell(row, self.gender)),
            base_salary: parse_salary(cell(row, self.base_salary)),
            department: normalize_label(cell(row, self.department)),
            subdepartment: normalize_label(cell(row, self.subdepartment)),
            position: normalize_label(cell(row, self.position)),
        }
    }
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map(|s| s.as_str()).unwrap_or("")
}
