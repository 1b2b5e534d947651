//! Cell-level parsing for roster exports: labels, dates and salaries.
//!
//! None of these helpers fail loudly on bad input; callers receive `None`
//! (or zero for salaries) and degrade to the documented defaults.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, prelude::ToPrimitive};

/// Label used for blank categorical cells and for missing dates.
pub const UNSPECIFIED: &str = "No especificado";
/// Unit name used when the unit column is blank.
pub const UNSPECIFIED_UNIT: &str = "No especificada";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        UNSPECIFIED.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn normalize_unit_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        UNSPECIFIED_UNIT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercases the unit name and collapses every whitespace run into `-`.
pub fn unit_id(name: &str) -> String {
    name.trim()
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed.date());
        }
    }
    None
}

/// Parses a base-salary cell. Unparsable or blank cells become `0.0`.
pub fn parse_salary(value: &str) -> f64 {
    parse_salary_decimal(value)
        .and_then(|decimal| decimal.to_f64())
        .filter(|salary| salary.is_finite())
        .unwrap_or(0.0)
}

fn parse_salary_decimal(value: &str) -> Option<Decimal> {
    let cleaned = value
        .trim()
        .trim_start_matches(['$', '€', '£'])
        .trim()
        .replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
