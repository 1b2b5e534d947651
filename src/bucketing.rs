//! Age and tenure range labels.
//!
//! Both use half-open, lower-inclusive thresholds: an age of exactly 25
//! lands in `26-35`, and anything below 25 (including minors) in `18-25`.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::data::UNSPECIFIED;

pub const AGE_RANGES: &[&str] = &["18-25", "26-35", "36-45", "46-55", "56-65", "65+"];
pub const TENURE_RANGES: &[&str] = &[
    "0-5 años",
    "6-10 años",
    "11-15 años",
    "16-20 años",
    "21-25 años",
    "25+ años",
];

const RANGE_CEILINGS: [f64; 5] = [5.0, 10.0, 15.0, 20.0, 25.0];
const AGE_CEILINGS: [i32; 5] = [25, 35, 45, 55, 65];
const DAYS_PER_YEAR: f64 = 365.25;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Age as a calendar-year difference, ignoring month and day.
pub fn age_in_years(birth_date: NaiveDate, today: NaiveDate) -> i32 {
    today.year() - birth_date.year()
}

pub fn age_range(birth_date: Option<NaiveDate>, today: NaiveDate) -> &'static str {
    let Some(birth_date) = birth_date else {
        return UNSPECIFIED;
    };
    let age = age_in_years(birth_date, today);
    AGE_CEILINGS
        .iter()
        .position(|ceiling| age < *ceiling)
        .map_or(AGE_RANGES[AGE_RANGES.len() - 1], |idx| AGE_RANGES[idx])
}

/// Elapsed years since the hire date at UTC midnight, in 365.25-day years.
pub fn tenure_in_years(hire_date: NaiveDate, now: DateTime<Utc>) -> f64 {
    let hired_at = hire_date.and_time(chrono::NaiveTime::MIN).and_utc();
    let elapsed = now.signed_duration_since(hired_at);
    elapsed.num_seconds() as f64 / SECONDS_PER_DAY / DAYS_PER_YEAR
}

pub fn tenure_range(hire_date: Option<NaiveDate>, now: DateTime<Utc>) -> &'static str {
    let Some(hire_date) = hire_date else {
        return UNSPECIFIED;
    };
    let years = tenure_in_years(hire_date, now);
    RANGE_CEILINGS
        .iter()
        .position(|ceiling| years < *ceiling)
        .map_or(TENURE_RANGES[TENURE_RANGES.len() - 1], |idx| {
            TENURE_RANGES[idx]
        })
}
