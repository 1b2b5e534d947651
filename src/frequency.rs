//! Categorical aggregation: labelled counts and percentages per dimension.
//!
//! Buckets are always ordered by descending count, ties broken by label, so
//! two aggregations of the same records compare equal.

use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    bucketing::{age_range, tenure_range},
    record::EmployeeRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ContractType,
    Function,
    SalaryScale,
    AgeRange,
    TenureRange,
    Gender,
    Department,
    Subdepartment,
    Position,
}

impl Dimension {
    pub const ALL: [Dimension; 9] = [
        Dimension::ContractType,
        Dimension::Function,
        Dimension::SalaryScale,
        Dimension::AgeRange,
        Dimension::TenureRange,
        Dimension::Gender,
        Dimension::Department,
        Dimension::Subdepartment,
        Dimension::Position,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Dimension::ContractType => "contratacion",
            Dimension::Function => "funcion",
            Dimension::SalaryScale => "escalafon",
            Dimension::AgeRange => "edad",
            Dimension::TenureRange => "antiguedad",
            Dimension::Gender => "genero",
            Dimension::Department => "departamento",
            Dimension::Subdepartment => "subdepartamento",
            Dimension::Position => "cargo",
        }
    }

    /// The record's label for this dimension; date-derived dimensions are
    /// bucketed relative to `now`.
    pub fn label_of<'a>(self, record: &'a EmployeeRecord, now: DateTime<Utc>) -> &'a str {
        match self {
            Dimension::ContractType => record.contract_type.as_str(),
            Dimension::Function => record.function.as_str(),
            Dimension::SalaryScale => record.salary_scale.as_str(),
            Dimension::AgeRange => age_range(record.birth_date, now.date_naive()),
            Dimension::TenureRange => tenure_range(record.hire_date, now),
            Dimension::Gender => record.gender.as_str(),
            Dimension::Department => record.department.as_str(),
            Dimension::Subdepartment => record.subdepartment.as_str(),
            Dimension::Position => record.position.as_str(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Dimension {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim().to_ascii_lowercase();
        Dimension::ALL
            .into_iter()
            .find(|dimension| dimension.key() == wanted)
            .ok_or_else(|| {
                anyhow!(
                    "Unknown dimension '{value}'. Expected one of: {}",
                    Dimension::ALL.iter().map(|d| d.key()).join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryBucket {
    pub label: String,
    pub count: usize,
    /// Share of the total in percent, rounded to two decimals.
    pub percentage: f64,
}

/// Counts labels for a single dimension.
#[derive(Debug, Clone, Default)]
pub struct FrequencyAccumulator {
    total: usize,
    counts: BTreeMap<String, usize>,
}

impl FrequencyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, label: &str) {
        self.ingest_count(label, 1);
    }

    pub fn ingest_count(&mut self, label: &str, count: usize) {
        self.total += count;
        match self.counts.get_mut(label) {
            Some(existing) => *existing += count,
            None => {
                self.counts.insert(label.to_string(), count);
            }
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Buckets sorted by descending count, ties by label. Percentages are
    /// rounded to hundredths and then nudged by 0.01 (largest remainder
    /// first) so that they add up to exactly 100.
    pub fn into_buckets(self) -> Vec<CategoryBucket> {
        let total = self.total;
        if total == 0 {
            return Vec::new();
        }
        let sorted = self
            .counts
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .collect::<Vec<_>>();
        let exact = sorted
            .iter()
            .map(|(_, count)| *count as f64 / total as f64 * PERCENT_HUNDREDTHS)
            .collect::<Vec<_>>();
        let hundredths = apportion_hundredths(&exact);
        sorted
            .into_iter()
            .zip(hundredths)
            .map(|((label, count), hundredths)| CategoryBucket {
                label,
                count,
                percentage: hundredths as f64 / 100.0,
            })
            .collect()
    }
}

/// 100% expressed in hundredths of a percent.
const PERCENT_HUNDREDTHS: f64 = 10_000.0;

/// Rounds each share to the nearest hundredth, then moves the leftover
/// hundredths one at a time onto the shares that rounding hurt the most.
fn apportion_hundredths(exact: &[f64]) -> Vec<i64> {
    let mut rounded = exact.iter().map(|share| share.round() as i64).collect::<Vec<_>>();
    let mut drift = PERCENT_HUNDREDTHS as i64 - rounded.iter().sum::<i64>();
    if drift == 0 {
        return rounded;
    }
    let step = drift.signum();
    let order = (0..exact.len())
        .sorted_by(|&a, &b| {
            let (ra, rb) = (exact[a] - rounded[a] as f64, exact[b] - rounded[b] as f64);
            let by_remainder = if step > 0 {
                rb.total_cmp(&ra)
            } else {
                ra.total_cmp(&rb)
            };
            by_remainder.then_with(|| a.cmp(&b))
        })
        .collect::<Vec<_>>();
    for idx in order.into_iter().cycle() {
        if drift == 0 {
            break;
        }
        rounded[idx] += step;
        drift -= step;
    }
    rounded
}

pub fn aggregate(
    records: &[EmployeeRecord],
    dimension: Dimension,
    now: DateTime<Utc>,
) -> Vec<CategoryBucket> {
    let mut accumulator = FrequencyAccumulator::new();
    for record in records {
        accumulator.ingest(dimension.label_of(record, now));
    }
    accumulator.into_buckets()
}

/// Aggregates every dimension in one pass over the records.
pub fn aggregate_all(
    records: &[EmployeeRecord],
    now: DateTime<Utc>,
) -> BTreeMap<Dimension, Vec<CategoryBucket>> {
    let mut accumulators = Dimension::ALL
        .into_iter()
        .map(|dimension| (dimension, FrequencyAccumulator::new()))
        .collect::<BTreeMap<_, _>>();
    for record in records {
        for (dimension, accumulator) in accumulators.iter_mut() {
            accumulator.ingest(dimension.label_of(record, now));
        }
    }
    accumulators
        .into_iter()
        .map(|(dimension, accumulator)| (dimension, accumulator.into_buckets()))
        .collect()
}

/// Re-buckets already aggregated counts, e.g. the same dimension across units.
pub fn consolidate<'a, I>(buckets: I) -> Vec<CategoryBucket>
where
    I: IntoIterator<Item = &'a CategoryBucket>,
{
    let mut accumulator = FrequencyAccumulator::new();
    for bucket in buckets {
        accumulator.ingest_count(&bucket.label, bucket.count);
    }
    accumulator.into_buckets()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{UNSPECIFIED, round2};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn record(contract: &str) -> EmployeeRecord {
        EmployeeRecord {
            unit_name: "Hacienda".to_string(),
            contract_type: contract.to_string(),
            function: UNSPECIFIED.to_string(),
            salary_scale: UNSPECIFIED.to_string(),
            birth_date: None,
            hire_date: None,
            gender: UNSPECIFIED.to_string(),
            base_salary: 0.0,
            department: UNSPECIFIED.to_string(),
            subdepartment: UNSPECIFIED.to_string(),
            position: UNSPECIFIED.to_string(),
        }
    }

    #[test]
    fn contract_split_matches_expected_percentages() {
        let records = vec![record("Planta"), record("Planta"), record("Contrato")];
        let buckets = aggregate(&records, Dimension::ContractType, now());
        assert_eq!(
            buckets,
            vec![
                CategoryBucket {
                    label: "Planta".to_string(),
                    count: 2,
                    percentage: 66.67,
                },
                CategoryBucket {
                    label: "Contrato".to_string(),
                    count: 1,
                    percentage: 33.33,
                },
            ]
        );
    }

    #[test]
    fn ties_are_ordered_by_label() {
        let records = vec![record("B"), record("A"), record("C"), record("A"), record("B")];
        let labels = aggregate(&records, Dimension::ContractType, now())
            .into_iter()
            .map(|b| b.label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["A", "B", "C"]);
    }

    #[test]
    fn empty_input_yields_no_buckets() {
        assert!(aggregate(&[], Dimension::Gender, now()).is_empty());
        assert!(aggregate_all(&[], now()).values().all(|b| b.is_empty()));
    }

    #[test]
    fn missing_dates_form_their_own_bucket() {
        let buckets = aggregate(&[record("Planta")], Dimension::AgeRange, now());
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].label, UNSPECIFIED);
        assert_eq!(buckets[0].percentage, 100.0);
    }

    #[test]
    fn consolidation_recomputes_percentages() {
        let left = vec![CategoryBucket {
            label: "Planta".to_string(),
            count: 3,
            percentage: 100.0,
        }];
        let right = vec![
            CategoryBucket {
                label: "Planta".to_string(),
                count: 1,
                percentage: 50.0,
            },
            CategoryBucket {
                label: "Contrato".to_string(),
                count: 1,
                percentage: 50.0,
            },
        ];
        let merged = consolidate(left.iter().chain(right.iter()));
        assert_eq!(merged[0].label, "Planta");
        assert_eq!(merged[0].count, 4);
        assert_eq!(merged[0].percentage, 80.0);
        assert_eq!(merged[1].percentage, 20.0);
    }

    #[test]
    fn many_singleton_labels_still_sum_to_one_hundred() {
        let records = (0..201)
            .map(|i| record(&format!("Cargo {i:03}")))
            .collect::<Vec<_>>();
        let buckets = aggregate(&records, Dimension::ContractType, now());
        assert_eq!(buckets.len(), 201);
        let hundredths: i64 = buckets
            .iter()
            .map(|b| (b.percentage * 100.0).round() as i64)
            .sum();
        assert_eq!(hundredths, 10_000);
        assert!(
            buckets
                .iter()
                .all(|b| b.percentage == 0.5 || b.percentage == 0.49)
        );
    }

    #[test]
    fn equal_thirds_give_the_spare_hundredth_to_the_first_label() {
        let records = vec![record("A"), record("B"), record("C")];
        let shares = aggregate(&records, Dimension::ContractType, now())
            .into_iter()
            .map(|b| b.percentage)
            .collect::<Vec<_>>();
        assert_eq!(shares, vec![33.34, 33.33, 33.33]);
    }

    #[test]
    fn dimension_keys_parse_back() {
        for dimension in Dimension::ALL {
            assert_eq!(dimension.key().parse::<Dimension>().unwrap(), dimension);
        }
        assert!("salario".parse::<Dimension>().is_err());
    }

    proptest! {
        #[test]
        fn bucket_counts_and_percentages_sum_up(labels in prop::collection::vec("[a-z]{1,3}", 1..500)) {
            let records = labels.iter().map(|label| record(label)).collect::<Vec<_>>();
            let buckets = aggregate(&records, Dimension::ContractType, now());
            let count_sum: usize = buckets.iter().map(|b| b.count).sum();
            let pct_sum: f64 = buckets.iter().map(|b| b.percentage).sum();
            prop_assert_eq!(count_sum, records.len());
            prop_assert!((pct_sum - 100.0).abs() <= 0.1, "percentages summed to {}", pct_sum);
            for bucket in &buckets {
                let share = round2(bucket.count as f64 / records.len() as f64 * 100.0);
                prop_assert!(
                    (bucket.percentage - share).abs() <= 0.01 + 1e-9,
                    "{} drifted from {}", bucket.percentage, share
                );
            }
        }
    }
}
