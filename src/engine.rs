//! The ingestion engine: partitions a roster batch by organizational unit,
//! builds and commits one snapshot per unit, then scores it.
//!
//! Units are processed in parallel by a bounded pool of workers pulling from
//! a shared queue. A failing unit never affects its siblings; the batch
//! result lists every unit's outcome in unit id order.

use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    analytics::{self, ComparisonResult, ConsolidatedDimension, Overview, UnitSummary},
    batch::RosterBatch,
    config::EngineConfig,
    data,
    error::{EngineError, EngineResult},
    frequency::Dimension,
    quality::{self, QualityReport},
    record::{EmployeeRecord, RosterLayout},
    snapshot::{self, AnalysisSnapshot, SourceFile, Trend},
    store::SnapshotStore,
    versioning::VersionManager,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    VersionConflict,
    Persistence,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Committed {
        version: u32,
        attempts: u32,
        trend: Option<Trend>,
        quality: QualityReport,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotResult {
    pub unit_id: String,
    pub unit_name: String,
    pub record_count: usize,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

impl SnapshotResult {
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Committed { .. })
    }

    pub fn version(&self) -> Option<u32> {
        match &self.outcome {
            UnitOutcome::Committed { version, .. } => Some(*version),
            UnitOutcome::Failed { .. } => None,
        }
    }
}

struct Partition {
    unit_name: String,
    records: Vec<EmployeeRecord>,
}

pub struct Engine<S: SnapshotStore> {
    store: S,
    config: EngineConfig,
}

impl<S: SnapshotStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ingests a batch, partitioning rows by `unit_column` (or the configured
    /// unit column when `None`).
    pub fn ingest(
        &self,
        batch: &RosterBatch,
        unit_column: Option<&str>,
    ) -> EngineResult<Vec<SnapshotResult>> {
        self.ingest_at(batch, unit_column, Utc::now())
    }

    /// As [`Engine::ingest`], with an explicit clock for age/tenure bucketing
    /// and timestamps.
    pub fn ingest_at(
        &self,
        batch: &RosterBatch,
        unit_column: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<SnapshotResult>> {
        if batch.is_empty() {
            return Err(EngineError::EmptyInput {
                file: batch.file_name.clone(),
            });
        }

        let columns = match unit_column {
            Some(column) => self.config.columns.clone().with_unit_column(column),
            None => self.config.columns.clone(),
        };
        let layout = RosterLayout::resolve(&batch.headers, &columns);
        let missing = layout.missing_columns(&columns);
        if !missing.is_empty() {
            warn!(
                "Roster '{}' lacks column(s) {}; their values default to '{}'",
                batch.file_name,
                missing.join(", "),
                data::UNSPECIFIED
            );
        }

        let partitions = partition(&layout, &batch.rows);
        info!(
            "Ingesting {} row(s) from '{}' across {} unit(s)",
            batch.rows.len(),
            batch.file_name,
            partitions.len()
        );

        let partitions = partitions.into_iter().collect::<Vec<_>>();
        let workers = self.worker_count(partitions.len());
        debug!("Committing {} unit(s) on {workers} worker(s)", partitions.len());
        let next = AtomicUsize::new(0);
        let (next, shared) = (&next, &partitions);
        let mut slots: Vec<Option<SnapshotResult>> = vec![None; partitions.len()];
        thread::scope(|scope| {
            let handles = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let idx = next.fetch_add(1, Ordering::Relaxed);
                            let Some((unit_id, partition)) = shared.get(idx) else {
                                break;
                            };
                            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                                self.process_partition(unit_id, partition, batch, now)
                            }))
                            .unwrap_or_else(|_| worker_failure(unit_id, partition));
                            done.push((idx, result));
                        }
                        done
                    })
                })
                .collect::<Vec<_>>();
            for handle in handles {
                for (idx, result) in handle.join().unwrap_or_default() {
                    slots[idx] = Some(result);
                }
            }
        });
        let results = slots
            .into_iter()
            .zip(&partitions)
            .map(|(slot, (unit_id, partition))| {
                slot.unwrap_or_else(|| worker_failure(unit_id, partition))
            })
            .collect::<Vec<_>>();

        let committed = results.iter().filter(|r| r.is_committed()).count();
        info!(
            "Batch '{}' finished: {committed} of {} unit(s) committed",
            batch.file_name,
            results.len()
        );
        Ok(results)
    }

    fn worker_count(&self, partitions: usize) -> usize {
        let configured = match self.config.max_workers {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        configured.min(partitions).max(1)
    }

    fn process_partition(
        &self,
        unit_id: &str,
        partition: &Partition,
        batch: &RosterBatch,
        now: DateTime<Utc>,
    ) -> SnapshotResult {
        let source = SourceFile {
            name: batch.file_name.clone(),
            record_count: partition.records.len(),
            ingested_at: now,
            digest: batch.digest.clone(),
        };
        let draft = snapshot::build_draft(
            unit_id,
            &partition.unit_name,
            &partition.records,
            source,
            now,
        );
        let manager = VersionManager::new(
            &self.store,
            self.config.max_commit_attempts,
            self.config.retry_backoff(),
        );

        let outcome = match manager.commit(&draft, now) {
            Ok(commit) => {
                let report = quality::assess(&commit.snapshot);
                if let Err(err) =
                    self.store
                        .record_quality(unit_id, commit.snapshot.version, &report)
                {
                    warn!("Could not store quality report for '{unit_id}': {err}");
                }
                UnitOutcome::Committed {
                    version: commit.snapshot.version,
                    attempts: commit.attempts,
                    trend: commit.snapshot.trend,
                    quality: report,
                }
            }
            Err(err) => {
                warn!("Unit '{unit_id}' failed: {err}");
                let kind = match err {
                    EngineError::VersionConflict { .. } => FailureKind::VersionConflict,
                    EngineError::Persistence(_) => FailureKind::Persistence,
                    _ => FailureKind::Internal,
                };
                UnitOutcome::Failed {
                    kind,
                    message: err.to_string(),
                }
            }
        };

        SnapshotResult {
            unit_id: unit_id.to_string(),
            unit_name: partition.unit_name.clone(),
            record_count: partition.records.len(),
            outcome,
        }
    }

    pub fn get_current(&self, unit: &str) -> EngineResult<AnalysisSnapshot> {
        let unit_id = data::unit_id(unit);
        self.store
            .current(&unit_id)?
            .ok_or(EngineError::NotFound { unit: unit_id })
    }

    /// Every version of the unit, newest first.
    pub fn get_history(&self, unit: &str) -> EngineResult<Vec<AnalysisSnapshot>> {
        let unit_id = data::unit_id(unit);
        let history = self.store.history(&unit_id)?;
        if history.is_empty() {
            return Err(EngineError::NotFound { unit: unit_id });
        }
        Ok(history)
    }

    pub fn get_version(&self, unit: &str, version: u32) -> EngineResult<AnalysisSnapshot> {
        let unit_id = data::unit_id(unit);
        self.store
            .version(&unit_id, version)?
            .ok_or(EngineError::VersionNotFound {
                unit: unit_id,
                version,
            })
    }

    pub fn compare(&self, left: &str, right: &str) -> EngineResult<ComparisonResult> {
        let left = self.get_current(left)?;
        let right = self.get_current(right)?;
        Ok(analytics::compare(&left, &right))
    }

    pub fn list_units(&self) -> EngineResult<Vec<UnitSummary>> {
        Ok(analytics::list_units(&self.store.current_snapshots()?))
    }

    pub fn overview(&self) -> EngineResult<Overview> {
        Ok(analytics::overview(&self.store.current_snapshots()?))
    }

    pub fn consolidate(&self, dimension: Dimension) -> EngineResult<ConsolidatedDimension> {
        Ok(analytics::consolidate(
            &self.store.current_snapshots()?,
            dimension,
        ))
    }
}

fn worker_failure(unit_id: &str, partition: &Partition) -> SnapshotResult {
    SnapshotResult {
        unit_id: unit_id.to_string(),
        unit_name: partition.unit_name.clone(),
        record_count: partition.records.len(),
        outcome: UnitOutcome::Failed {
            kind: FailureKind::Internal,
            message: "Unit worker panicked".to_string(),
        },
    }
}

/// Groups normalized rows by unit id, keeping the first-seen display name.
fn partition(layout: &RosterLayout, rows: &[Vec<String>]) -> BTreeMap<String, Partition> {
    let mut partitions: BTreeMap<String, Partition> = BTreeMap::new();
    for row in rows {
        let record = layout.normalize(row);
        let unit_id = data::unit_id(&record.unit_name);
        partitions
            .entry(unit_id)
            .or_insert_with(|| Partition {
                unit_name: record.unit_name.clone(),
                records: Vec::new(),
            })
            .records
            .push(record);
    }
    partitions
}
