mod common;

use std::{fs, thread, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use encoding_rs::UTF_8;
use roster_analytics::{
    EngineError, StoreError,
    batch::RosterBatch,
    config::EngineConfig,
    engine::{Engine, FailureKind, UnitOutcome},
    frequency::{CategoryBucket, Dimension},
    quality::QualityReport,
    snapshot::AnalysisSnapshot,
    store::{FileStore, MemoryStore, SnapshotStore},
};

use common::{TestWorkspace, roster_row};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn later() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

fn file_engine(workspace: &TestWorkspace) -> Engine<FileStore> {
    let store = FileStore::open(workspace.store_dir(), Duration::from_secs(5)).expect("store");
    Engine::new(store, EngineConfig::default())
}

fn batch(name: &str, csv: &str) -> RosterBatch {
    RosterBatch::parse(name, csv.as_bytes(), b',', UTF_8).expect("parse batch")
}

fn bucket(label: &str, count: usize, percentage: f64) -> CategoryBucket {
    CategoryBucket {
        label: label.to_string(),
        count,
        percentage,
    }
}

#[test]
fn contract_breakdown_and_salary_summary() {
    let workspace = TestWorkspace::new();
    let engine = file_engine(&workspace);
    let csv = "SECRETARIA,TIPO_CONTRATACION,SUELDO_BASICO\n\
               Hacienda,Planta,10000\n\
               Hacienda,Planta,20000\n\
               Hacienda,Contrato,0\n";
    let results = engine
        .ingest_at(&batch("padron.csv", csv), None, now())
        .expect("ingest");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].version(), Some(1));

    let snapshot = engine.get_current("hacienda").expect("current");
    assert_eq!(snapshot.headcount, 3);
    assert_eq!(
        snapshot.buckets(Dimension::ContractType),
        &[bucket("Planta", 2, 66.67), bucket("Contrato", 1, 33.33)]
    );
    assert_eq!(snapshot.salary.average, 15_000.0);
    assert_eq!(snapshot.salary.min, 10_000.0);
    assert_eq!(snapshot.salary.max, 20_000.0);
    assert_eq!(snapshot.salary.mass, 30_000.0);
    assert_eq!(snapshot.buckets(Dimension::Gender), &[bucket("No especificado", 3, 100.0)]);
    assert_eq!(snapshot.quality.map(|q| q.score), Some(100));
}

#[test]
fn sequential_ingestions_supersede_previous_version() {
    let workspace = TestWorkspace::new();
    let engine = file_engine(&workspace);
    let first = [
        roster_row("Hacienda", "Planta", "F", "1000"),
        roster_row("Hacienda", "Planta", "M", "1000"),
    ];
    let second = [
        roster_row("Hacienda", "Planta", "F", "1000"),
        roster_row("Hacienda", "Planta", "M", "1000"),
        roster_row("Hacienda", "Contrato", "F", "1000"),
    ];
    fn rows(rows: &[String]) -> Vec<&str> {
        rows.iter().map(String::as_str).collect::<Vec<_>>()
    }
    let first_path = workspace.write_roster("enero.csv", &rows(&first));
    let second_path = workspace.write_roster("febrero.csv", &rows(&second));

    for (path, at) in [(&first_path, now()), (&second_path, later())] {
        let batch = RosterBatch::read(path, b',', UTF_8).expect("read");
        let results = engine.ingest_at(&batch, None, at).expect("ingest");
        assert!(results.iter().all(|r| r.is_committed()));
    }

    let history = engine.get_history("Hacienda").expect("history");
    let versions = history
        .iter()
        .map(|s| (s.version, s.current))
        .collect::<Vec<_>>();
    assert_eq!(versions, vec![(2, true), (1, false)]);

    let current = &history[0];
    assert_eq!(current.source.name, "febrero.csv");
    let trend = current.trend.expect("trend on second version");
    assert_eq!(trend.previous_version, 1);
    assert_eq!(trend.headcount, 50.0);
    assert_eq!(trend.mass, 50.0);
    assert_eq!(trend.average_salary, 0.0);
    assert!(history[1].trend.is_none());
}

#[test]
fn reingesting_identical_file_only_bumps_version() {
    let workspace = TestWorkspace::new();
    let engine = file_engine(&workspace);
    let row = roster_row("Salud", "Planta", "F", "2500");
    let path = workspace.write_roster("padron.csv", &[row.as_str(), row.as_str()]);
    let batch = RosterBatch::read(&path, b',', UTF_8).expect("read");

    engine.ingest_at(&batch, None, now()).expect("first ingest");
    engine.ingest_at(&batch, None, now()).expect("second ingest");

    let first = engine.get_version("salud", 1).expect("v1");
    let second = engine.get_current("salud").expect("current");
    assert_eq!(second.version, 2);
    assert!(!first.current);
    assert_eq!(first.dimensions, second.dimensions);
    assert_eq!(first.salary, second.salary);
    assert_eq!(first.source.digest, second.source.digest);
    let trend = second.trend.expect("trend");
    assert_eq!(
        (trend.headcount, trend.mass, trend.average_salary),
        (0.0, 0.0, 0.0)
    );
}

#[test]
fn abandoned_commit_lock_does_not_block_later_ingestions() {
    let workspace = TestWorkspace::new();
    let engine = file_engine(&workspace);
    let row = roster_row("Hacienda", "Planta", "F", "1000");
    let batch = batch("padron.csv", &format!("{}\n{row}\n", common::ROSTER_HEADER));
    engine.ingest_at(&batch, None, now()).expect("first ingest");

    // A writer that died mid-commit, long ago.
    fs::write(
        workspace.store_dir().join("hacienda").join(".commit.lock"),
        "31337 1000\n",
    )
    .expect("plant lock");

    for expected in 2..=4 {
        let results = engine.ingest_at(&batch, None, now()).expect("ingest");
        assert_eq!(results[0].version(), Some(expected));
    }
    assert_eq!(engine.get_current("hacienda").expect("current").version, 4);
}

#[test]
fn concurrent_ingestions_keep_a_single_current_snapshot() {
    const WRITERS: usize = 8;
    let workspace = TestWorkspace::new();
    let store = FileStore::open(workspace.store_dir(), Duration::from_secs(10)).expect("store");
    let config = EngineConfig {
        max_commit_attempts: 50,
        retry_backoff_ms: 1,
        ..EngineConfig::default()
    };
    let engine = Engine::new(store, config);
    let row = roster_row("Obras", "Planta", "M", "1800");
    let batch = batch(
        "obras.csv",
        &format!("{}\n{row}\n", common::ROSTER_HEADER),
    );

    let (shared_engine, shared_batch) = (&engine, &batch);
    let committed = thread::scope(|scope| {
        let handles = (0..WRITERS)
            .map(|_| {
                scope.spawn(move || {
                    shared_engine
                        .ingest_at(shared_batch, None, now())
                        .expect("ingest")
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("writer thread"))
            .filter(|results| results[0].is_committed())
            .count()
    });
    assert_eq!(committed, WRITERS);

    let history = engine.get_history("obras").expect("history");
    assert_eq!(history.len(), WRITERS);
    assert_eq!(history.iter().filter(|s| s.current).count(), 1);
    assert_eq!(engine.get_current("obras").expect("current").version, WRITERS as u32);
    let mut versions = history.iter().map(|s| s.version).collect::<Vec<_>>();
    versions.sort_unstable();
    assert_eq!(versions, (1..=WRITERS as u32).collect::<Vec<_>>());
}

/// Fails every commit for one unit and delegates the rest.
struct FlakyStore {
    inner: MemoryStore,
    broken_unit: &'static str,
    conflict: bool,
}

impl SnapshotStore for FlakyStore {
    fn current(&self, unit_id: &str) -> Result<Option<AnalysisSnapshot>, StoreError> {
        self.inner.current(unit_id)
    }

    fn history(&self, unit_id: &str) -> Result<Vec<AnalysisSnapshot>, StoreError> {
        self.inner.history(unit_id)
    }

    fn version(&self, unit_id: &str, version: u32) -> Result<Option<AnalysisSnapshot>, StoreError> {
        self.inner.version(unit_id, version)
    }

    fn units(&self) -> Result<Vec<String>, StoreError> {
        self.inner.units()
    }

    fn compare_and_append(
        &self,
        expected: Option<u32>,
        snapshot: AnalysisSnapshot,
    ) -> Result<(), StoreError> {
        if snapshot.unit_id != self.broken_unit {
            return self.inner.compare_and_append(expected, snapshot);
        }
        if self.conflict {
            Err(StoreError::Conflict {
                unit: snapshot.unit_id,
                expected,
                found: expected.map(|v| v + 1).or(Some(1)),
            })
        } else {
            Err(StoreError::io(
                "snapshots/salud",
                std::io::Error::other("disk unavailable"),
            ))
        }
    }

    fn record_quality(
        &self,
        unit_id: &str,
        version: u32,
        report: &QualityReport,
    ) -> Result<(), StoreError> {
        self.inner.record_quality(unit_id, version, report)
    }
}

fn two_unit_batch() -> RosterBatch {
    let rows = [
        roster_row("Hacienda", "Planta", "F", "1000"),
        roster_row("Salud", "Planta", "M", "1000"),
    ];
    batch(
        "padron.csv",
        &format!("{}\n{}\n{}\n", common::ROSTER_HEADER, rows[0], rows[1]),
    )
}

#[test]
fn storage_failure_on_one_unit_spares_its_siblings() {
    let store = FlakyStore {
        inner: MemoryStore::new(),
        broken_unit: "salud",
        conflict: false,
    };
    let engine = Engine::new(store, EngineConfig::default());
    let results = engine
        .ingest_at(&two_unit_batch(), None, now())
        .expect("ingest");

    assert_eq!(results[0].unit_id, "hacienda");
    assert!(results[0].is_committed());
    assert_eq!(results[1].unit_id, "salud");
    match &results[1].outcome {
        UnitOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Persistence),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(engine.get_current("hacienda").expect("current").version, 1);
    assert!(matches!(
        engine.get_current("salud"),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn exhausted_retries_report_a_version_conflict() {
    let store = FlakyStore {
        inner: MemoryStore::new(),
        broken_unit: "salud",
        conflict: true,
    };
    let config = EngineConfig {
        max_commit_attempts: 3,
        retry_backoff_ms: 0,
        ..EngineConfig::default()
    };
    let engine = Engine::new(store, config);
    let results = engine
        .ingest_at(&two_unit_batch(), None, now())
        .expect("ingest");

    assert!(results[0].is_committed());
    match &results[1].outcome {
        UnitOutcome::Failed { kind, message } => {
            assert_eq!(*kind, FailureKind::VersionConflict);
            assert!(message.contains("3"), "message was {message}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn header_only_file_is_rejected_as_empty() {
    let engine = Engine::new(MemoryStore::new(), EngineConfig::default());
    let batch = batch("vacio.csv", &format!("{}\n", common::ROSTER_HEADER));
    let err = engine.ingest_at(&batch, None, now()).unwrap_err();
    assert!(matches!(err, EngineError::EmptyInput { ref file } if file == "vacio.csv"));
    assert!(engine.list_units().expect("units").is_empty());
}

#[test]
fn reporting_views_read_current_snapshots() {
    let workspace = TestWorkspace::new();
    let engine = file_engine(&workspace);
    let rows = [
        roster_row("Hacienda", "Planta", "F", "1000"),
        roster_row("Hacienda", "Planta", "F", "3000"),
        roster_row("Salud", "Contrato", "M", "1500"),
    ];
    let csv = format!(
        "{}\n{}\n{}\n{}\n",
        common::ROSTER_HEADER,
        rows[0],
        rows[1],
        rows[2]
    );
    engine
        .ingest_at(&batch("padron.csv", &csv), None, now())
        .expect("ingest");

    let units = engine.list_units().expect("units");
    assert_eq!(
        units.iter().map(|u| u.unit_id.as_str()).collect::<Vec<_>>(),
        vec!["hacienda", "salud"]
    );

    let overview = engine.overview().expect("overview");
    assert_eq!(overview.total_headcount, 3);
    assert_eq!(overview.total_mass, 5_500.0);
    assert_eq!(overview.size_classes.small, 2);

    let comparison = engine.compare("Hacienda", "Salud").expect("compare");
    assert_eq!(comparison.differences.headcount, 1);
    assert_eq!(comparison.differences.average_salary, 500.0);
    assert_eq!(comparison.differences.mass, 2_500.0);

    let genders = engine.consolidate(Dimension::Gender).expect("consolidate");
    assert_eq!(genders.total, 3);
    assert_eq!(
        genders.buckets,
        vec![bucket("F", 2, 66.67), bucket("M", 1, 33.33)]
    );
}
