//! Snapshot persistence.
//!
//! Stores are append-only. The single mutating operation that matters,
//! [`SnapshotStore::compare_and_append`], demotes the unit's current snapshot
//! and inserts the new one as one atomic step, and only when the current
//! version is still the one the caller based its draft on.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use log::{debug, warn};

use crate::{error::StoreError, quality::QualityReport, snapshot::AnalysisSnapshot};

type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait SnapshotStore: Send + Sync {
    fn current(&self, unit_id: &str) -> StoreResult<Option<AnalysisSnapshot>>;

    /// Every committed version of the unit, newest first.
    fn history(&self, unit_id: &str) -> StoreResult<Vec<AnalysisSnapshot>>;

    fn version(&self, unit_id: &str, version: u32) -> StoreResult<Option<AnalysisSnapshot>>;

    /// Ids of all units with at least one committed snapshot, sorted.
    fn units(&self) -> StoreResult<Vec<String>>;

    /// Commits `snapshot` as the unit's current snapshot if the unit's current
    /// version still equals `expected`; otherwise returns
    /// [`StoreError::Conflict`] and leaves the store untouched.
    fn compare_and_append(
        &self,
        expected: Option<u32>,
        snapshot: AnalysisSnapshot,
    ) -> StoreResult<()>;

    /// Attaches a quality report to a committed snapshot. The first report
    /// recorded for a version wins.
    fn record_quality(
        &self,
        unit_id: &str,
        version: u32,
        report: &QualityReport,
    ) -> StoreResult<()>;

    fn current_snapshots(&self) -> StoreResult<Vec<AnalysisSnapshot>> {
        let mut snapshots = Vec::new();
        for unit in self.units()? {
            if let Some(snapshot) = self.current(&unit)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }
}

fn check_expected(
    unit_id: &str,
    expected: Option<u32>,
    found: Option<u32>,
    incoming: u32,
) -> StoreResult<()> {
    if found != expected || incoming != expected.unwrap_or(0) + 1 {
        return Err(StoreError::Conflict {
            unit: unit_id.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Mutex-guarded in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    units: Mutex<BTreeMap<String, Vec<AnalysisSnapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_units<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Vec<AnalysisSnapshot>>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.units.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}

impl SnapshotStore for MemoryStore {
    fn current(&self, unit_id: &str) -> StoreResult<Option<AnalysisSnapshot>> {
        self.with_units(|units| {
            Ok(units
                .get(unit_id)
                .and_then(|versions| versions.iter().find(|s| s.current).cloned()))
        })
    }

    fn history(&self, unit_id: &str) -> StoreResult<Vec<AnalysisSnapshot>> {
        self.with_units(|units| {
            Ok(units
                .get(unit_id)
                .map(|versions| versions.iter().rev().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn version(&self, unit_id: &str, version: u32) -> StoreResult<Option<AnalysisSnapshot>> {
        self.with_units(|units| {
            Ok(units
                .get(unit_id)
                .and_then(|versions| versions.iter().find(|s| s.version == version).cloned()))
        })
    }

    fn units(&self) -> StoreResult<Vec<String>> {
        self.with_units(|units| Ok(units.keys().cloned().collect()))
    }

    fn compare_and_append(
        &self,
        expected: Option<u32>,
        mut snapshot: AnalysisSnapshot,
    ) -> StoreResult<()> {
        self.with_units(|units| {
            let found = units
                .get(&snapshot.unit_id)
                .and_then(|versions| versions.iter().find(|s| s.current))
                .map(|s| s.version);
            check_expected(&snapshot.unit_id, expected, found, snapshot.version)?;
            let versions = units.entry(snapshot.unit_id.clone()).or_default();
            for existing in versions.iter_mut() {
                existing.current = false;
            }
            snapshot.current = true;
            versions.push(snapshot);
            Ok(())
        })
    }

    fn record_quality(
        &self,
        unit_id: &str,
        version: u32,
        report: &QualityReport,
    ) -> StoreResult<()> {
        self.with_units(|units| {
            if let Some(snapshot) = units
                .get_mut(unit_id)
                .and_then(|versions| versions.iter_mut().find(|s| s.version == version))
                && snapshot.quality.is_none()
            {
                snapshot.quality = Some(report.clone());
            }
            Ok(())
        })
    }
}

const CURRENT_POINTER: &str = "CURRENT";
const LOCK_FILE: &str = ".commit.lock";
const LOCK_POLL: Duration = Duration::from_millis(5);
/// Age after which a commit lock is treated as left behind by a dead writer.
pub const DEFAULT_STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Directory-backed store: one directory per unit holding immutable
/// `vNNNNNN.json` snapshot files and a `CURRENT` pointer replaced by rename.
///
/// The current flag of a loaded snapshot is derived from the pointer, so a
/// reader sees exactly one current snapshot per unit at any time.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    lock_timeout: Duration,
    stale_lock_age: Duration,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>, lock_timeout: Duration) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            lock_timeout,
            stale_lock_age: DEFAULT_STALE_LOCK_AGE,
        })
    }

    pub fn with_stale_lock_age(mut self, stale_lock_age: Duration) -> Self {
        self.stale_lock_age = stale_lock_age;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unit_dir(&self, unit_id: &str) -> PathBuf {
        self.root.join(encode_unit_dir(unit_id))
    }

    fn snapshot_path(dir: &Path, version: u32) -> PathBuf {
        dir.join(format!("v{version:06}.json"))
    }

    fn quality_path(dir: &Path, version: u32) -> PathBuf {
        dir.join(format!("v{version:06}.quality.json"))
    }

    fn read_pointer(dir: &Path) -> StoreResult<Option<u32>> {
        let path = dir.join(CURRENT_POINTER);
        match fs::read_to_string(&path) {
            Ok(raw) => raw.trim().parse::<u32>().map(Some).map_err(|e| {
                StoreError::io(&path, std::io::Error::new(ErrorKind::InvalidData, e))
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }

    fn load(&self, dir: &Path, version: u32, current: bool) -> StoreResult<AnalysisSnapshot> {
        let path = Self::snapshot_path(dir, version);
        let mut snapshot: AnalysisSnapshot = read_json(&path)?;
        snapshot.current = current;
        let quality_path = Self::quality_path(dir, version);
        if quality_path.exists() {
            snapshot.quality = Some(read_json(&quality_path)?);
        }
        Ok(snapshot)
    }

    /// Takes the unit's commit lock. The lock file records the owner pid and
    /// its creation time in epoch milliseconds; a lock older than the stale
    /// age is reclaimed instead of waited on.
    fn lock(&self, dir: &Path) -> StoreResult<CommitLock> {
        let path = dir.join(LOCK_FILE);
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let lock = CommitLock { path };
                    let stamp =
                        format!("{} {}\n", std::process::id(), Utc::now().timestamp_millis());
                    file.write_all(stamp.as_bytes())
                        .map_err(|e| StoreError::io(&lock.path, e))?;
                    return Ok(lock);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    match lock_age(&path) {
                        Some(age) if age >= self.stale_lock_age => {
                            reclaim_stale_lock(&path, age)?;
                            continue;
                        }
                        // Released between our attempts.
                        None => continue,
                        Some(_) => {}
                    }
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StoreError::LockTimeout { path });
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(err) => return Err(StoreError::io(&path, err)),
            }
        }
    }
}

impl SnapshotStore for FileStore {
    fn current(&self, unit_id: &str) -> StoreResult<Option<AnalysisSnapshot>> {
        let dir = self.unit_dir(unit_id);
        match Self::read_pointer(&dir)? {
            Some(version) => self.load(&dir, version, true).map(Some),
            None => Ok(None),
        }
    }

    fn history(&self, unit_id: &str) -> StoreResult<Vec<AnalysisSnapshot>> {
        let dir = self.unit_dir(unit_id);
        let Some(pointer) = Self::read_pointer(&dir)? else {
            return Ok(Vec::new());
        };
        // Files above the pointer belong to commits that never completed.
        (1..=pointer)
            .rev()
            .map(|version| self.load(&dir, version, version == pointer))
            .collect()
    }

    fn version(&self, unit_id: &str, version: u32) -> StoreResult<Option<AnalysisSnapshot>> {
        let dir = self.unit_dir(unit_id);
        match Self::read_pointer(&dir)? {
            Some(pointer) if version >= 1 && version <= pointer => {
                self.load(&dir, version, version == pointer).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn units(&self) -> StoreResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let path = entry.path();
            if !path.join(CURRENT_POINTER).is_file() {
                continue;
            }
            if let Some(unit) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(decode_unit_dir)
            {
                units.push(unit);
            }
        }
        units.sort();
        Ok(units)
    }

    fn compare_and_append(
        &self,
        expected: Option<u32>,
        mut snapshot: AnalysisSnapshot,
    ) -> StoreResult<()> {
        let dir = self.unit_dir(&snapshot.unit_id);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let _lock = self.lock(&dir)?;

        let found = Self::read_pointer(&dir)?;
        check_expected(&snapshot.unit_id, expected, found, snapshot.version)?;

        snapshot.current = true;
        snapshot.quality = None;
        let version = snapshot.version;
        write_json_atomic(&Self::snapshot_path(&dir, version), &snapshot)?;
        write_atomic(&dir.join(CURRENT_POINTER), version.to_string().as_bytes())?;
        debug!(
            "Committed '{}' v{version} under {:?}",
            snapshot.unit_id, dir
        );
        Ok(())
    }

    fn record_quality(
        &self,
        unit_id: &str,
        version: u32,
        report: &QualityReport,
    ) -> StoreResult<()> {
        let dir = self.unit_dir(unit_id);
        let path = Self::quality_path(&dir, version);
        if path.exists() {
            return Ok(());
        }
        write_json_atomic(&path, report)
    }
}

/// Exclusive commit lock for one unit directory; released on drop.
struct CommitLock {
    path: PathBuf,
}

impl Drop for CommitLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Age of an existing lock file, from its recorded timestamp or, when that
/// is unreadable, its modification time. `None` once the file is gone.
fn lock_age(path: &Path) -> Option<Duration> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(_) => String::new(),
    };
    let stamped = raw
        .split_whitespace()
        .nth(1)
        .and_then(|millis| millis.parse::<i64>().ok());
    match stamped {
        Some(created_ms) => {
            let elapsed = Utc::now().timestamp_millis().saturating_sub(created_ms);
            Some(Duration::from_millis(elapsed.max(0) as u64))
        }
        None => {
            let modified = fs::metadata(path).and_then(|meta| meta.modified());
            match modified {
                Ok(modified) => Some(modified.elapsed().unwrap_or_default()),
                Err(err) if err.kind() == ErrorKind::NotFound => None,
                Err(_) => Some(Duration::ZERO),
            }
        }
    }
}

/// Moves an abandoned lock aside before deleting it, so two writers racing to
/// reclaim the same lock cannot delete a lock freshly taken by a third.
fn reclaim_stale_lock(path: &Path, age: Duration) -> StoreResult<()> {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let aside = path.with_extension(format!("lock.stale-{}-{nanos}", std::process::id()));
    match fs::rename(path, &aside) {
        Ok(()) => {
            warn!(
                "Reclaimed commit lock {:?} abandoned {}s ago",
                path,
                age.as_secs()
            );
            fs::remove_file(&aside).map_err(|e| StoreError::io(&aside, e))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Serialization {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Percent-encodes every byte outside `[a-z0-9_-]` so any unit id maps to a
/// single, reversible directory name.
fn encode_unit_dir(unit_id: &str) -> String {
    let mut encoded = String::with_capacity(unit_id.len());
    for byte in unit_id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    if encoded.is_empty() {
        encoded.push('%');
    }
    encoded
}

fn decode_unit_dir(name: &str) -> Option<String> {
    if name == "%" {
        return Some(String::new());
    }
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = name.get(idx + 1..idx + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            idx += 3;
        } else {
            decoded.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
