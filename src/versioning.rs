//! Version assignment and the optimistic commit loop.
//!
//! A commit reads the unit's current snapshot, numbers the draft one above
//! it and hands both to [`SnapshotStore::compare_and_append`]. If another
//! ingestion committed in between, the whole transition is retried against a
//! fresh read, up to the configured number of attempts.

use std::{thread, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::{
    error::{EngineError, EngineResult},
    snapshot::{AnalysisSnapshot, SnapshotDraft, Trend},
    store::SnapshotStore,
};

#[derive(Debug, Clone)]
pub struct Commit {
    pub snapshot: AnalysisSnapshot,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

pub struct VersionManager<'a, S: SnapshotStore + ?Sized> {
    store: &'a S,
    max_attempts: u32,
    backoff: Duration,
}

impl<'a, S: SnapshotStore + ?Sized> VersionManager<'a, S> {
    pub fn new(store: &'a S, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn commit(&self, draft: &SnapshotDraft, now: DateTime<Utc>) -> EngineResult<Commit> {
        for attempt in 1..=self.max_attempts {
            let existing = self.store.current(&draft.unit_id)?;
            let expected = existing.as_ref().map(|s| s.version);
            let version = expected.map_or(1, |v| v + 1);
            let trend = existing.as_ref().map(|previous| Trend::between(previous, draft));
            let snapshot = draft.clone().into_snapshot(version, now, trend);

            match self.store.compare_and_append(expected, snapshot.clone()) {
                Ok(()) => {
                    info!(
                        "Committed '{}' as version {version} ({} record(s))",
                        draft.unit_id, draft.headcount
                    );
                    return Ok(Commit {
                        snapshot,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_conflict() => {
                    warn!(
                        "Commit attempt {attempt}/{} for '{}' lost a race: {err}",
                        self.max_attempts, draft.unit_id
                    );
                    if attempt < self.max_attempts && !self.backoff.is_zero() {
                        thread::sleep(self.backoff * attempt);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        debug!("Exhausted commit attempts for '{}'", draft.unit_id);
        Err(EngineError::VersionConflict {
            unit: draft.unit_id.clone(),
            attempts: self.max_attempts,
        })
    }
}
