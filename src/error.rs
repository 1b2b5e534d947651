//! Error taxonomy for the ingestion engine and its snapshot stores.
//!
//! Row-level problems never surface here: blank cells, unparsable dates and
//! unparsable salaries degrade to default labels or zero during
//! normalization. Only batch-level, commit-level and storage failures do.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "Unit '{unit}' moved from version {expected:?} to {found:?} while committing"
    )]
    Conflict {
        unit: String,
        expected: Option<u32>,
        found: Option<u32>,
    },
    #[error("Timed out acquiring commit lock {path:?}")]
    LockTimeout { path: PathBuf },
    #[error("I/O failure on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed snapshot data in {path:?}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Snapshot store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Roster batch '{file}' contains no rows")]
    EmptyInput { file: String },
    #[error("Gave up committing unit '{unit}' after {attempts} conflicting attempt(s)")]
    VersionConflict { unit: String, attempts: u32 },
    #[error("No snapshot found for unit '{unit}'")]
    NotFound { unit: String },
    #[error("Unit '{unit}' has no snapshot version {version}")]
    VersionNotFound { unit: String, version: u32 },
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
