//! Engine configuration: roster header names and commit tuning.
//!
//! Loaded from YAML; every field has a default so a partial file (or no file
//! at all) is valid.

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_UNIT_COLUMN: &str = "SECRETARIA";
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Header names of the fixed roster column set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub unit: String,
    pub contract_type: String,
    pub function: String,
    pub salary_scale: String,
    pub birth_date: String,
    pub hire_date: String,
    pub gender: String,
    pub base_salary: String,
    pub department: String,
    pub subdepartment: String,
    pub position: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            unit: DEFAULT_UNIT_COLUMN.to_string(),
            contract_type: "TIPO_CONTRATACION".to_string(),
            function: "FUNCION".to_string(),
            salary_scale: "ESCALAFON".to_string(),
            birth_date: "FECHA_NACIMIENTO".to_string(),
            hire_date: "FECHA_INGRESO".to_string(),
            gender: "GENERO".to_string(),
            base_salary: "SUELDO_BASICO".to_string(),
            department: "DEPARTAMENTO".to_string(),
            subdepartment: "SUBDEPARTAMENTO".to_string(),
            position: "CARGO".to_string(),
        }
    }
}

impl ColumnMap {
    pub fn with_unit_column(mut self, unit_column: &str) -> Self {
        let trimmed = unit_column.trim();
        if !trimmed.is_empty() {
            self.unit = trimmed.to_string();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub columns: ColumnMap,
    /// Commit attempts per unit before reporting a version conflict.
    pub max_commit_attempts: u32,
    pub retry_backoff_ms: u64,
    pub lock_timeout_ms: u64,
    /// Age after which a leftover commit lock is reclaimed.
    pub stale_lock_ms: u64,
    /// Units committed in parallel; 0 uses the available parallelism.
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMap::default(),
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            retry_backoff_ms: 10,
            lock_timeout_ms: 5_000,
            stale_lock_ms: 60_000,
            max_workers: 0,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .with_context(|| format!("Reading config file {path:?}"))?;
        let mut config: EngineConfig =
            serde_yaml::from_str(&raw).with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.max_commit_attempts = config.max_commit_attempts.max(1);
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_yaml::to_string(self).context("Serializing config to YAML")?;
        let mut file =
            File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        file.write_all(serialized.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_millis(self.stale_lock_ms)
    }
}
