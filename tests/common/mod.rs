#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

pub const ROSTER_HEADER: &str = "SECRETARIA,TIPO_CONTRATACION,FUNCION,ESCALAFON,FECHA_NACIMIENTO,FECHA_INGRESO,GENERO,SUELDO_BASICO,DEPARTAMENTO,SUBDEPARTAMENTO,CARGO";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory used as the snapshot store root.
    pub fn store_dir(&self) -> PathBuf {
        self.temp_dir.path().join("snapshots")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a roster export with the full default header and the given rows.
    pub fn write_roster(&self, name: &str, rows: &[&str]) -> PathBuf {
        let mut contents = String::from(ROSTER_HEADER);
        contents.push('\n');
        for row in rows {
            contents.push_str(row);
            contents.push('\n');
        }
        self.write(name, &contents)
    }
}

/// One roster row in default column order.
pub fn roster_row(unit: &str, contract: &str, gender: &str, salary: &str) -> String {
    format!(
        "{unit},{contract},Administrativa,Cat 10,1985-03-14,2015-02-01,{gender},{salary},Rentas,Recaudacion,Analista"
    )
}
