//! Roster batches: the raw header and rows of one uploaded export.

use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::io_utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterBatch {
    pub file_name: String,
    /// Hex SHA-256 of the uploaded bytes.
    pub digest: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RosterBatch {
    /// Builds a batch from rows already in memory. The digest covers the
    /// header and every cell, so identical content gives identical digests.
    pub fn from_rows(file_name: &str, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut hasher = Sha256::new();
        for row in std::iter::once(&headers).chain(rows.iter()) {
            for cell in row {
                hasher.update(cell.as_bytes());
                hasher.update([0x1f]);
            }
            hasher.update([0x1e]);
        }
        Self {
            file_name: file_name.to_string(),
            digest: hex_digest(hasher),
            headers,
            rows,
        }
    }

    pub fn read(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let bytes = io_utils::read_input_bytes(path)?;
        let file_name = if io_utils::is_dash(path) {
            "stdin".to_string()
        } else {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        };
        Self::parse(&file_name, &bytes, delimiter, encoding)
            .with_context(|| format!("Reading roster {path:?}"))
    }

    pub fn parse(
        file_name: &str,
        bytes: &[u8],
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);

        let mut reader = io_utils::open_csv_reader(bytes, delimiter);
        let headers = io_utils::reader_headers(&mut reader, encoding)?;
        debug!("Roster headers: {:?}", headers);

        let mut rows = Vec::new();
        let mut lossy_rows = 0usize;
        for (row_idx, record) in reader.byte_records().enumerate() {
            let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
            if record.iter().all(|field| field.iter().all(u8::is_ascii_whitespace)) {
                continue;
            }
            let (decoded, replaced) = io_utils::decode_record_lossy(&record, encoding);
            if replaced {
                lossy_rows += 1;
                debug!("Row {} has bytes invalid in {}", row_idx + 2, encoding.name());
            }
            rows.push(decoded);
        }
        if lossy_rows > 0 {
            warn!(
                "{lossy_rows} row(s) of '{file_name}' are not valid {}; undecodable bytes were replaced",
                encoding.name()
            );
        }
        info!(
            "Read {} roster row(s) across {} column(s) from '{file_name}'",
            rows.len(),
            headers.len()
        );
        Ok(Self {
            file_name: file_name.to_string(),
            digest: hex_digest(hasher),
            headers,
            rows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
