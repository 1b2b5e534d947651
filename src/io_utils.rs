//! Delimited-file reading for roster exports.
//!
//! - **Delimiter resolution**: `.tsv` → tab, anything else → comma, with
//!   manual override.
//! - **Encoding**: input decoded via `encoding_rs`, defaulting to UTF-8.
//!   Payroll exports from older systems are frequently Latin-1.
//! - **stdin**: the `-` path reads standard input.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Reads the whole input into memory; the bytes are needed twice, once for
/// the content digest and once for parsing.
pub fn read_input_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading roster from stdin")?;
    } else {
        BufReader::new(File::open(path).with_context(|| format!("Opening input file {path:?}"))?)
            .read_to_end(&mut bytes)
            .with_context(|| format!("Reading input file {path:?}"))?;
    }
    Ok(bytes)
}

/// Roster exports are often ragged (trailing optional columns dropped), so
/// rows may be shorter or longer than the header.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Decodes a record, replacing undecodable bytes with U+FFFD. The flag
/// reports whether any replacement happened.
pub fn decode_record_lossy(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> (Vec<String>, bool) {
    let mut replaced = false;
    let fields = record
        .iter()
        .map(|field| {
            let (text, had_errors) = encoding.decode_without_bom_handling(field);
            replaced |= had_errors;
            text.into_owned()
        })
        .collect();
    (fields, replaced)
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    let mut decoded = decode_record(&headers, encoding)?;
    if let Some(first) = decoded.first_mut() {
        // Spreadsheet tools like to prepend a BOM to UTF-8 exports.
        *first = first.trim_start_matches('\u{feff}').to_string();
    }
    Ok(decoded)
}
