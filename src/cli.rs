use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Versioned personnel-roster analytics per organizational unit",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest a roster export and commit one snapshot per organizational unit
    Ingest(IngestArgs),
    /// Show the current (or a historical) snapshot of a unit
    Current(CurrentArgs),
    /// List every snapshot version of a unit, newest first
    History(HistoryArgs),
    /// Compare the current snapshots of two units
    Compare(CompareArgs),
    /// List units that have a current snapshot
    Units(StoreArgs),
    /// Totals and size classes across all current snapshots
    Overview(StoreArgs),
    /// Consolidate one dimension across all current snapshots
    Dimension(DimensionArgs),
    /// Manage engine configuration files
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Snapshot store directory
    #[arg(long, default_value = "snapshots")]
    pub store: PathBuf,
    /// YAML engine configuration (column names, commit retries)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Roster export to ingest ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Column holding the organizational unit (defaults to the configured one)
    #[arg(short = 'u', long = "unit-column")]
    pub unit_column: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Reference date for age and tenure ranges (YYYY-MM-DD, defaults to now)
    #[arg(long = "as-of")]
    pub as_of: Option<String>,
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct CurrentArgs {
    /// Unit id or name
    #[arg(short = 'u', long = "unit")]
    pub unit: String,
    /// Show this historical version instead of the current one
    #[arg(long)]
    pub version: Option<u32>,
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Unit id or name
    #[arg(short = 'u', long = "unit")]
    pub unit: String,
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// First unit id or name
    #[arg(long)]
    pub left: String,
    /// Second unit id or name
    #[arg(long)]
    pub right: String,
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct DimensionArgs {
    /// Dimension key (contratacion, funcion, escalafon, edad, antiguedad, genero, departamento, subdepartamento, cargo)
    #[arg(short = 'n', long = "name")]
    pub name: String,
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write the default configuration to a YAML file
    Init {
        /// Destination YAML file
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
