pub mod analytics;
pub mod batch;
pub mod bucketing;
pub mod cli;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod frequency;
pub mod io_utils;
pub mod quality;
pub mod record;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod table;
pub mod versioning;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde::Serialize;

use crate::{
    batch::RosterBatch,
    cli::{Cli, Commands, ConfigCommands},
    config::EngineConfig,
    engine::{Engine, UnitOutcome},
    frequency::Dimension,
    snapshot::AnalysisSnapshot,
    store::FileStore,
    table::{Align, Table, format_amount, format_delta, format_percent},
};

pub use crate::{
    engine::SnapshotResult,
    error::{EngineError, StoreError},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("roster_analytics", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Current(args) => handle_current(&args),
        Commands::History(args) => handle_history(&args),
        Commands::Compare(args) => handle_compare(&args),
        Commands::Units(args) => handle_units(&args),
        Commands::Overview(args) => handle_overview(&args),
        Commands::Dimension(args) => handle_dimension(&args),
        Commands::Config(args) => match args.command {
            ConfigCommands::Init { output, force } => handle_config_init(&output, force),
        },
    }
}

fn open_engine(args: &cli::StoreArgs) -> Result<Engine<FileStore>> {
    let config = EngineConfig::load_or_default(args.config.as_deref())?;
    let store = FileStore::open(&args.store, config.lock_timeout())
        .with_context(|| format!("Opening snapshot store {:?}", args.store))?
        .with_stale_lock_age(config.stale_lock_age());
    debug!("Using snapshot store {:?}", store.root());
    Ok(Engine::new(store, config))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Serializing output to JSON")?;
    println!("{rendered}");
    Ok(())
}

fn parse_as_of(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        Some(value) => data::parse_naive_date(value)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .map(|dt| dt.and_utc())
            .ok_or_else(|| anyhow!("Invalid --as-of date '{value}'")),
        None => Ok(Utc::now()),
    }
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    info!(
        "Ingesting '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );
    let now = parse_as_of(args.as_of.as_deref())?;
    let engine = open_engine(&args.store)?;
    let batch = RosterBatch::read(&args.input, delimiter, encoding)?;
    let results = engine
        .ingest_at(&batch, args.unit_column.as_deref(), now)
        .with_context(|| format!("Ingesting {:?}", args.input))?;

    if args.store.json {
        print_json(&results)?;
    } else {
        print_ingest_results(&results);
    }

    let failed = results.iter().filter(|r| !r.is_committed()).count();
    if failed > 0 {
        bail!("{failed} of {} unit(s) failed to commit", results.len());
    }
    Ok(())
}

fn print_ingest_results(results: &[SnapshotResult]) {
    let mut table = Table::new([
        ("unit", Align::Left),
        ("records", Align::Right),
        ("status", Align::Left),
        ("version", Align::Right),
        ("quality", Align::Right),
        ("headcount Δ", Align::Right),
    ]);
    for result in results {
        let row = match &result.outcome {
            UnitOutcome::Committed {
                version,
                trend,
                quality,
                ..
            } => vec![
                result.unit_id.clone(),
                result.record_count.to_string(),
                "committed".to_string(),
                version.to_string(),
                quality.score.to_string(),
                trend.map(|t| format_delta(t.headcount)).unwrap_or_default(),
            ],
            UnitOutcome::Failed { message, .. } => vec![
                result.unit_id.clone(),
                result.record_count.to_string(),
                format!("failed: {message}"),
                String::new(),
                String::new(),
                String::new(),
            ],
        };
        table.push(row);
    }
    table.print();
    for result in results {
        if let UnitOutcome::Committed { quality, .. } = &result.outcome {
            for problem in &quality.problems {
                println!(
                    "  {} [{}] {}: {}",
                    result.unit_id, problem.severity, problem.field, problem.description
                );
            }
        }
    }
}

fn handle_current(args: &cli::CurrentArgs) -> Result<()> {
    let engine = open_engine(&args.store)?;
    let snapshot = match args.version {
        Some(version) => engine.get_version(&args.unit, version)?,
        None => engine.get_current(&args.unit)?,
    };
    if args.store.json {
        return print_json(&snapshot);
    }
    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(snapshot: &AnalysisSnapshot) {
    println!(
        "{} ({}) version {}{}",
        snapshot.unit_name,
        snapshot.unit_id,
        snapshot.version,
        if snapshot.current { " [current]" } else { "" }
    );
    println!(
        "source: {} ({} record(s), ingested {})",
        snapshot.source.name,
        snapshot.source.record_count,
        snapshot.source.ingested_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("headcount: {}", snapshot.headcount);
    let salary = &snapshot.salary;
    println!(
        "salary: average {} min {} max {} mass {}",
        format_amount(salary.average),
        format_amount(salary.min),
        format_amount(salary.max),
        format_amount(salary.mass)
    );
    if let Some(trend) = &snapshot.trend {
        println!(
            "trend vs v{}: headcount {} mass {} average {}",
            trend.previous_version,
            format_delta(trend.headcount),
            format_delta(trend.mass),
            format_delta(trend.average_salary)
        );
    }
    if let Some(quality) = &snapshot.quality {
        println!("quality: {}/{}", quality.score, crate::quality::MAX_SCORE);
    }
    for (dimension, buckets) in &snapshot.dimensions {
        println!();
        let mut table = Table::new([
            (dimension.key(), Align::Left),
            ("count", Align::Right),
            ("percent", Align::Right),
        ]);
        for bucket in buckets {
            table.push(vec![
                bucket.label.clone(),
                bucket.count.to_string(),
                format_percent(bucket.percentage),
            ]);
        }
        table.print();
    }
}

fn handle_history(args: &cli::HistoryArgs) -> Result<()> {
    let engine = open_engine(&args.store)?;
    let history = engine.get_history(&args.unit)?;
    if args.store.json {
        return print_json(&history);
    }
    let mut table = Table::new([
        ("version", Align::Right),
        ("current", Align::Left),
        ("created", Align::Left),
        ("file", Align::Left),
        ("records", Align::Right),
        ("mass", Align::Right),
        ("quality", Align::Right),
    ]);
    for snapshot in &history {
        table.push(vec![
            snapshot.version.to_string(),
            if snapshot.current { "yes" } else { "" }.to_string(),
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            snapshot.source.name.clone(),
            snapshot.source.record_count.to_string(),
            format_amount(snapshot.salary.mass),
            snapshot
                .quality
                .as_ref()
                .map(|q| q.score.to_string())
                .unwrap_or_default(),
        ]);
    }
    table.print();
    Ok(())
}

fn handle_compare(args: &cli::CompareArgs) -> Result<()> {
    let engine = open_engine(&args.store)?;
    let comparison = engine.compare(&args.left, &args.right)?;
    if args.store.json {
        return print_json(&comparison);
    }
    let mut table = Table::new([
        ("", Align::Left),
        ("headcount", Align::Right),
        ("average", Align::Right),
        ("mass", Align::Right),
    ]);
    for side in [&comparison.left, &comparison.right] {
        table.push(vec![
            format!("{} v{}", side.unit_id, side.version),
            side.headcount.to_string(),
            format_amount(side.average_salary),
            format_amount(side.mass),
        ]);
    }
    let diff = &comparison.differences;
    table.push(vec![
        "difference".to_string(),
        diff.headcount.to_string(),
        format_amount(diff.average_salary),
        format_amount(diff.mass),
    ]);
    table.print();
    Ok(())
}

fn handle_units(args: &cli::StoreArgs) -> Result<()> {
    let engine = open_engine(args)?;
    let units = engine.list_units()?;
    if args.json {
        return print_json(&units);
    }
    if units.is_empty() {
        println!("No snapshots stored.");
        return Ok(());
    }
    let mut table = Table::new([
        ("unit", Align::Left),
        ("name", Align::Left),
        ("headcount", Align::Right),
        ("version", Align::Right),
        ("updated", Align::Left),
    ]);
    for unit in &units {
        table.push(vec![
            unit.unit_id.clone(),
            unit.unit_name.clone(),
            unit.headcount.to_string(),
            unit.version.to_string(),
            unit.last_ingested_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    table.print();
    Ok(())
}

fn handle_overview(args: &cli::StoreArgs) -> Result<()> {
    let engine = open_engine(args)?;
    let overview = engine.overview()?;
    if args.json {
        return print_json(&overview);
    }
    println!(
        "units: {}  headcount: {}  payroll mass: {}",
        overview.unit_count,
        overview.total_headcount,
        format_amount(overview.total_mass)
    );
    println!(
        "small: {}  medium: {}  large: {}",
        overview.size_classes.small, overview.size_classes.medium, overview.size_classes.large
    );
    let mut table = Table::new([
        ("unit", Align::Left),
        ("headcount", Align::Right),
        ("mass", Align::Right),
    ]);
    for row in &overview.units {
        table.push(vec![
            row.unit_name.clone(),
            row.headcount.to_string(),
            format_amount(row.mass),
        ]);
    }
    if !table.is_empty() {
        table.print();
    }
    Ok(())
}

fn handle_dimension(args: &cli::DimensionArgs) -> Result<()> {
    let dimension = args.name.parse::<Dimension>()?;
    let engine = open_engine(&args.store)?;
    let consolidated = engine.consolidate(dimension)?;
    if args.store.json {
        return print_json(&consolidated);
    }
    let mut table = Table::new([
        (dimension.key(), Align::Left),
        ("count", Align::Right),
        ("percent", Align::Right),
    ]);
    for bucket in &consolidated.buckets {
        table.push(vec![
            bucket.label.clone(),
            bucket.count.to_string(),
            format_percent(bucket.percentage),
        ]);
    }
    table.print();
    info!(
        "Consolidated '{}' over {} record(s)",
        dimension, consolidated.total
    );
    Ok(())
}

fn handle_config_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("Config file {output:?} already exists; pass --force to overwrite");
    }
    EngineConfig::default()
        .save(output)
        .with_context(|| format!("Writing default config to {output:?}"))?;
    info!("Default configuration written to {output:?}");
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
