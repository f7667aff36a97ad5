//! Command-line runner for datamap mapping executions.
//!
//! This binary wires JSON configuration files into the core engine: it can
//! probe target connectivity, introspect target schemas, suggest and validate
//! field mappings, dry-run a mapping against live source data, and execute the
//! full fetch-transform-write pipeline.
//!
//! # Security Guarantees
//! - Credentials are read from configuration files and never logged
//! - Connection URLs are redacted in every error message

use clap::{Args, Parser, Subcommand};
use datamap_core::engine::DEFAULT_SAMPLE_SIZE;
use datamap_core::{
    create_adapter, logging::init_logging, matcher, source, validator, ConnectionConfig,
    DataMapError, ExecutionStatus, MappingEngine, MappingSpec, Result, SourceRequest,
    TableDescriptor,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "datamap")]
#[command(about = "Cross-database data-mapping runner")]
#[command(version)]
#[command(long_about = "
datamap - API-to-database data mapping runner

This tool fetches records from an HTTP source, applies a declarative
field-mapping specification, and writes the transformed records to a
PostgreSQL, MySQL, SQL Server or MongoDB target in batches.

CONFIGURATION FILES (JSON):
- connection: target database parameters (type, host, credentials)
- source:     HTTP request (url, method, headers, auth)
- mapping:    field mappings, transforms, target table, batch size

EXAMPLES:
  datamap test-connection --connection conn.json
  datamap schema --connection conn.json
  datamap suggest --connection conn.json --source src.json --table users
  datamap validate --connection conn.json --source src.json --mapping map.json
  datamap test --connection conn.json --source src.json --mapping map.json
  datamap run --connection conn.json --source src.json --mapping map.json
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all output except errors")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Probe target database connectivity
    TestConnection(ConnectionArgs),
    /// Introspect the target database structure
    Schema(ConnectionArgs),
    /// Suggest field mappings from a live source sample
    Suggest(SuggestArgs),
    /// Check mapping type compatibility against the target schema
    Validate(PipelineArgs),
    /// Dry-run the mapping on a source sample without writing
    Test(TestArgs),
    /// Execute the full fetch-transform-write pipeline
    Run(PipelineArgs),
}

#[derive(Args)]
struct ConnectionArgs {
    /// Target connection configuration file
    #[arg(short, long, value_name = "FILE")]
    connection: PathBuf,
}

#[derive(Args)]
struct SuggestArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Source request configuration file
    #[arg(short, long, value_name = "FILE")]
    source: PathBuf,

    /// Target table or collection to map into
    #[arg(short, long)]
    table: String,
}

#[derive(Args)]
struct PipelineArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Source request configuration file
    #[arg(short, long, value_name = "FILE")]
    source: PathBuf,

    /// Mapping specification file
    #[arg(short, long, value_name = "FILE")]
    mapping: PathBuf,
}

#[derive(Args)]
struct TestArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Number of source records to preview
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    sample_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    match cli.command {
        Command::TestConnection(args) => test_connection(&args).await,
        Command::Schema(args) => show_schema(&args).await,
        Command::Suggest(args) => suggest_mappings(&args).await,
        Command::Validate(args) => validate_mapping(&args).await,
        Command::Test(args) => test_mapping(&args).await,
        Command::Run(args) => run_mapping(&args).await,
    }
}

/// Loads and deserializes one JSON configuration file.
fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        DataMapError::configuration(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        DataMapError::configuration(format!("invalid JSON in {}: {}", path.display(), e))
    })
}

/// Prints a value as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|e| DataMapError::Serialization {
            context: "rendering output".to_string(),
            source: e,
        })?;
    println!("{rendered}");
    Ok(())
}

/// Probes connectivity and reports server facts. Exits non-zero when the
/// probe fails.
async fn test_connection(args: &ConnectionArgs) -> Result<()> {
    let config: ConnectionConfig = load_json(&args.connection)?;

    info!("Testing connection to {}", config);
    let adapter = create_adapter(&config).await.map_err(|e| {
        error!("Failed to create database adapter: {}", e);
        e
    })?;

    let probe = adapter.test_connection().await;
    adapter.close().await;
    print_json(&probe)?;

    if !probe.ok {
        std::process::exit(1);
    }
    info!("✓ Connection test successful");
    Ok(())
}

/// Introspects and prints the target database structure.
async fn show_schema(args: &ConnectionArgs) -> Result<()> {
    let config: ConnectionConfig = load_json(&args.connection)?;

    let adapter = create_adapter(&config).await?;
    let schema = adapter.get_schema().await;
    adapter.close().await;

    let schema = schema.map_err(|e| {
        error!("Schema introspection failed: {}", e);
        e
    })?;

    info!("Found {} tables/collections", schema.tables.len());
    print_json(&schema)
}

/// Looks up the named table in the target schema.
async fn target_table(
    adapter: &dyn datamap_core::DatabaseAdapter,
    name: &str,
) -> Result<TableDescriptor> {
    let schema = adapter.get_schema().await?;
    schema.table(name).cloned().ok_or_else(|| {
        DataMapError::configuration(format!(
            "table '{}' not found in target database (found: {})",
            name,
            schema
                .tables
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

/// Fetches the source and returns the first extracted record.
async fn first_record(path: &Path) -> Result<serde_json::Value> {
    let request: SourceRequest = load_json(path)?;
    let payload = source::fetch(&request).await?;
    source::extract_records(payload)
        .into_iter()
        .next()
        .ok_or_else(|| DataMapError::fetch("source returned no records"))
}

/// Suggests field mappings from a live source sample.
async fn suggest_mappings(args: &SuggestArgs) -> Result<()> {
    let config: ConnectionConfig = load_json(&args.connection.connection)?;

    let adapter = create_adapter(&config).await?;
    let table = target_table(adapter.as_ref(), &args.table).await;
    adapter.close().await;
    let table = table?;

    let sample = first_record(&args.source).await?;
    let suggestions = matcher::suggest_mappings(&sample, &table);

    info!("Produced {} suggestions", suggestions.len());
    print_json(&suggestions)
}

/// Checks mapping type compatibility against the target schema.
async fn validate_mapping(args: &PipelineArgs) -> Result<()> {
    let config: ConnectionConfig = load_json(&args.connection.connection)?;
    let spec: MappingSpec = load_json(&args.mapping)?;
    spec.validate()?;

    let adapter = create_adapter(&config).await?;
    let table = target_table(adapter.as_ref(), &spec.target_table).await;
    adapter.close().await;
    let table = table?;

    let sample = first_record(&args.source).await?;
    let verdicts = validator::validate_mappings(&spec.field_mappings, &sample, &table);

    let incompatible = verdicts.values().filter(|v| !v.compatible).count();
    if incompatible > 0 {
        error!("{} incompatible mappings", incompatible);
    }
    print_json(&verdicts)?;

    if incompatible > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Builds the engine from the three configuration files.
async fn build_engine(args: &PipelineArgs) -> Result<MappingEngine> {
    let config: ConnectionConfig = load_json(&args.connection.connection)?;
    let request: SourceRequest = load_json(&args.source)?;
    let spec: MappingSpec = load_json(&args.mapping)?;

    let adapter = create_adapter(&config).await?;
    MappingEngine::new(spec, request, adapter)
}

/// Dry-runs the mapping on a source sample. Nothing is written.
async fn test_mapping(args: &TestArgs) -> Result<()> {
    let engine = build_engine(&args.pipeline).await?;
    let preview = engine.test(args.sample_size).await;
    engine.close().await;

    let preview = preview?;
    info!("Previewed {} records", preview.sample_size);
    print_json(&preview)
}

/// Executes the full pipeline and exits non-zero on a failed run.
async fn run_mapping(args: &PipelineArgs) -> Result<()> {
    let engine = build_engine(args).await?;

    let result = engine.execute().await;
    engine.close().await;

    // Bounded error preview; the full list stays in the result for callers
    // embedding the core crate
    let report = serde_json::json!({
        "status": result.status,
        "total_records": result.total_records,
        "processed_records": result.processed_records,
        "failed_records": result.failed_records,
        "execution_time_ms": result.execution_time_ms,
        "errors": result.error_preview(),
    });
    print_json(&report)?;

    if result.status == ExecutionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
