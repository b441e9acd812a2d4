use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};

use warehouse_sync::app::ingest_use_case::{IngestOutcome, IngestUseCase};
use warehouse_sync::app::ports::RenderQuery;
use warehouse_sync::app::validate_use_case::{ValidateUseCase, ValidationReport};
use warehouse_sync::config::{JobConfig, SourceConfig, WarehouseConfig};
use warehouse_sync::error::{Result, SyncError};
use warehouse_sync::infra::in_memory::InMemoryWarehouse;
use warehouse_sync::infra::postgres_source::PostgresConnector;
use warehouse_sync::infra::snowflake_warehouse::{LoadSettings, SnowflakeConnector};
use warehouse_sync::pipeline::compare::ValidationOutcome;
use warehouse_sync::pipeline::normalize::TimestampNormalizer;
use warehouse_sync::types::Identifier;
use warehouse_sync::{logging, metrics};

#[derive(Parser)]
#[command(name = "warehouse_sync")]
#[command(about = "Copy a Postgres table into Snowflake as naive UTC and verify the timestamps")]
#[command(version)]
struct Cli {
    /// Job settings file (defaults to ./warehouse_sync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overwrite the warehouse table with the current source rows
    Ingest {
        /// Source table name (overrides the config file)
        #[arg(long)]
        table: Option<String>,
        /// Read and normalize, but load into memory instead of Snowflake
        #[arg(long)]
        dry_run: bool,
    },
    /// Compare rendered timestamps for one run date across both stores
    Validate {
        /// Business date to compare, YYYY-MM-DD
        #[arg(long)]
        run_date: NaiveDate,
        #[arg(long)]
        table: Option<String>,
        /// Comma-separated join key; rows are paired by position when omitted
        #[arg(long)]
        key: Option<String>,
        /// Exit with status 2 when any mismatch is found
        #[arg(long)]
        strict: bool,
        /// Write the full result as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn load_settings(job: &JobConfig) -> LoadSettings {
    LoadSettings {
        connect_timeout: job.connect_timeout(),
        statement_timeout: job.statement_timeout(),
        poll_interval: job.poll_interval(),
        insert_batch_rows: job.insert_batch_rows,
    }
}

fn table_override(job: &JobConfig, table: Option<String>) -> Result<Identifier> {
    match table {
        Some(t) => Identifier::new(t),
        None => Ok(job.table.clone()),
    }
}

/// What a finished subcommand produced.
enum RunOutcome {
    Ingested,
    Validated(ValidationOutcome),
}

/// Metrics status label and process exit status for a finished run.
fn exit_status(result: &Result<RunOutcome>, strict: bool) -> (&'static str, u8) {
    match result {
        Ok(RunOutcome::Ingested) => ("success", 0),
        Ok(RunOutcome::Validated(outcome)) if outcome.is_clean() => ("success", 0),
        Ok(RunOutcome::Validated(_)) if strict => ("mismatch", 2),
        Ok(RunOutcome::Validated(_)) => ("mismatch", 0),
        Err(e) => (e.kind(), 1),
    }
}

async fn run_ingest(job: &JobConfig, table: Option<String>, dry_run: bool) -> Result<()> {
    let table = table_override(job, table)?;
    let source = PostgresConnector::new(
        SourceConfig::from_env()?,
        job.connect_timeout(),
        job.statement_timeout(),
    );
    let normalizer = TimestampNormalizer::new(&job.timestamp_columns);

    if dry_run {
        println!("🧪 Dry run: loading {} into memory", table);
        let warehouse = InMemoryWarehouse::new();
        let uc = IngestUseCase::new(Box::new(source), Box::new(warehouse.clone()), normalizer);
        let outcome = uc.run(&table).await?;
        print_ingest(&outcome);
        if let Some(data) = warehouse.table(table.as_str()) {
            println!("   columns: {}", data.columns.join(", "));
            for row in data.rows.iter().take(5) {
                let cells: Vec<String> = row.iter().map(|v| v.display()).collect();
                println!("   {}", cells.join(" | "));
            }
        }
        return Ok(());
    }

    let warehouse = SnowflakeConnector::new(WarehouseConfig::from_env()?, load_settings(job));
    println!("🔄 Ingesting {}...", table);
    let uc = IngestUseCase::new(Box::new(source), Box::new(warehouse), normalizer);
    let outcome = uc.run(&table).await?;
    print_ingest(&outcome);
    Ok(())
}

fn print_ingest(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::NoData => println!("⚠️  No data found in source table, nothing loaded"),
        IngestOutcome::Loaded {
            table,
            rows_written,
            chunks,
        } => println!("✅ Loaded {} rows into {} ({} chunks)", rows_written, table, chunks),
    }
}

async fn run_validate(
    job: &JobConfig,
    run_date: NaiveDate,
    table: Option<String>,
    key: Option<String>,
    report_path: Option<PathBuf>,
) -> Result<ValidationReport> {
    let query = RenderQuery {
        table: table_override(job, table)?,
        date_column: job.date_column.clone(),
        run_date,
        timestamp_columns: job.timestamp_columns.clone(),
        key_columns: match key {
            Some(k) => Identifier::parse_list(&k)?,
            None => job.key_columns.clone(),
        },
    };

    let source = PostgresConnector::new(
        SourceConfig::from_env()?,
        job.connect_timeout(),
        job.statement_timeout(),
    );
    let warehouse = SnowflakeConnector::new(WarehouseConfig::from_env()?, load_settings(job));

    println!("🔍 Validating {} for {}...", query.table, run_date);
    let report = ValidateUseCase::new(Box::new(source), Box::new(warehouse))
        .run(&query)
        .await?;

    if report.is_clean() {
        println!("✅ {} ({} comparisons)", report.outcome, report.outcome.comparisons());
    } else {
        println!("❌ {}", report.outcome);
    }

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| SyncError::Config(format!("Failed to serialize report: {e}")))?;
        std::fs::write(&path, json).map_err(|e| {
            SyncError::Config(format!("Failed to write report '{}': {}", path.display(), e))
        })?;
        println!("📄 Report written to {}", path.display());
    }
    Ok(report)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    let started = Instant::now();

    let job = match JobConfig::load(cli.config.as_deref()) {
        Ok(job) => job,
        Err(e) => {
            error!("{}", e);
            println!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (flow, strict, result) = match cli.command {
        Commands::Ingest { table, dry_run } => (
            "ingest",
            false,
            run_ingest(&job, table, dry_run)
                .await
                .map(|()| RunOutcome::Ingested),
        ),
        Commands::Validate {
            run_date,
            table,
            key,
            strict,
            report,
        } => (
            "validate",
            strict,
            run_validate(&job, run_date, table, key, report)
                .await
                .map(|r| RunOutcome::Validated(r.outcome)),
        ),
    };

    if let Err(e) = &result {
        error!(kind = e.kind(), "{} failed: {}", flow, e);
        println!("❌ {} failed: {}", flow, e);
    }
    let (status, code) = exit_status(&result, strict);

    let elapsed = started.elapsed().as_secs_f64();
    metrics::record_run(flow, status, elapsed);
    info!(flow, status, elapsed_secs = elapsed, "Run finished");
    if let Err(e) = metrics::push_run_metrics(flow).await {
        warn!("Failed to push metrics: {}", e);
    }
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warehouse_sync::error::Store;
    use warehouse_sync::pipeline::compare::Mismatch;

    fn compared(mismatches: Vec<Mismatch>) -> Result<RunOutcome> {
        Ok(RunOutcome::Validated(ValidationOutcome::Compared {
            pairs: 1,
            comparisons: 2,
            mismatches,
        }))
    }

    fn unpaired() -> Mismatch {
        Mismatch::Unpaired {
            side: Store::Source,
            position: 0,
            key: vec![Some("FII".to_string())],
        }
    }

    #[test]
    fn successful_runs_exit_zero() {
        assert_eq!(exit_status(&Ok(RunOutcome::Ingested), false), ("success", 0));
        assert_eq!(exit_status(&compared(Vec::new()), true), ("success", 0));
    }

    #[test]
    fn mismatches_exit_two_only_when_strict() {
        assert_eq!(exit_status(&compared(vec![unpaired()]), false), ("mismatch", 0));
        assert_eq!(exit_status(&compared(vec![unpaired()]), true), ("mismatch", 2));
    }

    #[test]
    fn count_difference_is_a_strict_failure() {
        let result = Ok(RunOutcome::Validated(ValidationOutcome::CountMismatch {
            source_rows: 10,
            warehouse_rows: 9,
        }));
        assert_eq!(exit_status(&result, true), ("mismatch", 2));
        assert_eq!(exit_status(&result, false), ("mismatch", 0));
    }

    #[test]
    fn errors_exit_one_with_their_kind() {
        let err: Result<RunOutcome> = Err(SyncError::write(Store::Warehouse, "load rejected"));
        assert_eq!(exit_status(&err, false), ("write", 1));
        let err: Result<RunOutcome> = Err(SyncError::Config("DB_HOST not set".into()));
        assert_eq!(exit_status(&err, true), ("config", 1));
    }
}
