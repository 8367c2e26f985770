//! dref-etl - bronze/silver pipeline for JSON reference data
//!
//! Commands:
//! - `ingest`: load every document of the source directory into bronze
//! - `transform`: fuse and copy bronze tables into silver
//! - `run`: ingest, then transform
//! - `check-tables`: wait until the silver tables consumers need exist
//!
//! Exit status is non-zero only for fatal errors (configuration,
//! connectivity, readiness exhaustion); failed documents and tables are
//! logged and the run still succeeds.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dref_common::config::{BulkCopyMethod, EtlConfig};
use dref_common::db::{
    connect_with_retry, ensure_ingestion_ledger_table, ensure_read_role,
    ensure_transformation_ledger_table, RetryPolicy,
};
use dref_etl::ledger::{ingestion_ledger, transformation_ledger};
use dref_etl::models::BatchReport;
use dref_etl::services::{
    IngestOptions, Ingestor, LocalDirectorySource, Orchestrator, ReadinessGate,
};
use dref_etl::store::{
    BulkCopier, CopyStreamCopier, DblinkCopier, PgTableStore, UnavailableCopier,
};
use sqlx::PgPool;
use tracing::{error, info, warn};

/// Command-line arguments for dref-etl
#[derive(Parser, Debug)]
#[command(name = "dref-etl")]
#[command(about = "Bronze/silver ETL pipeline for JSON reference data")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "DREF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load JSON documents into the bronze database
    Ingest {
        /// Directory holding the documents
        #[arg(long)]
        source_dir: Option<PathBuf>,
    },
    /// Build the silver layer from bronze
    Transform,
    /// Ingest, then transform
    Run {
        #[arg(long)]
        source_dir: Option<PathBuf>,
    },
    /// Wait for the silver tables read by consumers
    CheckTables,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting dref-etl v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let mut config = EtlConfig::load(args.config.as_deref()).context("Loading configuration")?;

    match args.command {
        Command::Ingest { source_dir } => {
            if let Some(dir) = source_dir {
                config.source_dir = dir;
            }
            ingest(&config).await
        }
        Command::Transform => transform(&config).await,
        Command::Run { source_dir } => {
            if let Some(dir) = source_dir {
                config.source_dir = dir;
            }
            ingest(&config).await?;
            transform(&config).await
        }
        Command::CheckTables => check_tables(&config).await,
    }
}

async fn ingest(config: &EtlConfig) -> Result<()> {
    let policy = RetryPolicy::from(&config.connection);
    let pool = connect_with_retry(&config.bronze, &policy)
        .await
        .context("Connecting to bronze database")?;
    info!("✓ Connected to bronze database ({})", config.bronze.describe());

    let ledger_table = ensure_ingestion_ledger_table(&pool).await;
    bootstrap_read_role(&pool, config, &config.bronze.name).await;

    let ingestor = Ingestor::new(
        Arc::new(PgTableStore::new(pool.clone())),
        ingestion_ledger(pool, ledger_table),
        IngestOptions::from_config(config),
    );
    let source = LocalDirectorySource::new(config.source_dir.clone());
    let report = ingestor
        .ingest_all(&source)
        .await
        .with_context(|| format!("Reading documents from {}", config.source_dir.display()))?;

    log_failures("document", &report);
    Ok(())
}

async fn transform(config: &EtlConfig) -> Result<()> {
    let policy = RetryPolicy::from(&config.connection);
    let bronze_pool = connect_with_retry(&config.bronze, &policy)
        .await
        .context("Connecting to bronze database")?;
    info!("✓ Connected to bronze database ({})", config.bronze.describe());
    let silver_pool = connect_with_retry(&config.silver, &policy)
        .await
        .context("Connecting to silver database")?;
    info!("✓ Connected to silver database ({})", config.silver.describe());

    let ledger_table = ensure_transformation_ledger_table(&silver_pool).await;
    bootstrap_read_role(&silver_pool, config, &config.silver.name).await;

    let bulk: Arc<dyn BulkCopier> = match config.pipeline.bulk_copy_method {
        BulkCopyMethod::Dblink => {
            match DblinkCopier::new(silver_pool.clone(), config.bronze.conninfo()).await {
                Ok(copier) => Arc::new(copier),
                Err(e) => {
                    warn!(
                        "⚠ dblink unavailable in silver database, copies will run in batches: {}",
                        e
                    );
                    Arc::new(UnavailableCopier::new("dblink", e.to_string()))
                }
            }
        }
        BulkCopyMethod::CopyStream => {
            Arc::new(CopyStreamCopier::new(bronze_pool.clone(), silver_pool.clone()))
        }
    };

    let orchestrator = Orchestrator::new(
        Arc::new(PgTableStore::new(bronze_pool)),
        Arc::new(PgTableStore::new(silver_pool.clone())),
        bulk,
        transformation_ledger(silver_pool, ledger_table),
        config.pipeline.clone(),
        config.read_role_name().map(str::to_string),
    );
    let report = orchestrator.run().await;

    log_failures("transformation", &report);
    Ok(())
}

async fn check_tables(config: &EtlConfig) -> Result<()> {
    let policy = RetryPolicy::from(&config.connection);
    let pool = connect_with_retry(&config.silver, &policy)
        .await
        .context("Connecting to silver database")?;

    let gate = ReadinessGate::from_config(&config.readiness)?;
    gate.wait(&PgTableStore::new(pool)).await?;
    Ok(())
}

/// Role creation problems do not stop the pipeline; grants will report them
async fn bootstrap_read_role(pool: &PgPool, config: &EtlConfig, database: &str) {
    let Some(role) = &config.read_role else {
        return;
    };
    if let Err(e) = ensure_read_role(pool, role, database).await {
        warn!(role = %role.user, "⚠ Could not set up read role: {}", e);
    }
}

fn log_failures<T>(unit_kind: &str, report: &BatchReport<T>) {
    for (unit, e) in report.failed() {
        error!(unit = %unit, "Failed {}: {}", unit_kind, e);
    }
    info!(
        total = report.len(),
        failed = report.failure_count(),
        "Finished {} batch",
        unit_kind
    );
}
