//! Eden Ingest - financial statement ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eden_common::logging::{init_logging, LogConfig, LogLevel};
use eden_ingest::config::IngestConfig;
use eden_ingest::fetch::{load_ticker_list, FmpClient};
use eden_ingest::schema::{Dataset, PeriodSelection};
use eden_ingest::store::PgStore;
use eden_ingest::{rate_limit, IngestOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "eden-ingest")]
#[command(author, version, about = "Financial statement ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch datasets for tickers and merge them into the database
    Ingest {
        /// Tickers to ingest; the SEC ticker list is used when none are given
        tickers: Vec<String>,

        /// Configuration file (JSON or TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Statement period: quarter, fy or all
        #[arg(long)]
        period: Option<PeriodSelection>,

        /// Dataset to ingest; repeat for several (default: all)
        #[arg(long = "dataset")]
        datasets: Vec<Dataset>,

        /// Subjects processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,

        /// Skip tickers until this one is reached
        #[arg(long)]
        start_from: Option<String>,

        /// Fetch and reconcile, then roll everything back
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("eden-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let guard = init_logging(&log_config)?;

    match cli.command {
        Command::Ingest {
            tickers,
            config,
            period,
            datasets,
            concurrency,
            start_from,
            dry_run,
        } => {
            let mut config = IngestConfig::load(config.as_deref()).context("Failed to load configuration")?;
            if let Some(period) = period {
                config.ingest.period = period;
            }
            if !datasets.is_empty() {
                config.ingest.datasets = datasets;
            }
            if let Some(concurrency) = concurrency {
                config.ingest.concurrency = concurrency;
            }
            config.validate()?;

            let success = ingest(config, tickers, start_from, dry_run).await?;
            if !success {
                // Flush file logs before exiting
                drop(guard);
                std::process::exit(1);
            }
        },
    }

    drop(guard);
    Ok(())
}

async fn ingest(
    config: IngestConfig,
    tickers: Vec<String>,
    start_from: Option<String>,
    dry_run: bool,
) -> Result<bool> {
    info!(
        period = %config.ingest.period,
        datasets = ?config.ingest.datasets(),
        concurrency = config.ingest.concurrency,
        dry_run = dry_run,
        "Starting ingestion"
    );

    let tickers = if tickers.is_empty() {
        load_ticker_list(&config.api.tickers_url, &config.api.user_agent)
            .await
            .context("Failed to load ticker list")?
    } else {
        tickers
    };

    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    let fetcher = FmpClient::from_config(&config.api)?;
    let limiter = rate_limit::shared(&config.api.rate_limit())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested, finishing subjects in flight");
            on_signal.cancel();
        }
    });

    let orchestrator = IngestOrchestrator::new(Arc::new(fetcher), Arc::new(store), limiter)
        .with_run_config(&config.ingest)
        .with_dry_run(dry_run)
        .with_start_from(start_from)
        .with_cancellation(cancel);

    let report = orchestrator.run(tickers).await?;

    for line in report.summarize().lines() {
        info!("{}", line);
    }

    if report.is_success() {
        info!("Ingestion complete");
    } else {
        warn!(failed = report.failed.len(), "Ingestion finished with failures");
    }

    Ok(report.is_success())
}
