//! Eden Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls financial statements from Financial Modeling Prep and merges them
//! into PostgreSQL without rewriting what has not changed.
//!
//! # Overview
//!
//! - **Schema**: the dataset catalogue, its tables and merge keys
//! - **Compare**: the field-level change test
//! - **Reconcile**: splitting fetched records into inserts and patches
//! - **Rate limiting**: a token bucket shared by every worker
//! - **Fetch / Store**: the provider and database seams
//! - **Orchestrator**: the per-subject cycle with failure isolation
//!
//! # Example
//!
//! ```no_run
//! use eden_ingest::{config::IngestConfig, fetch::FmpClient, rate_limit, store::PgStore};
//! use eden_ingest::IngestOrchestrator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load(None)?;
//!     config.validate()?;
//!     let store = PgStore::connect(&config.database).await?;
//!     let fetcher = FmpClient::from_config(&config.api)?;
//!     let limiter = rate_limit::shared(&config.api.rate_limit())?;
//!
//!     let orchestrator = IngestOrchestrator::new(Arc::new(fetcher), Arc::new(store), limiter)
//!         .with_run_config(&config.ingest);
//!     let report = orchestrator.run(["AAPL", "MSFT"]).await?;
//!     println!("{}", report.summarize());
//!     Ok(())
//! }
//! ```

pub mod compare;
pub mod config;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod rate_limit;
pub mod reconcile;
pub mod schema;
pub mod store;

pub use compare::is_changed;
pub use error::{FetchError, IngestError, Result, StoreError};
pub use orchestrator::{BatchReport, DatasetStats, IngestOrchestrator, SubjectFailure, SubjectReport};
pub use rate_limit::{RateLimitConfig, RateLimitError, TokenBucket};
pub use reconcile::{reconcile, Patch, ReconcileError, ReconcileSpec, ReconciliationOutcome};
pub use schema::{Dataset, Period, PeriodSelection, Target};
