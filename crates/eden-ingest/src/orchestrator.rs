//! Ingestion orchestrator
//!
//! Drives the per-subject cycle for a list of tickers:
//!
//! 1. for every target, take one token from the shared limiter, fetch and coerce
//! 2. open a unit of work for the subject
//! 3. per target: read existing records, reconcile, insert, patch
//! 4. commit, or roll back in dry-run mode and on any failure
//!
//! Subjects run concurrently up to the configured limit. A failing subject is
//! recorded in the [`BatchReport`] and never stops its siblings.

use eden_common::{coerce_record, CoercionPolicy, EntityRecord, RawRecord};
use futures::stream::{self, StreamExt};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RunConfig, DEFAULT_CONCURRENCY};
use crate::error::{IngestError, Result};
use crate::fetch::{normalize_tickers, Fetcher};
use crate::rate_limit::{RateLimitError, TokenBucket};
use crate::reconcile::reconcile;
use crate::schema::{plan, Dataset, PeriodSelection, Target};
use crate::store::{DatasetTable, Store, UnitOfWork};

/// Counts for one target of one subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStats {
    pub target: Target,
    pub fetched: usize,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: usize,
    pub conflicts: usize,
}

impl DatasetStats {
    fn empty(target: Target) -> Self {
        Self {
            target,
            fetched: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            conflicts: 0,
        }
    }
}

/// A subject whose cycle completed
#[derive(Debug, Clone)]
pub struct SubjectReport {
    pub ticker: String,
    pub datasets: Vec<DatasetStats>,
    /// Records rejected by coercion under [`CoercionPolicy::RejectRecord`]
    pub rejected: usize,
}

impl SubjectReport {
    pub fn inserted(&self) -> u64 {
        self.datasets.iter().map(|d| d.inserted).sum()
    }

    pub fn updated(&self) -> u64 {
        self.datasets.iter().map(|d| d.updated).sum()
    }

    pub fn unchanged(&self) -> usize {
        self.datasets.iter().map(|d| d.unchanged).sum()
    }
}

/// A subject whose cycle failed and was rolled back
#[derive(Debug)]
pub struct SubjectFailure {
    pub ticker: String,
    pub error: IngestError,
}

/// Outcome of a batch, subjects in input order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<SubjectReport>,
    pub failed: Vec<SubjectFailure>,
    /// Tickers passed over before the `start_from` ticker
    pub skipped: usize,
    pub dry_run: bool,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Subjects abandoned because of a shutdown request
    pub fn cancelled(&self) -> usize {
        self.failed.iter().filter(|f| f.error.is_cancelled()).count()
    }

    /// Human-readable summary of the batch
    pub fn summarize(&self) -> String {
        let inserted: u64 = self.succeeded.iter().map(SubjectReport::inserted).sum();
        let updated: u64 = self.succeeded.iter().map(SubjectReport::updated).sum();
        let unchanged: usize = self.succeeded.iter().map(SubjectReport::unchanged).sum();
        let cancelled = self.cancelled();

        let mut summary = String::new();
        let _ = writeln!(
            summary,
            "Ingestion summary{}:",
            if self.dry_run { " (dry run, nothing committed)" } else { "" }
        );
        let _ = writeln!(
            summary,
            "  Subjects: {} succeeded, {} failed, {} skipped",
            self.succeeded.len(),
            self.failed.len() - cancelled,
            self.skipped
        );
        if cancelled > 0 {
            let _ = writeln!(summary, "  Cancelled: {}", cancelled);
        }
        let _ = writeln!(
            summary,
            "  Records: {} inserted, {} updated, {} unchanged",
            inserted, updated, unchanged
        );

        for failure in self.failed.iter().filter(|f| !f.error.is_cancelled()) {
            let _ = writeln!(summary, "  ✗ {}: {}", failure.ticker, failure.error);
        }

        summary
    }
}

/// Runs ingestion cycles against a [`Fetcher`] and a [`Store`]
pub struct IngestOrchestrator<F, S> {
    fetcher: Arc<F>,
    store: Arc<S>,
    limiter: Arc<TokenBucket>,
    cancel: CancellationToken,
    targets: Vec<Target>,
    policy: CoercionPolicy,
    concurrency: usize,
    dry_run: bool,
    start_from: Option<String>,
}

impl<F: Fetcher, S: Store> IngestOrchestrator<F, S> {
    /// Orchestrator over every dataset, quarterly statements
    pub fn new(fetcher: Arc<F>, store: Arc<S>, limiter: Arc<TokenBucket>) -> Self {
        Self {
            fetcher,
            store,
            limiter,
            cancel: CancellationToken::new(),
            targets: plan(&Dataset::ALL, PeriodSelection::default()),
            policy: CoercionPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
            start_from: None,
        }
    }

    /// Apply datasets, period, concurrency and coercion policy from configuration
    pub fn with_run_config(self, config: &RunConfig) -> Self {
        self.with_targets(plan(&config.datasets(), config.period))
            .with_concurrency(config.concurrency)
            .with_policy(config.coercion_policy)
    }

    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_policy(mut self, policy: CoercionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch and reconcile, but roll back every unit of work
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Skip input tickers until this one is reached
    pub fn with_start_from(mut self, ticker: Option<String>) -> Self {
        self.start_from = ticker.map(|t| t.trim().to_uppercase()).filter(|t| !t.is_empty());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Ingest every ticker, returning per-subject results in input order
    ///
    /// Fails only when the target list itself cannot be resolved; subject
    /// failures are reported in the [`BatchReport`].
    pub async fn run<I, T>(&self, tickers: I) -> Result<BatchReport>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let tables = self
            .targets
            .iter()
            .map(|target| DatasetTable::resolve(*target))
            .collect::<Result<Vec<_>>>()?;

        let tickers = normalize_tickers(tickers);
        let (skipped, tickers) = self.apply_start_from(tickers);

        info!(
            subjects = tickers.len(),
            skipped = skipped,
            targets = tables.len(),
            concurrency = self.concurrency,
            dry_run = self.dry_run,
            "Starting ingestion batch"
        );

        let total = tickers.len();
        let results: Vec<(String, Result<SubjectReport>)> = stream::iter(tickers.into_iter().enumerate())
            .map(|(index, ticker)| {
                let tables = &tables;
                async move {
                    debug!(ticker = %ticker, "Processing subject {} / {}", index + 1, total);
                    let result = self.process_subject(&ticker, tables).await;
                    (ticker, result)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport {
            skipped,
            dry_run: self.dry_run,
            ..BatchReport::default()
        };

        for (ticker, result) in results {
            match result {
                Ok(subject) => {
                    info!(
                        ticker = %ticker,
                        inserted = subject.inserted(),
                        updated = subject.updated(),
                        unchanged = subject.unchanged(),
                        "✓ Subject ingested"
                    );
                    report.succeeded.push(subject);
                },
                Err(error) if error.is_cancelled() => {
                    debug!(ticker = %ticker, "Subject cancelled");
                    report.failed.push(SubjectFailure { ticker, error });
                },
                Err(error) => {
                    warn!(ticker = %ticker, error = %error, "✗ Subject failed");
                    report.failed.push(SubjectFailure { ticker, error });
                },
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Ingestion batch finished"
        );
        Ok(report)
    }

    fn apply_start_from(&self, tickers: Vec<String>) -> (usize, Vec<String>) {
        let Some(start) = &self.start_from else {
            return (0, tickers);
        };

        match tickers.iter().position(|t| t == start) {
            Some(pos) => {
                info!(start_from = %start, skipped = pos, "Resuming batch");
                let rest = tickers[pos..].to_vec();
                (pos, rest)
            },
            None => {
                warn!(start_from = %start, "Start ticker not in the input list, nothing to do");
                (tickers.len(), Vec::new())
            },
        }
    }

    async fn process_subject(&self, ticker: &str, tables: &[DatasetTable]) -> Result<SubjectReport> {
        if self.cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled.into());
        }

        // Fetching happens before the transaction so no connection is held
        // while waiting on the limiter or the provider
        let mut fetched = Vec::with_capacity(tables.len());
        let mut rejected = 0;
        for table in tables {
            self.limiter.acquire_cancellable(1, &self.cancel).await?;
            let raw = self
                .fetcher
                .fetch(ticker, table.target.dataset, table.target.query_period())
                .await?;
            let (records, dropped) = self.coerce_all(ticker, table, &raw);
            rejected += dropped;
            fetched.push((table, records));
        }

        let mut unit = self.store.begin(ticker).await?;

        match self.persist(&mut unit, ticker, &fetched).await {
            Ok(datasets) => {
                if self.dry_run {
                    unit.rollback().await?;
                } else {
                    unit.commit().await?;
                }
                Ok(SubjectReport {
                    ticker: ticker.to_string(),
                    datasets,
                    rejected,
                })
            },
            Err(e) => {
                if let Err(rollback) = unit.rollback().await {
                    warn!(ticker = %ticker, error = %rollback, "Rollback failed");
                }
                Err(e)
            },
        }
    }

    fn coerce_all(&self, ticker: &str, table: &DatasetTable, raw: &[RawRecord]) -> (Vec<EntityRecord>, usize) {
        let schema = table.spec.schema();
        let mut records = Vec::with_capacity(raw.len());
        let mut rejected = 0;

        for (i, item) in raw.iter().enumerate() {
            match coerce_record(item, schema, self.policy) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        ticker = %ticker,
                        target = %table.target,
                        record = i,
                        error = %e,
                        "Rejecting record that failed coercion"
                    );
                    rejected += 1;
                },
            }
        }

        (records, rejected)
    }

    async fn persist(
        &self,
        unit: &mut S::Unit,
        ticker: &str,
        fetched: &[(&DatasetTable, Vec<EntityRecord>)],
    ) -> Result<Vec<DatasetStats>> {
        let mut stats = Vec::with_capacity(fetched.len());

        for (table, records) in fetched {
            if records.is_empty() {
                debug!(ticker = %ticker, target = %table.target, "Provider returned no records");
                stats.push(DatasetStats::empty(table.target));
                continue;
            }

            let existing = unit.read_existing(table).await?;
            let outcome = reconcile(records, &existing, table.spec)?;

            let inserted = unit.insert_many(table, &outcome.to_insert).await?;
            let updated = unit.apply_patches(table, &outcome.to_update).await?;

            debug!(
                ticker = %ticker,
                target = %table.target,
                fetched = records.len(),
                inserted = inserted,
                updated = updated,
                unchanged = outcome.unchanged,
                "Reconciled target"
            );

            stats.push(DatasetStats {
                target: table.target,
                fetched: records.len(),
                inserted,
                updated,
                unchanged: outcome.unchanged,
                conflicts: outcome.conflicts.len(),
            });
        }

        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::schema::Period;

    fn failure(ticker: &str, error: IngestError) -> SubjectFailure {
        SubjectFailure {
            ticker: ticker.to_string(),
            error,
        }
    }

    #[test]
    fn test_summary_counts() {
        let target = Target::new(Dataset::IncomeStatement, Some(Period::Quarter));
        let report = BatchReport {
            succeeded: vec![SubjectReport {
                ticker: "AAPL".to_string(),
                datasets: vec![DatasetStats {
                    target,
                    fetched: 5,
                    inserted: 3,
                    updated: 1,
                    unchanged: 1,
                    conflicts: 0,
                }],
                rejected: 0,
            }],
            failed: vec![
                failure("MSFT", StoreError::Database(sqlx::Error::PoolTimedOut).into()),
                failure("NVDA", RateLimitError::Cancelled.into()),
            ],
            skipped: 2,
            dry_run: false,
        };

        assert!(!report.is_success());
        assert_eq!(report.cancelled(), 1);

        let summary = report.summarize();
        assert!(summary.contains("1 succeeded, 1 failed, 2 skipped"));
        assert!(summary.contains("Cancelled: 1"));
        assert!(summary.contains("3 inserted, 1 updated, 1 unchanged"));
        assert!(summary.contains("MSFT"));
        assert!(!summary.contains("NVDA"));
    }

    #[test]
    fn test_dry_run_summary_is_labelled() {
        let report = BatchReport {
            dry_run: true,
            ..BatchReport::default()
        };
        assert!(report.is_success());
        assert!(report.summarize().contains("dry run"));
    }
}
