//! Tests for the ingestion orchestrator
//!
//! Run against the in-memory store and a canned fetcher; no network or
//! database required.

mod common;

use common::{income_statement, profile, MemoryStore, StaticFetcher};
use eden_common::{EntityRecord, Value};
use eden_ingest::schema::{Dataset, Period, Target};
use eden_ingest::{IngestOrchestrator, TokenBucket};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INCOME_Q: &str = "income_statement_quarter";

fn income_quarter() -> Vec<Target> {
    vec![Target::new(Dataset::IncomeStatement, Some(Period::Quarter))]
}

fn limiter(capacity: u32) -> Arc<TokenBucket> {
    Arc::new(TokenBucket::new(capacity, Duration::from_secs(60)).unwrap())
}

fn quarterly_fetcher(tickers: &[&str]) -> StaticFetcher {
    tickers.iter().fold(StaticFetcher::new(), |fetcher, ticker| {
        fetcher.with(
            ticker,
            Dataset::IncomeStatement,
            Some(Period::Quarter),
            vec![
                income_statement(ticker, 2023, "Q1", 117_154_000_000),
                income_statement(ticker, 2023, "Q2", 94_836_000_000),
            ],
        )
    })
}

fn orchestrator(
    fetcher: StaticFetcher,
    store: &Arc<MemoryStore>,
) -> IngestOrchestrator<StaticFetcher, MemoryStore> {
    IngestOrchestrator::new(Arc::new(fetcher), Arc::clone(store), limiter(600))
        .with_targets(income_quarter())
        .with_concurrency(2)
}

#[tokio::test]
async fn test_store_failure_is_isolated_to_its_subject() {
    let store = Arc::new(MemoryStore::new().failing_begin("MSFT"));
    let fetcher = quarterly_fetcher(&["AAPL", "MSFT", "NVDA"]);

    let report = orchestrator(fetcher, &store)
        .run(["AAPL", "MSFT", "NVDA"])
        .await
        .unwrap();

    let succeeded: Vec<_> = report.succeeded.iter().map(|s| s.ticker.as_str()).collect();
    assert_eq!(succeeded, vec!["AAPL", "NVDA"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].ticker, "MSFT");
    assert!(!report.is_success());

    assert_eq!(store.rows("AAPL", INCOME_Q).len(), 2);
    assert!(store.rows("MSFT", INCOME_Q).is_empty());
    assert_eq!(store.rows("NVDA", INCOME_Q).len(), 2);
}

#[tokio::test]
async fn test_failure_inside_unit_rolls_back() {
    let store = Arc::new(MemoryStore::new().failing_insert("MSFT"));
    let fetcher = quarterly_fetcher(&["AAPL", "MSFT"]);

    let report = orchestrator(fetcher, &store).run(["AAPL", "MSFT"]).await.unwrap();

    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.failed[0].ticker, "MSFT");
    assert_eq!(store.commit_count(), 1);
    assert_eq!(store.rollback_count(), 1);
    assert!(store.rows("MSFT", INCOME_Q).is_empty());
}

#[tokio::test]
async fn test_fetch_failure_is_recorded() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = quarterly_fetcher(&["AAPL"]).failing("ZZZZ");

    let report = orchestrator(fetcher, &store).run(["ZZZZ", "AAPL"]).await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].ticker, "ZZZZ");
    assert!(report.failed[0].error.to_string().contains("HTTP 500"));
    assert_eq!(report.succeeded[0].ticker, "AAPL");
    // Nothing was opened for the failed fetch
    assert_eq!(store.commit_count() + store.rollback_count(), 1);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());

    let first = orchestrator(quarterly_fetcher(&["AAPL"]), &store)
        .run(["AAPL"])
        .await
        .unwrap();
    assert_eq!(first.succeeded[0].inserted(), 2);
    assert_eq!(first.succeeded[0].updated(), 0);

    let second = orchestrator(quarterly_fetcher(&["AAPL"]), &store)
        .run(["AAPL"])
        .await
        .unwrap();
    let subject = &second.succeeded[0];
    assert_eq!(subject.inserted(), 0);
    assert_eq!(subject.updated(), 0);
    assert_eq!(subject.unchanged(), 2);
    assert_eq!(store.rows("AAPL", INCOME_Q).len(), 2);
}

#[tokio::test]
async fn test_upstream_change_is_patched() {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        "AAPL",
        INCOME_Q,
        vec![EntityRecord::new()
            .with("calendaryear", 2023i64)
            .with("period", "Q1")
            .with("revenue", 100i64)
            .with("netincome", 25i64)],
    );

    let fetcher = StaticFetcher::new().with(
        "AAPL",
        Dataset::IncomeStatement,
        Some(Period::Quarter),
        vec![income_statement("AAPL", 2023, "Q1", 120)],
    );

    let report = orchestrator(fetcher, &store).run(["AAPL"]).await.unwrap();
    let stats = &report.succeeded[0].datasets[0];
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.updated, 1);

    let rows = store.rows("AAPL", INCOME_Q);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("revenue"), &Value::Integer(120));
    assert_eq!(rows[0].get("netincome"), &Value::Integer(30));
}

#[tokio::test]
async fn test_dry_run_rolls_back_but_reports_counts() {
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(quarterly_fetcher(&["AAPL"]), &store)
        .with_dry_run(true)
        .run(["AAPL"])
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.succeeded[0].inserted(), 2);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.rollback_count(), 1);
    assert!(store.rows("AAPL", INCOME_Q).is_empty());
}

#[tokio::test]
async fn test_start_from_skips_earlier_tickers() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = quarterly_fetcher(&["AAPL", "MSFT", "NVDA"]);

    let report = orchestrator(fetcher, &store)
        .with_start_from(Some("msft".to_string()))
        .run(["aapl", "msft", "nvda"])
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    let succeeded: Vec<_> = report.succeeded.iter().map(|s| s.ticker.as_str()).collect();
    assert_eq!(succeeded, vec!["MSFT", "NVDA"]);
    assert!(store.rows("AAPL", INCOME_Q).is_empty());
}

#[tokio::test]
async fn test_unknown_start_ticker_skips_everything() {
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(quarterly_fetcher(&["AAPL"]), &store)
        .with_start_from(Some("TSLA".to_string()))
        .run(["AAPL"])
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert!(report.succeeded.is_empty());
    assert!(report.is_success());
}

#[tokio::test]
async fn test_profile_patches_company_row() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = StaticFetcher::new().with(
        "AAPL",
        Dataset::Profile,
        None,
        vec![profile("AAPL", "Apple Inc.")],
    );

    let report = IngestOrchestrator::new(Arc::new(fetcher), Arc::clone(&store), limiter(600))
        .with_targets(vec![Target::new(Dataset::Profile, None)])
        .run(["AAPL"])
        .await
        .unwrap();

    let stats = &report.succeeded[0].datasets[0];
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.updated, 1);

    let company = store.rows("AAPL", "company");
    assert_eq!(company.len(), 1);
    assert_eq!(company[0].get("companyname"), &Value::Text("Apple Inc.".to_string()));
    assert_eq!(company[0].get("fulltimeemployees"), &Value::Integer(161_000));
}

#[tokio::test]
async fn test_duplicate_fetched_keys_are_reported() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = StaticFetcher::new().with(
        "AAPL",
        Dataset::IncomeStatement,
        Some(Period::Quarter),
        vec![
            income_statement("AAPL", 2023, "Q1", 100),
            income_statement("AAPL", 2023, "Q1", 200),
        ],
    );

    let report = orchestrator(fetcher, &store).run(["AAPL"]).await.unwrap();
    let stats = &report.succeeded[0].datasets[0];
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.conflicts, 1);

    let rows = store.rows("AAPL", INCOME_Q);
    assert_eq!(rows[0].get("revenue"), &Value::Integer(100));
}

#[tokio::test]
async fn test_cancelled_batch_does_no_work() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(quarterly_fetcher(&["AAPL", "MSFT"]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = IngestOrchestrator::new(Arc::clone(&fetcher), Arc::clone(&store), limiter(600))
        .with_targets(income_quarter())
        .with_cancellation(cancel)
        .run(["AAPL", "MSFT"])
        .await
        .unwrap();

    assert_eq!(report.cancelled(), 2);
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_one_token_per_provider_call() {
    let store = Arc::new(MemoryStore::new());
    let bucket = limiter(10);
    let targets = vec![
        Target::new(Dataset::Profile, None),
        Target::new(Dataset::IncomeStatement, Some(Period::Quarter)),
        Target::new(Dataset::IncomeStatement, Some(Period::Annual)),
    ];

    IngestOrchestrator::new(Arc::new(quarterly_fetcher(&["AAPL", "MSFT"])), store, Arc::clone(&bucket))
        .with_targets(targets)
        .run(["AAPL", "MSFT"])
        .await
        .unwrap();

    assert!((bucket.available() - 4.0).abs() < 1e-6);
}
