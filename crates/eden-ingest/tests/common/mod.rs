//! Common test utilities for eden-ingest integration tests
//!
//! - [`MemoryStore`]: an in-memory [`Store`] with transactional units of work
//!   and per-ticker failure injection
//! - [`StaticFetcher`]: a [`Fetcher`] serving canned provider payloads
//! - record builders for provider-shaped JSON

#![allow(dead_code)]

use async_trait::async_trait;
use eden_common::{EntityRecord, RawRecord, Value};
use eden_ingest::error::{FetchError, StoreError};
use eden_ingest::fetch::Fetcher;
use eden_ingest::reconcile::Patch;
use eden_ingest::schema::{Dataset, Period};
use eden_ingest::store::{DatasetTable, Scope, Store, UnitOfWork};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// In-memory store
// ============================================================================

type Tables = HashMap<(String, &'static str), Vec<EntityRecord>>;

/// Store keeping rows per (ticker, table) in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_begin: HashSet<String>,
    fail_insert: HashSet<String>,
    pub commits: Arc<AtomicUsize>,
    pub rollbacks: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `begin` fails for this ticker
    pub fn failing_begin(mut self, ticker: &str) -> Self {
        self.fail_begin.insert(ticker.to_string());
        self
    }

    /// `insert_many` fails for this ticker, after the unit is open
    pub fn failing_insert(mut self, ticker: &str) -> Self {
        self.fail_insert.insert(ticker.to_string());
        self
    }

    /// Seed committed rows
    pub fn seed(&self, ticker: &str, table: &'static str, records: Vec<EntityRecord>) {
        self.tables
            .lock()
            .unwrap()
            .insert((ticker.to_string(), table), records);
    }

    /// Committed rows of one ticker's table
    pub fn rows(&self, ticker: &str, table: &'static str) -> Vec<EntityRecord> {
        self.tables
            .lock()
            .unwrap()
            .get(&(ticker.to_string(), table))
            .cloned()
            .unwrap_or_default()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self, ticker: &str) -> Result<MemoryUnit, StoreError> {
        if self.fail_begin.contains(ticker) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut staged: Tables = self
            .tables
            .lock()
            .unwrap()
            .iter()
            .filter(|((owner, _), _)| owner == ticker)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        staged
            .entry((ticker.to_string(), "company"))
            .or_insert_with(|| vec![EntityRecord::new().with("symbol", ticker)]);

        Ok(MemoryUnit {
            ticker: ticker.to_string(),
            staged,
            fail_insert: self.fail_insert.contains(ticker),
            shared: Arc::clone(&self.tables),
            commits: Arc::clone(&self.commits),
            rollbacks: Arc::clone(&self.rollbacks),
        })
    }
}

/// Staged copy of one ticker's rows, published on commit
pub struct MemoryUnit {
    ticker: String,
    staged: Tables,
    fail_insert: bool,
    shared: Arc<Mutex<Tables>>,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
}

impl MemoryUnit {
    fn rows_mut(&mut self, table: &DatasetTable) -> &mut Vec<EntityRecord> {
        self.staged
            .entry((self.ticker.clone(), table.table))
            .or_default()
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn read_existing(&mut self, table: &DatasetTable) -> Result<Vec<EntityRecord>, StoreError> {
        let ticker = self.ticker.clone();
        let rows = self.rows_mut(table);
        Ok(match table.scope() {
            Scope::Symbol => rows
                .iter()
                .filter(|r| r.get("symbol") == &Value::Text(ticker.clone()))
                .cloned()
                .collect(),
            Scope::Company => rows.clone(),
        })
    }

    async fn insert_many(
        &mut self,
        table: &DatasetTable,
        records: &[EntityRecord],
    ) -> Result<u64, StoreError> {
        if self.fail_insert && !records.is_empty() {
            return Err(StoreError::Database(sqlx::Error::WorkerCrashed));
        }
        self.rows_mut(table).extend(records.iter().cloned());
        Ok(records.len() as u64)
    }

    async fn apply_patches(&mut self, table: &DatasetTable, patches: &[Patch])
        -> Result<u64, StoreError> {
        let rows = self.rows_mut(table);
        let mut touched = 0;
        for patch in patches {
            for row in rows.iter_mut() {
                let matches = patch
                    .key
                    .parts()
                    .iter()
                    .all(|(column, value)| row.get(column).canonical() == value.canonical());
                if matches {
                    for (column, value) in &patch.changes {
                        row.insert(column.clone(), value.clone());
                    }
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut shared = self.shared.lock().unwrap();
        for (key, rows) in self.staged {
            shared.insert(key, rows);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Canned fetcher
// ============================================================================

type Payloads = HashMap<(String, Dataset, Option<Period>), Vec<RawRecord>>;

/// Fetcher serving fixed payloads; unknown requests return no records
#[derive(Default)]
pub struct StaticFetcher {
    payloads: Payloads,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        ticker: &str,
        dataset: Dataset,
        period: Option<Period>,
        records: Vec<JsonValue>,
    ) -> Self {
        let records = records.into_iter().map(raw).collect();
        self.payloads
            .insert((ticker.to_string(), dataset, period), records);
        self
    }

    /// Every request for this ticker fails with HTTP 500
    pub fn failing(mut self, ticker: &str) -> Self {
        self.failing.insert(ticker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(
        &self,
        ticker: &str,
        dataset: Dataset,
        period: Option<Period>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(ticker) {
            return Err(FetchError::Status {
                endpoint: format!("{}/{}", dataset.provider_path(), ticker),
                status: 500,
            });
        }
        Ok(self
            .payloads
            .get(&(ticker.to_string(), dataset, period))
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Provider-shaped fixtures
// ============================================================================

pub fn raw(value: JsonValue) -> RawRecord {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("fixture must be an object, got {}", other),
    }
}

/// An income statement row as the provider returns it
pub fn income_statement(symbol: &str, year: i32, period: &str, revenue: i64) -> JsonValue {
    json!({
        "date": format!("{}-09-30", year),
        "symbol": symbol,
        "reportedCurrency": "USD",
        "cik": "0000320193",
        "fillingDate": format!("{}-11-03", year),
        "acceptedDate": format!("{}-11-02 18:08:27", year),
        "calendarYear": year.to_string(),
        "period": period,
        "revenue": revenue,
        "grossProfitRatio": 0.4413112957,
        "netIncome": revenue / 4,
        "link": "https://www.sec.gov/Archives/edgar/data/320193/000032019323000106/0000320193-23-000106-index.htm",
    })
}

pub fn profile(symbol: &str, name: &str) -> JsonValue {
    json!({
        "symbol": symbol,
        "companyName": name,
        "currency": "USD",
        "cik": "0000320193",
        "exchangeShortName": "NASDAQ",
        "fullTimeEmployees": "161000",
        "ipoDate": "1980-12-12",
        "isEtf": false,
    })
}
