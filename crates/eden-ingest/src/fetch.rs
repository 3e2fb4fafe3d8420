//! Provider access
//!
//! [`Fetcher`] is the seam between the orchestrator and the data provider.
//! [`FmpClient`] implements it against the Financial Modeling Prep REST API;
//! tests substitute in-memory fetchers.

use async_trait::async_trait;
use eden_common::RawRecord;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::schema::{Dataset, Period};

/// Source of raw provider records
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// All records the provider holds for one ticker, dataset and period
    ///
    /// `period` is `None` for datasets the provider does not split by period.
    async fn fetch(
        &self,
        ticker: &str,
        dataset: Dataset,
        period: Option<Period>,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

/// Financial Modeling Prep client
///
/// Calls `{base_url}/{dataset}/{ticker}?apikey=..[&period=..][&limit=..]`.
pub struct FmpClient {
    client: Client,
    base_url: String,
    api_key: String,
    limit: Option<u32>,
}

impl FmpClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::http("client setup", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            limit: None,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = Self::new(
            &config.base_url,
            &config.key,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(client.with_limit(config.limit))
    }

    /// Cap the number of rows the provider returns per call
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    fn url(&self, ticker: &str, dataset: Dataset) -> String {
        format!("{}/{}/{}", self.base_url, dataset.provider_path(), ticker)
    }
}

#[async_trait]
impl Fetcher for FmpClient {
    async fn fetch(
        &self,
        ticker: &str,
        dataset: Dataset,
        period: Option<Period>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let endpoint = format!("{}/{}", dataset.provider_path(), ticker);

        let mut query: Vec<(&str, String)> = vec![("apikey", self.api_key.clone())];
        if let Some(period) = period.filter(|_| dataset.is_periodic()) {
            query.push(("period", period.provider_value().to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .client
            .get(self.url(ticker, dataset))
            .query(&query)
            .send()
            .await
            .map_err(|e| FetchError::http(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| FetchError::http(&endpoint, e))?;

        let records = records_from_body(&endpoint, body)?;
        debug!(endpoint = %endpoint, records = records.len(), "Fetched provider records");
        Ok(records)
    }
}

/// Split a provider response into records; anything but an array of objects is an error
pub fn records_from_body(endpoint: &str, body: JsonValue) -> Result<Vec<RawRecord>, FetchError> {
    match body {
        JsonValue::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                JsonValue::Object(map) => Ok(map),
                other => Err(FetchError::unexpected_body(
                    endpoint,
                    format!("element {} is {} rather than an object", i, json_kind(&other)),
                )),
            })
            .collect(),
        JsonValue::Object(map) => match map.get("Error Message").and_then(JsonValue::as_str) {
            Some(message) => Err(FetchError::Provider {
                endpoint: endpoint.to_string(),
                message: message.to_string(),
            }),
            None => Err(FetchError::unexpected_body(endpoint, "expected an array, got an object")),
        },
        other => Err(FetchError::unexpected_body(
            endpoint,
            format!("expected an array, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

// ============================================================================
// Ticker list
// ============================================================================

#[derive(Debug, Deserialize)]
struct SecTickerEntry {
    ticker: String,
}

/// Upper-case, trim and de-duplicate tickers, keeping first occurrences
pub fn normalize_tickers<I, S>(tickers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tickers
        .into_iter()
        .map(|t| t.as_ref().trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Parse the SEC `company_tickers.json` document
///
/// The document is an object keyed by row number; tickers come back in row
/// order.
pub fn parse_ticker_list(json: &str) -> Result<Vec<String>, serde_json::Error> {
    let rows: HashMap<String, SecTickerEntry> = serde_json::from_str(json)?;
    let mut rows: Vec<(u64, String)> = rows
        .into_iter()
        .map(|(row, entry)| (row.parse().unwrap_or(u64::MAX), entry.ticker))
        .collect();
    rows.sort();
    Ok(normalize_tickers(rows.into_iter().map(|(_, ticker)| ticker)))
}

/// Load the ticker universe from a URL or a local file
pub async fn load_ticker_list(location: &str, user_agent: &str) -> Result<Vec<String>, FetchError> {
    let body = if location.starts_with("http://") || location.starts_with("https://") {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::ticker_list(location, e))?;
        client
            .get(location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::ticker_list(location, e))?
            .text()
            .await
            .map_err(|e| FetchError::ticker_list(location, e))?
    } else {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|e| FetchError::ticker_list(location, e))?
    };

    let tickers = parse_ticker_list(&body).map_err(|e| FetchError::ticker_list(location, e))?;
    info!(location = %location, tickers = tickers.len(), "Loaded ticker list");
    Ok(tickers)
}
