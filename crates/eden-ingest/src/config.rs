//! Ingestion configuration
//!
//! Layered with the `config` crate, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional JSON or TOML file (`--config`)
//! 3. `EDEN__`-prefixed environment variables, `__` separating sections
//!    (`EDEN__API__KEY`, `EDEN__DATABASE__URL`, `EDEN__INGEST__CONCURRENCY`)
//!
//! A `.env` file in the working directory is loaded first.

use eden_common::CoercionPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::rate_limit::RateLimitConfig;
use crate::schema::{Dataset, PeriodSelection};

// ============================================================================
// Provider Constants
// ============================================================================

/// Financial Modeling Prep v3 REST API.
pub const DEFAULT_API_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// Provider quota on the starter plan.
pub const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 300;

/// Refill window of the rate limiter in seconds.
pub const DEFAULT_RATE_LIMIT_INTERVAL_SECS: u64 = 60;

/// Default timeout for provider requests in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// SEC list of every registered company ticker.
pub const DEFAULT_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";

/// The SEC rejects requests without a descriptive user agent.
pub const DEFAULT_USER_AGENT: &str = "eden-ingest admin@example.com";

// ============================================================================
// Database Constants
// ============================================================================

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/eden";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Ingestion Constants
// ============================================================================

/// Subjects processed at the same time.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "EDEN";

/// Full ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub ingest: RunConfig,
}

/// Provider settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub key: String,
    pub rate_limit_per_min: u32,
    pub rate_limit_interval_secs: u64,
    pub timeout_secs: u64,
    /// Row limit passed to the provider, if any
    pub limit: Option<u32>,
    pub tickers_url: String,
    pub user_agent: String,
}

// Hand-written so the API key never reaches a log line.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("key", &if self.key.is_empty() { "" } else { "***" })
            .field("rate_limit_per_min", &self.rate_limit_per_min)
            .field("rate_limit_interval_secs", &self.rate_limit_interval_secs)
            .field("timeout_secs", &self.timeout_secs)
            .field("limit", &self.limit)
            .field("tickers_url", &self.tickers_url)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            key: String::new(),
            rate_limit_per_min: DEFAULT_RATE_LIMIT_PER_MIN,
            rate_limit_interval_secs: DEFAULT_RATE_LIMIT_INTERVAL_SECS,
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            limit: None,
            tickers_url: DEFAULT_TICKERS_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.rate_limit_per_min,
            Duration::from_secs(self.rate_limit_interval_secs),
        )
    }
}

/// Database pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

/// What a run ingests and how
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub concurrency: usize,
    pub period: PeriodSelection,
    /// Datasets to ingest; empty means every dataset
    pub datasets: Vec<Dataset>,
    pub coercion_policy: CoercionPolicy,
}

impl RunConfig {
    /// Configured datasets, or the full catalogue when none are listed
    pub fn datasets(&self) -> Vec<Dataset> {
        if self.datasets.is_empty() {
            Dataset::ALL.to_vec()
        } else {
            self.datasets.clone()
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            period: PeriodSelection::default(),
            datasets: Vec::new(),
            coercion_policy: CoercionPolicy::default(),
        }
    }
}

impl IngestConfig {
    /// Load defaults, then `file` if given, then the environment
    ///
    /// Not validated: callers apply command-line overrides first, then call
    /// [`IngestConfig::validate`].
    pub fn load(file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&IngestConfig::default())
            .map_err(|e| IngestError::config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("ingest.datasets")
                .try_parsing(true),
        );

        let config: IngestConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| IngestError::config(e.to_string()))?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.key.trim().is_empty() {
            return Err(IngestError::config("api.key must be set (EDEN__API__KEY)"));
        }

        if self.api.base_url.trim().is_empty() {
            return Err(IngestError::config("api.base_url cannot be empty"));
        }

        if self.api.rate_limit_per_min == 0 {
            return Err(IngestError::config("api.rate_limit_per_min must be greater than 0"));
        }

        if self.api.rate_limit_interval_secs == 0 {
            return Err(IngestError::config(
                "api.rate_limit_interval_secs must be greater than 0",
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(IngestError::config("database.url cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::config("database.max_connections must be greater than 0"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(IngestError::config(format!(
                "database.min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.ingest.concurrency == 0 {
            return Err(IngestError::config("ingest.concurrency must be greater than 0"));
        }

        if (self.ingest.concurrency as u32) > self.database.max_connections {
            tracing::warn!(
                concurrency = self.ingest.concurrency,
                max_connections = self.database.max_connections,
                "More concurrent subjects than database connections; workers will queue on the pool"
            );
        }

        Ok(())
    }
}
