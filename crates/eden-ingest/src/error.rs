//! Error types for Eden ingestion
//!
//! Each layer owns its error enum; [`IngestError`] is what a failed subject is
//! recorded with. Errors never carry the provider API key.

use eden_common::CoercionError;
use thiserror::Error;

use crate::rate_limit::RateLimitError;
use crate::reconcile::ReconcileError;
use crate::schema::Dataset;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Provider and ticker-list failures. Not retried.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Provider rejected {endpoint}: {message}")]
    Provider { endpoint: String, message: String },

    #[error("Unexpected response body from {endpoint}: {detail}")]
    UnexpectedBody { endpoint: String, detail: String },

    #[error("Failed to read ticker list from '{location}': {detail}")]
    TickerList { location: String, detail: String },
}

impl FetchError {
    pub fn http(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            endpoint: endpoint.into(),
            source: source.without_url(),
        }
    }

    pub fn unexpected_body(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnexpectedBody {
            endpoint: endpoint.into(),
            detail: detail.into(),
        }
    }

    pub fn ticker_list(location: impl Into<String>, detail: impl ToString) -> Self {
        Self::TickerList {
            location: location.into(),
            detail: detail.to_string(),
        }
    }
}

/// Persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No table for {0}")]
    NoTable(String),

    #[error("Cannot read column '{column}' of {table}: {detail}")]
    Decode {
        table: String,
        column: String,
        detail: String,
    },
}

impl StoreError {
    pub fn decode(table: &str, column: &str, detail: impl ToString) -> Self {
        Self::Decode {
            table: table.to_string(),
            column: column.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Everything that can fail one subject's cycle, or the run itself
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Coercion failed: {0}")]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("Dataset {dataset} has an invalid schema: {source}")]
    InvalidSchema {
        dataset: Dataset,
        source: ReconcileError,
    },

    #[error("Configuration error: {0}. Check the config file and EDEN__* environment variables.")]
    Config(String),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error came from a shutdown request rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::RateLimit(RateLimitError::Cancelled))
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Store(StoreError::Database(err))
    }
}
