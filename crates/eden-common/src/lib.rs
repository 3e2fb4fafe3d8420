//! Eden Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, value coercion, and logging for the Eden workspace.
//!
//! # Overview
//!
//! - **Types**: the closed set of column types and the typed [`Value`] model
//! - **Coercion**: turning loosely-typed provider JSON into typed values
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```
//! use eden_common::{coerce, FieldType, Value};
//! use serde_json::json;
//!
//! let year = coerce("calendarYear", &json!("2023"), FieldType::SmallInteger).unwrap();
//! assert_eq!(year, Value::Integer(2023));
//! ```

pub mod coerce;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use coerce::{coerce, coerce_record, CoercionPolicy, RawRecord};
pub use error::{CoercionError, SchemaError};
pub use types::{EntityRecord, FieldDef, FieldSchema, FieldType, Value};
