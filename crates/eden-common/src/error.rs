//! Error types shared across Eden crates

use thiserror::Error;

use crate::types::FieldType;

/// A column list or column type could not be turned into a schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown column type: {0}")]
    UnknownType(String),

    #[error("Duplicate column in schema: {0}")]
    DuplicateColumn(String),
}

/// A non-null provider value could not be read as the declared column type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoercionError {
    #[error("field '{field}': cannot read {value} as {expected}")]
    InvalidValue {
        field: String,
        expected: FieldType,
        value: String,
    },

    #[error("field '{field}': {value} does not fit in {expected}")]
    OutOfRange {
        field: String,
        expected: FieldType,
        value: String,
    },
}

impl CoercionError {
    pub fn invalid(field: impl Into<String>, expected: FieldType, value: impl ToString) -> Self {
        Self::InvalidValue {
            field: field.into(),
            expected,
            value: value.to_string(),
        }
    }

    pub fn out_of_range(
        field: impl Into<String>,
        expected: FieldType,
        value: impl ToString,
    ) -> Self {
        Self::OutOfRange {
            field: field.into(),
            expected,
            value: value.to_string(),
        }
    }

    /// Name of the field that failed to coerce
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidValue { field, .. } | Self::OutOfRange { field, .. } => field,
        }
    }
}
