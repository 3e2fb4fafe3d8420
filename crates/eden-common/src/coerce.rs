//! Typed value coercion
//!
//! Converts the loosely-typed JSON returned by the provider into [`Value`]s of
//! a declared [`FieldType`]. Nulls, missing keys and blank strings become
//! [`Value::Absent`]; anything else that cannot be read as the declared type is
//! a [`CoercionError`], never a fabricated default.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::warn;

use crate::error::CoercionError;
use crate::types::{EntityRecord, FieldSchema, FieldType, Value, DATE_FORMAT};

/// One provider record as returned on the wire
pub type RawRecord = serde_json::Map<String, JsonValue>;

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// What to do with a record that holds a value of the wrong shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoercionPolicy {
    /// Keep the record and treat the offending field as absent
    #[default]
    DropField,
    /// Reject the whole record
    RejectRecord,
}

impl std::str::FromStr for CoercionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "drop_field" => Ok(CoercionPolicy::DropField),
            "reject_record" => Ok(CoercionPolicy::RejectRecord),
            other => Err(format!("Invalid coercion policy: {}", other)),
        }
    }
}

/// Coerce one raw value to the declared type
pub fn coerce(field: &str, raw: &JsonValue, ty: FieldType) -> Result<Value, CoercionError> {
    if raw.is_null() {
        return Ok(Value::Absent);
    }
    if let JsonValue::String(s) = raw {
        if s.trim().is_empty() && ty != FieldType::Text {
            return Ok(Value::Absent);
        }
    }

    match ty {
        FieldType::Integer | FieldType::BigInteger | FieldType::SmallInteger => {
            coerce_integer(field, raw, ty)
        },
        FieldType::Real => coerce_real(field, raw),
        FieldType::Text => coerce_text(field, raw),
        FieldType::Boolean => coerce_bool(field, raw),
        FieldType::Date => match raw {
            JsonValue::String(s) => parse_date(s)
                .map(Value::Date)
                .ok_or_else(|| CoercionError::invalid(field, ty, raw)),
            _ => Err(CoercionError::invalid(field, ty, raw)),
        },
        FieldType::Timestamp => match raw {
            JsonValue::String(s) => parse_timestamp(s)
                .map(Value::Timestamp)
                .ok_or_else(|| CoercionError::invalid(field, ty, raw)),
            _ => Err(CoercionError::invalid(field, ty, raw)),
        },
    }
}

fn coerce_integer(field: &str, raw: &JsonValue, ty: FieldType) -> Result<Value, CoercionError> {
    let parsed = match raw {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if n.is_u64() {
                return Err(CoercionError::out_of_range(field, ty, n));
            } else {
                n.as_f64().and_then(whole_f64_to_i64)
            }
        },
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_f64_to_i64))
        },
        _ => None,
    };

    let value = parsed.ok_or_else(|| CoercionError::invalid(field, ty, raw))?;
    match ty.integer_range() {
        Some((min, max)) if value < min || value > max => {
            Err(CoercionError::out_of_range(field, ty, value))
        },
        _ => Ok(Value::Integer(value)),
    }
}

fn whole_f64_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_real(field: &str, raw: &JsonValue) -> Result<Value, CoercionError> {
    let parsed = match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    };
    parsed
        .map(Value::Real)
        .ok_or_else(|| CoercionError::invalid(field, FieldType::Real, raw))
}

fn coerce_text(field: &str, raw: &JsonValue) -> Result<Value, CoercionError> {
    match raw {
        JsonValue::String(s) => Ok(Value::Text(s.clone())),
        JsonValue::Number(n) => Ok(Value::Text(n.to_string())),
        JsonValue::Bool(b) => Ok(Value::Text(b.to_string())),
        _ => Err(CoercionError::invalid(field, FieldType::Text, raw)),
    }
}

fn coerce_bool(field: &str, raw: &JsonValue) -> Result<Value, CoercionError> {
    let parsed = match raw {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        JsonValue::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed
        .map(Value::Boolean)
        .ok_or_else(|| CoercionError::invalid(field, FieldType::Boolean, raw))
}

/// Whether a date-like string carries a time-of-day component
pub fn has_time_component(s: &str) -> bool {
    s.trim().get(10..).is_some_and(|rest| rest.contains(':'))
}

/// Parse a date-only or date-time string, keeping only the date
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if has_time_component(s) {
        parse_date_time(s).map(|dt| dt.date())
    } else {
        NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
    }
}

/// Parse a date-time string; a date-only string maps to midnight
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if has_time_component(s) {
        parse_date_time(s)
    } else {
        NaiveDate::parse_from_str(s, DATE_FORMAT)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

/// Build a typed record from a raw provider record
///
/// Keys are matched case-insensitively against the schema's provider names so
/// that `companyName` and `companyname` address the same column. Keys absent
/// from the payload are left out of the record and read back as absent.
pub fn coerce_record(
    raw: &RawRecord,
    schema: &FieldSchema,
    policy: CoercionPolicy,
) -> Result<EntityRecord, CoercionError> {
    let by_lower: HashMap<String, &JsonValue> =
        raw.iter().map(|(k, v)| (k.to_lowercase(), v)).collect();

    let mut record = EntityRecord::new();
    for field in schema.iter() {
        let Some(raw_value) = by_lower.get(field.column()) else {
            continue;
        };

        match coerce(field.column(), raw_value, field.ty()) {
            Ok(value) => record.insert(field.column(), value),
            Err(e) => match policy {
                CoercionPolicy::DropField => {
                    warn!(field = field.column(), error = %e, "Dropping field that failed coercion");
                    record.insert(field.column(), Value::Absent);
                },
                CoercionPolicy::RejectRecord => return Err(e),
            },
        }
    }

    Ok(record)
}
