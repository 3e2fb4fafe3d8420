//! Field-level change detection
//!
//! Decides whether a freshly fetched value differs from the persisted one.
//! The provider and the store disagree on precision (a `real` column keeps
//! fewer digits than the JSON payload) and on temporal shape (dates arrive as
//! date-time text), so equality is judged per declared column type.

use chrono::NaiveDate;
use eden_common::coerce::{coerce, parse_date};
use eden_common::{FieldType, Value};
use serde_json::Value as JsonValue;
use sqlx::types::BigDecimal;
use std::str::FromStr;

/// Whether `new` should overwrite `old` for a column of type `ty`
///
/// Rules, first match wins:
///
/// 1. both absent: unchanged
/// 2. new present, old absent: changed
/// 3. new absent, old present: unchanged (absent never erases)
/// 4. numeric column: compared at the smaller number of decimal places carried
///    by either side; changed only if both rounding and truncation to that
///    precision still differ. Two integers compare exactly. `real` columns
///    first bring both sides to single precision, the precision stored.
/// 5. date or timestamp column where one side is date-like text and the other
///    a typed date or timestamp: compared at day granularity
/// 6. anything else: new is coerced to old's type and compared exactly; a
///    failed coercion counts as changed
pub fn is_changed(new: &Value, old: &Value, ty: FieldType) -> bool {
    match (new.is_absent(), old.is_absent()) {
        (true, true) => return false,
        (false, true) => return true,
        (true, false) => return false,
        (false, false) => {},
    }

    if ty.is_numeric() {
        if let Some(changed) = numeric_changed(new, old, ty) {
            return changed;
        }
    }

    if ty.is_temporal() && is_text_against_typed_date(new, old) {
        return match (as_date(new), as_date(old)) {
            (Some(n), Some(o)) => n != o,
            _ => true,
        };
    }

    match coerce_like(new, old) {
        Some(converted) => converted != *old,
        None => true,
    }
}

/// `None` when either side is not a number
fn numeric_changed(new: &Value, old: &Value, ty: FieldType) -> Option<bool> {
    if let (Value::Integer(n), Value::Integer(o)) = (new, old) {
        return Some(n != o);
    }

    let (n, o) = (new.as_f64()?, old.as_f64()?);
    let decimals = if ty == FieldType::Real {
        (to_single_decimal(n), to_single_decimal(o))
    } else {
        (to_decimal(n), to_decimal(o))
    };
    let (Some(n_dec), Some(o_dec)) = decimals else {
        return Some(n != o);
    };

    let places = decimal_places(&n_dec).min(decimal_places(&o_dec));
    let rounded_differ = n_dec.round(places) != o_dec.round(places);
    let truncated_differ = n_dec.with_scale(places) != o_dec.with_scale(places);

    Some(rounded_differ && truncated_differ)
}

fn to_decimal(f: f64) -> Option<BigDecimal> {
    if !f.is_finite() {
        return None;
    }
    BigDecimal::from_str(&f.to_string()).ok()
}

/// Shortest decimal form of `f` once stored in a `real` column
fn to_single_decimal(f: f64) -> Option<BigDecimal> {
    let single = f as f32;
    if !single.is_finite() {
        return None;
    }
    BigDecimal::from_str(&single.to_string()).ok()
}

/// Decimal places carried by the shortest representation of a number
fn decimal_places(d: &BigDecimal) -> i64 {
    let (_, scale) = d.normalized().as_bigint_and_exponent();
    scale.max(0)
}

fn is_text_against_typed_date(new: &Value, old: &Value) -> bool {
    let typed = |v: &Value| matches!(v, Value::Date(_) | Value::Timestamp(_));
    (matches!(new, Value::Text(_)) && typed(old)) || (matches!(old, Value::Text(_)) && typed(new))
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Timestamp(ts) => Some(ts.date()),
        Value::Text(s) => parse_date(s),
        _ => None,
    }
}

/// Re-read `new` as the type `old` holds
fn coerce_like(new: &Value, old: &Value) -> Option<Value> {
    let target = match old {
        Value::Absent => return None,
        Value::Integer(_) => FieldType::BigInteger,
        Value::Real(_) => FieldType::Real,
        Value::Text(_) => FieldType::Text,
        Value::Boolean(_) => FieldType::Boolean,
        Value::Date(_) => FieldType::Date,
        Value::Timestamp(_) => FieldType::Timestamp,
    };
    if new.kind() == old.kind() {
        return Some(new.clone());
    }
    coerce("", &to_json(new), target).ok()
}

fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Absent => JsonValue::Null,
        Value::Integer(i) => JsonValue::from(*i),
        Value::Real(r) => JsonValue::from(*r),
        Value::Boolean(b) => JsonValue::from(*b),
        other => JsonValue::String(other.canonical()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_absent_handling() {
        assert!(!is_changed(&Value::Absent, &Value::Absent, FieldType::BigInteger));
        assert!(is_changed(&Value::Integer(5), &Value::Absent, FieldType::BigInteger));
        assert!(!is_changed(&Value::Absent, &Value::Integer(100), FieldType::BigInteger));
        assert!(!is_changed(&Value::Absent, &Value::Text("x".into()), FieldType::Text));
    }

    #[test]
    fn test_real_tolerates_storage_precision() {
        assert!(!is_changed(&Value::Real(12.346), &Value::Real(12.3457), FieldType::Real));
        assert!(!is_changed(&Value::Real(0.4315), &Value::Real(0.43150002), FieldType::Real));
        assert!(is_changed(&Value::Real(12.36), &Value::Real(12.3457), FieldType::Real));
        assert!(is_changed(&Value::Real(1.5), &Value::Real(2.5), FieldType::Real));
    }

    #[test]
    fn test_integers_compare_exactly() {
        assert!(!is_changed(&Value::Integer(383285000000), &Value::Integer(383285000000), FieldType::BigInteger));
        assert!(is_changed(&Value::Integer(383285000001), &Value::Integer(383285000000), FieldType::BigInteger));
    }

    #[test]
    fn test_integer_against_real_uses_zero_places() {
        assert!(!is_changed(&Value::Real(2023.0), &Value::Integer(2023), FieldType::SmallInteger));
        assert!(is_changed(&Value::Real(2024.0), &Value::Integer(2023), FieldType::SmallInteger));
    }

    #[test]
    fn test_dates_compare_at_day_granularity() {
        let stored = Value::Date(date(2024, 3, 31));
        assert!(!is_changed(&Value::Text("2024-03-31 00:00:00".into()), &stored, FieldType::Date));
        assert!(!is_changed(
            &Value::Timestamp(date(2024, 3, 31).and_hms_opt(18, 30, 0).unwrap()),
            &stored,
            FieldType::Date
        ));
        assert!(is_changed(&Value::Text("2024-04-01".into()), &stored, FieldType::Date));
        assert!(is_changed(&Value::Text("soon".into()), &stored, FieldType::Date));
    }

    #[test]
    fn test_typed_timestamps_compare_exactly() {
        let stored = Value::Timestamp(date(2023, 11, 2).and_hms_opt(18, 8, 27).unwrap());
        let revised = Value::Timestamp(date(2023, 11, 2).and_hms_opt(6, 1, 1).unwrap());
        assert!(is_changed(&revised, &stored, FieldType::Timestamp));
        assert!(!is_changed(&stored, &stored, FieldType::Timestamp));
    }

    #[test]
    fn test_timestamp_text_against_typed_ignores_time_of_day() {
        let stored = Value::Timestamp(date(2023, 11, 2).and_hms_opt(18, 8, 27).unwrap());
        assert!(!is_changed(&Value::Text("2023-11-02 06:01:01".into()), &stored, FieldType::Timestamp));
        assert!(!is_changed(&Value::Text("2023-11-02".into()), &stored, FieldType::Timestamp));
        assert!(is_changed(&Value::Text("2023-11-03 18:08:27".into()), &stored, FieldType::Timestamp));
    }

    #[test]
    fn test_real_column_matches_single_precision_read_back() {
        let pairs = [
            (0.8597941207808165, 0.85979414),
            (0.17546217903306627, 0.17546219),
            (0.6047802727761427, 0.60478026),
        ];
        for (fetched, stored) in pairs {
            assert!(!is_changed(&Value::Real(fetched), &Value::Real(stored), FieldType::Real));
        }
        assert!(is_changed(&Value::Real(0.8597), &Value::Real(0.85979414), FieldType::Real));
    }

    #[test]
    fn test_real_column_never_flags_its_own_round_trip() {
        // Deterministic spread of full-precision values in [0, 1000)
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..20_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let fetched = (state >> 11) as f64 / (1u64 << 53) as f64 * 1000.0;
            let stored: f64 = (fetched as f32).to_string().parse().unwrap();
            assert!(
                !is_changed(&Value::Real(fetched), &Value::Real(stored), FieldType::Real),
                "{} read back as {}",
                fetched,
                stored
            );
        }
    }

    #[test]
    fn test_text_and_bool_fall_back_to_exact() {
        assert!(!is_changed(&Value::Text("USD".into()), &Value::Text("USD".into()), FieldType::Text));
        assert!(is_changed(&Value::Text("EUR".into()), &Value::Text("USD".into()), FieldType::Text));
        assert!(!is_changed(&Value::Text("true".into()), &Value::Boolean(true), FieldType::Boolean));
        assert!(is_changed(&Value::Text("maybe".into()), &Value::Boolean(true), FieldType::Boolean));
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places(&to_decimal(12.3457).unwrap()), 4);
        assert_eq!(decimal_places(&to_decimal(1200.0).unwrap()), 0);
        assert_eq!(decimal_places(&to_decimal(0.5).unwrap()), 1);
    }
}
