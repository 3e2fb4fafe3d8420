//! Property tests for value coercion.
//!
//! 1. Integers survive the number and string encodings the provider uses
//! 2. Width checks reject exactly the values outside the column's range
//! 3. Nothing non-null coerces to a fabricated value

use eden_common::{coerce, FieldType, Value};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn integer_reads_same_from_number_and_string(n in any::<i64>()) {
        let from_number = coerce("revenue", &json!(n), FieldType::BigInteger).unwrap();
        let from_string = coerce("revenue", &json!(n.to_string()), FieldType::BigInteger).unwrap();
        prop_assert_eq!(from_number.clone(), Value::Integer(n));
        prop_assert_eq!(from_number, from_string);
    }

    #[test]
    fn smallint_width_is_enforced(n in -100_000i64..100_000) {
        let result = coerce("calendarYear", &json!(n), FieldType::SmallInteger);
        if (i16::MIN as i64..=i16::MAX as i64).contains(&n) {
            prop_assert_eq!(result.unwrap(), Value::Integer(n));
        } else {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn leading_zeros_are_accepted(n in 0i64..10_000_000, pad in 0usize..6) {
        let text = format!("{}{}", "0".repeat(pad), n);
        prop_assert_eq!(coerce("cik", &json!(text), FieldType::BigInteger).unwrap(), Value::Integer(n));
    }

    #[test]
    fn non_numeric_text_is_an_error_for_numbers(s in "[a-zA-Z]{1,12}") {
        prop_assert!(coerce("eps", &json!(s), FieldType::Real).is_err());
        prop_assert!(coerce("revenue", &json!(s), FieldType::BigInteger).is_err());
    }
}
