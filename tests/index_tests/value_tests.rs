//! Tests for index values
//!
//! These tests verify:
//! - Encoded widths per scalar type
//! - Ordering of integers, floats, decimals, strings and datetimes
//! - Decimal construction limits and display
//! - DateTime tick conversion
//! - Decode errors on malformed bytes

use chrono::{TimeZone, Utc};
use unbloatdb::index::{Decimal, IndexValue, ValueType, TICKS_PER_SECOND};
use unbloatdb::UnbloatError;

// =============================================================================
// Width Tests
// =============================================================================

#[test]
fn test_fixed_widths() {
    assert_eq!(ValueType::Bool.fixed_width(), Some(1));
    assert_eq!(ValueType::I16.fixed_width(), Some(2));
    assert_eq!(ValueType::U32.fixed_width(), Some(4));
    assert_eq!(ValueType::F64.fixed_width(), Some(8));
    assert_eq!(ValueType::Decimal.fixed_width(), Some(16));
    assert_eq!(ValueType::DateTime.fixed_width(), Some(8));
    assert_eq!(ValueType::String.fixed_width(), None);
}

#[test]
fn test_encoding_is_little_endian() {
    assert_eq!(IndexValue::I32(1).to_bytes(), vec![1, 0, 0, 0]);
    assert_eq!(IndexValue::U16(0x0102).to_bytes(), vec![0x02, 0x01]);
    assert_eq!(IndexValue::Bool(true).to_bytes(), vec![1]);
    assert_eq!(IndexValue::from("Leeds").to_bytes(), b"Leeds".to_vec());
}

#[test]
fn test_decode_reads_every_type() {
    let values = vec![
        IndexValue::Bool(false),
        IndexValue::U8(200),
        IndexValue::I8(-3),
        IndexValue::I64(-9_000_000_000),
        IndexValue::F32(1.5),
        IndexValue::Decimal(Decimal::new(-12345, 2).unwrap()),
        IndexValue::from("Bradford"),
        IndexValue::DateTime(42),
    ];

    for value in values {
        let decoded = IndexValue::decode(value.value_type(), &value.to_bytes()).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.encoded_len(), value.to_bytes().len());
    }
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_integer_ordering_is_numeric() {
    // Little-endian bytes do not sort numerically; values must
    assert!(IndexValue::I32(-1) < IndexValue::I32(0));
    assert!(IndexValue::I32(255) < IndexValue::I32(256));
    assert!(IndexValue::U64(u64::MAX) > IndexValue::U64(1));
}

#[test]
fn test_float_ordering_is_total() {
    assert!(IndexValue::F64(-0.0) < IndexValue::F64(0.0));
    assert!(IndexValue::F64(f64::INFINITY) < IndexValue::F64(f64::NAN));
    assert_eq!(IndexValue::F64(f64::NAN), IndexValue::F64(f64::NAN));
    assert!(IndexValue::F32(-2.5) < IndexValue::F32(1.0));
}

#[test]
fn test_string_ordering_is_ordinal() {
    assert!(IndexValue::from("Bradford") < IndexValue::from("Leeds"));
    assert!(IndexValue::from("Z") < IndexValue::from("a"));
    assert!(IndexValue::from("") < IndexValue::from("a"));
}

#[test]
fn test_decimal_ordering_ignores_scale() {
    let a = Decimal::new(150, 2).unwrap(); // 1.50
    let b = Decimal::new(15, 1).unwrap(); // 1.5
    let c = Decimal::new(-1, 0).unwrap();
    let d = Decimal::new(149_999, 5).unwrap(); // 1.49999

    assert_eq!(a, b);
    assert!(c < d);
    assert!(d < a);
    assert!(Decimal::new(-15, 1).unwrap() < Decimal::new(-149, 2).unwrap());
}

#[test]
fn test_mixed_types_order_by_type() {
    let a = IndexValue::Bool(true);
    let b = IndexValue::String("a".into());
    assert_ne!(a, b);
    assert!(a < b);
}

// =============================================================================
// Decimal Tests
// =============================================================================

#[test]
fn test_decimal_limits() {
    assert!(Decimal::new(1, 28).is_ok());
    assert!(Decimal::new(1, 29).is_err());

    let max = (1i128 << 96) - 1;
    assert!(Decimal::new(max, 0).is_ok());
    assert!(Decimal::new(max + 1, 0).is_err());
    assert!(Decimal::new(-max, 0).is_ok());
}

#[test]
fn test_decimal_display() {
    assert_eq!(Decimal::new(12345, 2).unwrap().to_string(), "123.45");
    assert_eq!(Decimal::new(-5, 3).unwrap().to_string(), "-0.005");
    assert_eq!(Decimal::new(7, 0).unwrap().to_string(), "7");
}

#[test]
fn test_decimal_encoding_layout() {
    let bytes = IndexValue::Decimal(Decimal::new(-258, 2).unwrap()).to_bytes();

    assert_eq!(bytes.len(), 16);
    assert_eq!(&bytes[0..4], &258u32.to_le_bytes());
    assert_eq!(&bytes[4..12], &[0u8; 8]);

    let flags = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    assert_eq!((flags >> 16) & 0xff, 2);
    assert_ne!(flags & (1 << 31), 0);
}

// =============================================================================
// DateTime Tests
// =============================================================================

#[test]
fn test_datetime_ticks() {
    let epoch = Utc.timestamp_opt(0, 0).unwrap();
    assert_eq!(IndexValue::datetime(&epoch).unwrap(), IndexValue::DateTime(0));

    let later = Utc.timestamp_opt(2, 500).unwrap();
    assert_eq!(
        IndexValue::try_from(later).unwrap(),
        IndexValue::DateTime(2 * TICKS_PER_SECOND + 5)
    );
}

#[test]
fn test_datetime_converts_back() {
    let when = Utc.with_ymd_and_hms(2021, 6, 1, 12, 30, 0).unwrap();
    let value = IndexValue::try_from(when).unwrap();

    assert_eq!(value.as_datetime(), Some(when));
    let before_epoch = Utc.with_ymd_and_hms(1969, 1, 1, 0, 0, 0).unwrap();
    assert!(IndexValue::try_from(before_epoch).unwrap() < value);
    assert_eq!(IndexValue::I32(1).as_datetime(), None);
}

#[test]
fn test_datetime_tick_range_limits() {
    let max_secs = i64::MAX / TICKS_PER_SECOND;
    let min_secs = i64::MIN / TICKS_PER_SECOND;

    let last = Utc.timestamp_opt(max_secs, 0).unwrap();
    assert_eq!(
        IndexValue::datetime(&last).unwrap(),
        IndexValue::DateTime(max_secs * TICKS_PER_SECOND)
    );
    let first = Utc.timestamp_opt(min_secs, 0).unwrap();
    assert_eq!(
        IndexValue::datetime(&first).unwrap(),
        IndexValue::DateTime(min_secs * TICKS_PER_SECOND)
    );

    // Valid chrono instants whose tick count does not fit in an i64
    for secs in [max_secs + 1, min_secs - 1, 1_000_000_000_000] {
        let when = Utc.timestamp_opt(secs, 0).unwrap();
        assert!(matches!(
            IndexValue::try_from(when),
            Err(UnbloatError::SchemaMismatch(_))
        ));
    }

    // The sub-second part can push the last whole second over the edge
    let overflowing = Utc.timestamp_opt(max_secs, 999_999_900).unwrap();
    assert!(IndexValue::datetime(&overflowing).is_err());
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_decode_wrong_width_fails() {
    let result = IndexValue::decode(ValueType::I32, &[1, 2, 3]);
    assert!(matches!(result, Err(UnbloatError::Serialization(_))));
}

#[test]
fn test_decode_bad_bool_fails() {
    let result = IndexValue::decode(ValueType::Bool, &[2]);
    assert!(matches!(result, Err(UnbloatError::Serialization(_))));
}

#[test]
fn test_decode_invalid_utf8_fails() {
    let result = IndexValue::decode(ValueType::String, &[0xff, 0xfe]);
    assert!(matches!(result, Err(UnbloatError::Serialization(_))));
}
