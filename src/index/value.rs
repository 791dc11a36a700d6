//! Index scalar values
//!
//! Typed scalars stored in property indexes, their declared types, ordering,
//! and byte encodings.
//!
//! ## Value Encodings (little-endian)
//! ```text
//! Bool            1 byte (0 / 1)
//! U8 / I8         1 byte
//! U16 / I16       2 bytes
//! U32 / I32       4 bytes
//! U64 / I64       8 bytes
//! F32 / F64       4 / 8 bytes, IEEE-754 bits
//! Decimal         16 bytes: magnitude (12, 96-bit) | flags (4)
//!                 flags = scale << 16 | sign << 31
//! DateTime        8 bytes, i64 ticks of 100ns since the Unix epoch
//! String          raw UTF-8, length implied by the entry length
//! ```

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnbloatError};

/// Number of 100ns ticks per second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

// =============================================================================
// Value Types
// =============================================================================

/// The declared scalar type of an indexed field
///
/// Enumerations are declared as their underlying integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Decimal,
    String,
    DateTime,
}

impl ValueType {
    /// Encoded width in bytes, `None` for variable-length strings
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ValueType::Bool | ValueType::U8 | ValueType::I8 => Some(1),
            ValueType::U16 | ValueType::I16 => Some(2),
            ValueType::U32 | ValueType::I32 | ValueType::F32 => Some(4),
            ValueType::U64 | ValueType::I64 | ValueType::F64 | ValueType::DateTime => Some(8),
            ValueType::Decimal => Some(Decimal::ENCODED_LEN),
            ValueType::String => None,
        }
    }

    /// Position used to order values of different types against each other
    fn rank(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Decimal
// =============================================================================

/// A base-10 fixed-point number: `mantissa * 10^-scale`
///
/// The mantissa magnitude is limited to 96 bits and the scale to 28, so every
/// value fits the 16-byte index encoding. Equality and ordering are numeric:
/// `1.0 == 1.00`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "(i128, u8)", into = "(i128, u8)")]
pub struct Decimal {
    mantissa: i128,
    scale: u8,
}

impl Decimal {
    /// Largest supported scale
    pub const MAX_SCALE: u8 = 28;

    /// Encoded size in bytes
    pub const ENCODED_LEN: usize = 16;

    const MAX_MAGNITUDE: u128 = (1u128 << 96) - 1;

    /// Create a decimal from a mantissa and scale
    pub fn new(mantissa: i128, scale: u8) -> Result<Self> {
        if scale > Self::MAX_SCALE {
            return Err(UnbloatError::SchemaMismatch(format!(
                "decimal scale {} exceeds {}",
                scale,
                Self::MAX_SCALE
            )));
        }

        if mantissa.unsigned_abs() > Self::MAX_MAGNITUDE {
            return Err(UnbloatError::SchemaMismatch(format!(
                "decimal mantissa {} does not fit in 96 bits",
                mantissa
            )));
        }

        Ok(Self { mantissa, scale })
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Lossy conversion for display and arithmetic outside the index
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }

    /// Split into (integer part, fraction scaled to MAX_SCALE digits).
    ///
    /// Both parts carry the sign of the value, so comparing the pairs
    /// lexicographically compares the numbers.
    fn parts(&self) -> (i128, i128) {
        let divisor = 10i128.pow(self.scale as u32);
        let integer = self.mantissa / divisor;
        let fraction =
            (self.mantissa % divisor) * 10i128.pow((Self::MAX_SCALE - self.scale) as u32);
        (integer, fraction)
    }

    fn encode(&self, buf: &mut impl BufMut) {
        let magnitude = self.mantissa.unsigned_abs();
        buf.put_u32_le(magnitude as u32);
        buf.put_u32_le((magnitude >> 32) as u32);
        buf.put_u32_le((magnitude >> 64) as u32);

        let mut flags = (self.scale as u32) << 16;
        if self.mantissa < 0 {
            flags |= 1 << 31;
        }
        buf.put_u32_le(flags);
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        let lo = buf.get_u32_le() as u128;
        let mid = buf.get_u32_le() as u128;
        let hi = buf.get_u32_le() as u128;
        let flags = buf.get_u32_le();

        let magnitude = lo | (mid << 32) | (hi << 64);
        let scale = ((flags >> 16) & 0xff) as u8;
        let negative = flags & (1 << 31) != 0;

        let mantissa = if negative {
            -(magnitude as i128)
        } else {
            magnitude as i128
        };

        Decimal::new(mantissa, scale)
            .map_err(|e| UnbloatError::Serialization(format!("invalid decimal: {}", e)))
    }
}

impl TryFrom<(i128, u8)> for Decimal {
    type Error = UnbloatError;

    fn try_from((mantissa, scale): (i128, u8)) -> Result<Self> {
        Decimal::new(mantissa, scale)
    }
}

impl From<Decimal> for (i128, u8) {
    fn from(value: Decimal) -> Self {
        (value.mantissa, value.scale)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts().cmp(&other.parts())
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }

        let divisor = 10u128.pow(self.scale as u32);
        let magnitude = self.mantissa.unsigned_abs();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            magnitude / divisor,
            magnitude % divisor,
            width = self.scale as usize
        )
    }
}

// =============================================================================
// Index Values
// =============================================================================

/// A single indexed scalar
///
/// Values of the same type compare by their natural ordering; floats use
/// IEEE-754 total ordering (`-0.0 < 0.0`, NaN sorts last). Values of
/// different types order by type, which only matters for diagnostics since a
/// property index holds a single type.
#[derive(Debug, Clone)]
pub enum IndexValue {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    /// Ticks of 100ns since the Unix epoch
    DateTime(i64),
}

impl IndexValue {
    /// The declared type this value encodes as
    pub fn value_type(&self) -> ValueType {
        match self {
            IndexValue::Bool(_) => ValueType::Bool,
            IndexValue::U8(_) => ValueType::U8,
            IndexValue::I8(_) => ValueType::I8,
            IndexValue::U16(_) => ValueType::U16,
            IndexValue::I16(_) => ValueType::I16,
            IndexValue::U32(_) => ValueType::U32,
            IndexValue::I32(_) => ValueType::I32,
            IndexValue::U64(_) => ValueType::U64,
            IndexValue::I64(_) => ValueType::I64,
            IndexValue::F32(_) => ValueType::F32,
            IndexValue::F64(_) => ValueType::F64,
            IndexValue::Decimal(_) => ValueType::Decimal,
            IndexValue::String(_) => ValueType::String,
            IndexValue::DateTime(_) => ValueType::DateTime,
        }
    }

    /// Build a DateTime value, truncated to 100ns ticks
    ///
    /// Ticks are an i64, which covers roughly 29,000 years either side of
    /// the epoch. Instants outside that range are a `SchemaMismatch`.
    pub fn datetime(value: &DateTime<Utc>) -> Result<Self> {
        value
            .timestamp()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|ticks| ticks.checked_add((value.timestamp_subsec_nanos() / 100) as i64))
            .map(IndexValue::DateTime)
            .ok_or_else(|| {
                UnbloatError::SchemaMismatch(format!(
                    "{} is outside the range of DateTime ticks",
                    value
                ))
            })
    }

    /// Convert a DateTime value back to chrono
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            IndexValue::DateTime(ticks) => {
                let secs = ticks.div_euclid(TICKS_PER_SECOND);
                let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
                DateTime::from_timestamp(secs, nanos)
            }
            _ => None,
        }
    }

    /// Borrow the string content of a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IndexValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Number of bytes `encode` writes
    pub fn encoded_len(&self) -> usize {
        match self {
            IndexValue::String(s) => s.len(),
            other => other.value_type().fixed_width().unwrap_or(0),
        }
    }

    /// Append the encoded value to a buffer
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            IndexValue::Bool(v) => buf.put_u8(*v as u8),
            IndexValue::U8(v) => buf.put_u8(*v),
            IndexValue::I8(v) => buf.put_i8(*v),
            IndexValue::U16(v) => buf.put_u16_le(*v),
            IndexValue::I16(v) => buf.put_i16_le(*v),
            IndexValue::U32(v) => buf.put_u32_le(*v),
            IndexValue::I32(v) => buf.put_i32_le(*v),
            IndexValue::U64(v) => buf.put_u64_le(*v),
            IndexValue::I64(v) => buf.put_i64_le(*v),
            IndexValue::F32(v) => buf.put_f32_le(*v),
            IndexValue::F64(v) => buf.put_f64_le(*v),
            IndexValue::Decimal(v) => v.encode(buf),
            IndexValue::String(v) => buf.put_slice(v.as_bytes()),
            IndexValue::DateTime(v) => buf.put_i64_le(*v),
        }
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Decode a value of the given type from exactly `bytes`
    pub fn decode(value_type: ValueType, bytes: &[u8]) -> Result<Self> {
        if let Some(width) = value_type.fixed_width() {
            if bytes.len() != width {
                return Err(UnbloatError::Serialization(format!(
                    "{} value needs {} bytes, got {}",
                    value_type,
                    width,
                    bytes.len()
                )));
            }
        }

        let mut buf = bytes;
        let value = match value_type {
            ValueType::Bool => match buf.get_u8() {
                0 => IndexValue::Bool(false),
                1 => IndexValue::Bool(true),
                other => {
                    return Err(UnbloatError::Serialization(format!(
                        "invalid bool byte 0x{:02x}",
                        other
                    )))
                }
            },
            ValueType::U8 => IndexValue::U8(buf.get_u8()),
            ValueType::I8 => IndexValue::I8(buf.get_i8()),
            ValueType::U16 => IndexValue::U16(buf.get_u16_le()),
            ValueType::I16 => IndexValue::I16(buf.get_i16_le()),
            ValueType::U32 => IndexValue::U32(buf.get_u32_le()),
            ValueType::I32 => IndexValue::I32(buf.get_i32_le()),
            ValueType::U64 => IndexValue::U64(buf.get_u64_le()),
            ValueType::I64 => IndexValue::I64(buf.get_i64_le()),
            ValueType::F32 => IndexValue::F32(buf.get_f32_le()),
            ValueType::F64 => IndexValue::F64(buf.get_f64_le()),
            ValueType::Decimal => IndexValue::Decimal(Decimal::decode(buf)?),
            ValueType::DateTime => IndexValue::DateTime(buf.get_i64_le()),
            ValueType::String => {
                let s = std::str::from_utf8(bytes).map_err(|e| {
                    UnbloatError::Serialization(format!("invalid UTF-8 in string value: {}", e))
                })?;
                IndexValue::String(s.to_string())
            }
        };

        Ok(value)
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexValue::*;

        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (U8(a), U8(b)) => a.cmp(b),
            (I8(a), I8(b)) => a.cmp(b),
            (U16(a), U16(b)) => a.cmp(b),
            (I16(a), I16(b)) => a.cmp(b),
            (U32(a), U32(b)) => a.cmp(b),
            (I32(a), I32(b)) => a.cmp(b),
            (U64(a), U64(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (F32(a), F32(b)) => a.total_cmp(b),
            (F64(a), F64(b)) => a.total_cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (a, b) => a.value_type().rank().cmp(&b.value_type().rank()),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Bool(v) => write!(f, "{}", v),
            IndexValue::U8(v) => write!(f, "{}", v),
            IndexValue::I8(v) => write!(f, "{}", v),
            IndexValue::U16(v) => write!(f, "{}", v),
            IndexValue::I16(v) => write!(f, "{}", v),
            IndexValue::U32(v) => write!(f, "{}", v),
            IndexValue::I32(v) => write!(f, "{}", v),
            IndexValue::U64(v) => write!(f, "{}", v),
            IndexValue::I64(v) => write!(f, "{}", v),
            IndexValue::F32(v) => write!(f, "{}", v),
            IndexValue::F64(v) => write!(f, "{}", v),
            IndexValue::Decimal(v) => write!(f, "{}", v),
            IndexValue::String(v) => write!(f, "{:?}", v),
            IndexValue::DateTime(_) => match self.as_datetime() {
                Some(dt) => write!(f, "{}", dt.to_rfc3339()),
                None => write!(f, "<invalid datetime>"),
            },
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for IndexValue {
                fn from(v: $ty) -> Self {
                    IndexValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => String,
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::String(v.to_string())
    }
}

impl From<&String> for IndexValue {
    fn from(v: &String) -> Self {
        IndexValue::String(v.clone())
    }
}

impl TryFrom<DateTime<Utc>> for IndexValue {
    type Error = UnbloatError;

    fn try_from(v: DateTime<Utc>) -> Result<Self> {
        IndexValue::datetime(&v)
    }
}
