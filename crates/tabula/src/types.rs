//! Value types for tabula
//!
//! The closed set of values exchanged between records, generated SQL, and
//! drivers:
//! - Primitive types (bool, integers, floats, decimal)
//! - Date/time types with and without timezone
//! - Binary data, UUIDs, JSON
//! - Arrays (placeholder expansion in generated SQL)

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// SQL value type that can hold any database value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer (TINYINT)
    Int8(i8),
    /// 16-bit signed integer (SMALLINT)
    Int16(i16),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 32-bit floating point (REAL)
    Float32(f32),
    /// 64-bit floating point (DOUBLE PRECISION)
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, TEXT, CHAR)
    String(String),
    /// Binary data (BYTEA, BLOB, VARBINARY)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (TIMESTAMP)
    DateTime(NaiveDateTime),
    /// Timestamp pinned to UTC (TIMESTAMPTZ)
    DateTimeTz(DateTime<Utc>),
    /// UUID
    Uuid(Uuid),
    /// JSON value
    Json(serde_json::Value),
    /// Array of values; expands to one placeholder per element in generated SQL
    Array(Vec<Value>),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int8(_) => "TINYINT",
            Self::Int16(_) => "SMALLINT",
            Self::Int32(_) => "INTEGER",
            Self::Int64(_) => "BIGINT",
            Self::Float32(_) => "REAL",
            Self::Float64(_) => "DOUBLE PRECISION",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "VARCHAR",
            Self::Bytes(_) => "VARBINARY",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "TIMESTAMP",
            Self::DateTimeTz(_) => "TIMESTAMPTZ",
            Self::Uuid(_) => "UUID",
            Self::Json(_) => "JSON",
            Self::Array(_) => "ARRAY",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int8(n) => Some(*n != 0),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int8(n) => Some(i64::from(*n)),
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Float32(n) if n.is_finite() => Some(*n as i64),
            Self::Float64(n) if n.is_finite() => Some(*n as i64),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int8(n) => Some(f64::from(*n)),
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to view as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to view as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b.as_slice()),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to convert to UUID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            Self::String(s) => Uuid::parse_str(s).ok(),
            Self::Bytes(b) if b.len() == 16 => Uuid::from_slice(b).ok(),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int8(n) => Some(n.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Uuid(u) => Some(u.to_string()),
            _ => None,
        }
    }

    /// Whether this value is the "unset" form of a primary key: NULL, zero,
    /// an empty string, or the nil UUID. Drives insert-vs-update dispatch.
    pub fn is_default_key(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Int8(n) => *n == 0,
            Self::Int16(n) => *n == 0,
            Self::Int32(n) => *n == 0,
            Self::Int64(n) => *n == 0,
            Self::String(s) => s.is_empty(),
            Self::Uuid(u) => u.is_nil(),
            Self::Decimal(d) => d.is_zero(),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int64(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Provider type tags
// ============================================================================

/// Provider type tag declared per column; constrains which size/precision
/// attributes a column declaration may carry (see the row source adapter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SqlType {
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    /// 32-bit float; takes no attributes
    Real,
    /// 64-bit float; optional precision/scale
    Double,
    /// Exact numeric; precision and scale are mandatory
    Decimal,
    /// Fixed-width character data; bounded size
    Char,
    /// Variable character data; bounded size
    VarChar,
    /// Unbounded character data
    Text,
    /// Fixed-width binary; bounded size
    Binary,
    /// Variable binary; bounded size
    VarBinary,
    /// Unbounded binary data
    Blob,
    Date,
    /// Time of day; optional fractional-second precision
    Time,
    /// Timestamp without timezone
    DateTime,
    /// Timestamp with fractional-second precision
    DateTime2,
    /// Timestamp with timezone offset; optional fractional-second precision
    DateTimeOffset,
    Uuid,
    Json,
}

impl SqlType {
    /// Canonical name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::TinyInt => "tinyint",
            Self::SmallInt => "smallint",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Real => "real",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Char => "char",
            Self::VarChar => "varchar",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::VarBinary => "varbinary",
            Self::Blob => "blob",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
            Self::Uuid => "uuid",
            Self::Json => "json",
        }
    }

    /// Whether a bounded column size may accompany this type
    pub const fn allows_size(self) -> bool {
        matches!(
            self,
            Self::Char | Self::VarChar | Self::Binary | Self::VarBinary
        )
    }

    /// Whether a numeric precision may accompany this type
    pub const fn allows_precision(self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Double | Self::Time | Self::DateTime2 | Self::DateTimeOffset
        )
    }

    /// Whether a numeric scale may accompany this type
    pub const fn allows_scale(self) -> bool {
        matches!(self, Self::Decimal | Self::Double)
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Rows
// ============================================================================

/// Database row: a shared column-name header plus one value vector.
///
/// Result sets share a single header allocation across all their rows. Name
/// lookup is case-insensitive, matching how the mapper binds columns.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get the shared header
    #[inline]
    pub fn header(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get value by column name (case-insensitive)
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Consume the row, yielding its values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

// ============================================================================
// Typed extraction
// ============================================================================

/// Conversion from a database [`Value`] into a typed destination.
///
/// `from_value` receives non-null values and applies the general
/// convert-if-incompatible rule (integer widening, numeric/text parsing).
/// `from_null` decides what NULL means for the destination; scalar types
/// reject it, `Option<T>` maps it to `None`.
pub trait FromValue: Sized {
    /// Convert a non-null value
    fn from_value(value: Value) -> Result<Self>;

    /// Map SQL NULL into this destination
    fn from_null() -> Result<Self> {
        Err(Error::mapping("NULL value for non-nullable destination"))
    }

    /// Dispatch on nullness
    fn from_nullable(value: Value) -> Result<Self> {
        if value.is_null() {
            Self::from_null()
        } else {
            Self::from_value(value)
        }
    }
}

fn incompatible(value: &Value, target: &str) -> Error {
    Error::mapping(format!(
        "cannot convert {} to {target}",
        value.type_name()
    ))
}

macro_rules! int_from_value {
    ($ty:ty) => {
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                let wide = value
                    .as_i64()
                    .ok_or_else(|| incompatible(&value, stringify!($ty)))?;
                <$ty>::try_from(wide).map_err(|_| {
                    Error::mapping(format!(
                        "value {wide} out of range for {}",
                        stringify!($ty)
                    ))
                })
            }
        }
    };
}

int_from_value!(i8);
int_from_value!(i16);
int_from_value!(i32);
int_from_value!(i64);
int_from_value!(u32);
int_from_value!(u64);

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| incompatible(&value, "bool"))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| incompatible(&value, "f64"))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        value
            .as_f64()
            .map(|f| f as f32)
            .ok_or_else(|| incompatible(&value, "f32"))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        value
            .as_string()
            .ok_or_else(|| incompatible(&value, "String"))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            other => Err(incompatible(&other, "Vec<u8>")),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Decimal(d) => Ok(*d),
            Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => {
                // as_i64 covers every integer arm above
                Ok(Decimal::from(value.as_i64().unwrap_or_default()))
            }
            Value::Float32(f) => {
                Decimal::try_from(*f).map_err(|_| incompatible(&value, "Decimal"))
            }
            Value::Float64(f) => {
                Decimal::try_from(*f).map_err(|_| incompatible(&value, "Decimal"))
            }
            Value::String(s) => s.parse().map_err(|_| incompatible(&value, "Decimal")),
            _ => Err(incompatible(&value, "Decimal")),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self> {
        value.as_uuid().ok_or_else(|| incompatible(&value, "Uuid"))
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Date(d) => Ok(*d),
            Value::DateTime(dt) => Ok(dt.date()),
            Value::DateTimeTz(dt) => Ok(dt.date_naive()),
            Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| incompatible(&value, "NaiveDate")),
            _ => Err(incompatible(&value, "NaiveDate")),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Time(t) => Ok(*t),
            Value::String(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                .map_err(|_| incompatible(&value, "NaiveTime")),
            _ => Err(incompatible(&value, "NaiveTime")),
        }
    }
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::DateTime(dt) => Ok(*dt),
            Value::DateTimeTz(dt) => Ok(dt.naive_utc()),
            Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0).unwrap_or_default()),
            Value::String(s) => {
                parse_naive_datetime(s).ok_or_else(|| incompatible(&value, "NaiveDateTime"))
            }
            _ => Err(incompatible(&value, "NaiveDateTime")),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::DateTimeTz(dt) => Ok(*dt),
            Value::DateTime(dt) => Ok(dt.and_utc()),
            Value::String(s) => parse_naive_datetime(s)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| incompatible(&value, "DateTime<Utc>")),
            _ => Err(incompatible(&value, "DateTime<Utc>")),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Json(j) => Ok(j),
            Value::String(s) => {
                serde_json::from_str(&s).map_err(|e| Error::mapping(format!("invalid JSON: {e}")))
            }
            other => Err(incompatible(&other, "serde_json::Value")),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }

    fn from_null() -> Result<Self> {
        Ok(Value::Null)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        T::from_value(value).map(Some)
    }

    fn from_null() -> Result<Self> {
        Ok(None)
    }
}
