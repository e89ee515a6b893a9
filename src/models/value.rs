//! Bound arguments and decoded column values.

use crate::error::{ErrorKind, GatewayError, GatewayResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An argument bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlArg {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
    Timestamp(DateTime<Utc>),
}

impl SqlArg {
    /// Get the type name of this argument for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Convert a JSON literal into an argument.
    ///
    /// Arrays and objects are bound as JSON documents.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

macro_rules! impl_sql_arg_from {
    ($($ty:ty => $variant:ident($conv:expr)),+ $(,)?) => {
        $(
            impl From<$ty> for SqlArg {
                fn from(v: $ty) -> Self {
                    SqlArg::$variant($conv(v))
                }
            }
        )+
    };
}

impl_sql_arg_from! {
    bool => Bool(|v| v),
    i16 => Int(i64::from),
    i32 => Int(i64::from),
    i64 => Int(|v| v),
    u32 => Int(i64::from),
    f32 => Float(f64::from),
    f64 => Float(|v| v),
    String => Text(|v| v),
    &str => Text(|v: &str| v.to_string()),
    Vec<u8> => Bytes(|v| v),
    JsonValue => Json(|v| v),
    DateTime<Utc> => Timestamp(|v| v),
}

impl<T: Into<SqlArg>> From<Option<T>> for SqlArg {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlArg::Null)
    }
}

/// A column value decoded from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Unsigned values that do not fit in i64
    UInt(u64),
    Float(f64),
    /// Exact DECIMAL/NUMERIC representation
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    /// A non-NULL value the driver could not decode
    Unsupported { type_name: String },
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::Timestamp(_) => "timestamp",
            Self::Unsupported { .. } => "unsupported",
        }
    }

    /// Render the value as JSON (bytes become an array of numbers).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::UInt(u) => JsonValue::from(*u),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Decimal(s) | Self::Text(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => JsonValue::from(b.clone()),
            Self::Json(v) => v.clone(),
            Self::Date(d) => JsonValue::String(d.to_string()),
            Self::Time(t) => JsonValue::String(t.to_string()),
            Self::DateTime(dt) => JsonValue::String(dt.to_string()),
            Self::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
            Self::Unsupported { type_name } => {
                JsonValue::String(format!("<unsupported {}>", type_name))
            }
        }
    }
}

/// Conversion from a decoded column value into a typed destination.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self>;
}

fn mismatch(expected: &str, value: &SqlValue) -> GatewayError {
    match value {
        SqlValue::Unsupported { type_name } => ErrorKind::Failed.new(format!(
            "Cannot scan value of unsupported column type {} into {}",
            type_name, expected
        )),
        _ => ErrorKind::Failed.new(format!(
            "Cannot scan {} value into {}",
            value.type_name(),
            expected
        )),
    }
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        Ok(value.clone())
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Bool(b) => Ok(*b),
            // MySQL BOOLEAN is TINYINT(1)
            SqlValue::Int(i) => Ok(*i != 0),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Int(i) => Ok(*i),
            SqlValue::UInt(u) => i64::try_from(*u).map_err(|_| mismatch("i64", value)),
            SqlValue::Bool(b) => Ok(i64::from(*b)),
            other => Err(mismatch("i64", other)),
        }
    }
}

impl FromSqlValue for u64 {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::UInt(u) => Ok(*u),
            SqlValue::Int(i) => u64::try_from(*i).map_err(|_| mismatch("u64", value)),
            other => Err(mismatch("u64", other)),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        let wide = i64::from_sql_value(value).map_err(|_| mismatch("i32", value))?;
        i32::try_from(wide).map_err(|_| mismatch("i32", value))
    }
}

impl FromSqlValue for i16 {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        let wide = i64::from_sql_value(value).map_err(|_| mismatch("i16", value))?;
        i16::try_from(wide).map_err(|_| mismatch("i16", value))
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Float(f) => Ok(*f),
            SqlValue::Int(i) => Ok(*i as f64),
            SqlValue::Decimal(s) => s.parse().map_err(|_| mismatch("f64", value)),
            other => Err(mismatch("f64", other)),
        }
    }
}

impl FromSqlValue for f32 {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        f64::from_sql_value(value).map(|f| f as f32)
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Text(s) | SqlValue::Decimal(s) => Ok(s.clone()),
            SqlValue::Bytes(b) => String::from_utf8(b.clone()).map_err(|_| mismatch("String", value)),
            SqlValue::Json(v) => Ok(v.to_string()),
            other => Err(mismatch("String", other)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Bytes(b) => Ok(b.clone()),
            SqlValue::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(mismatch("Vec<u8>", other)),
        }
    }
}

impl FromSqlValue for JsonValue {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Json(v) => Ok(v.clone()),
            SqlValue::Text(s) => serde_json::from_str(s).map_err(|_| mismatch("JSON", value)),
            SqlValue::Unsupported { .. } => Err(mismatch("JSON", value)),
            other => Ok(other.to_json()),
        }
    }
}

impl FromSqlValue for NaiveDate {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Date(d) => Ok(*d),
            SqlValue::DateTime(dt) => Ok(dt.date()),
            other => Err(mismatch("NaiveDate", other)),
        }
    }
}

impl FromSqlValue for NaiveTime {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Time(t) => Ok(*t),
            other => Err(mismatch("NaiveTime", other)),
        }
    }
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::DateTime(dt) => Ok(*dt),
            SqlValue::Timestamp(ts) => Ok(ts.naive_utc()),
            other => Err(mismatch("NaiveDateTime", other)),
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Timestamp(ts) => Ok(*ts),
            SqlValue::DateTime(dt) => Ok(dt.and_utc()),
            other => Err(mismatch("DateTime<Utc>", other)),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> GatewayResult<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}
