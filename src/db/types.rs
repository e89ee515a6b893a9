//! Column type mappings.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders extract the value as a [`SqlValue`]
//!
//! Values that cannot be decoded are logged and surface as
//! [`SqlValue::Unsupported`], which refuses to scan into any typed
//! destination.

use crate::gateway::Row;
use crate::models::{Backend, SqlValue};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};
use std::sync::Arc;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    UnsignedInteger,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    /// Date and time without zone
    DateTime,
    /// Date and time in UTC
    Timestamp,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, backend: Backend) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    match lower.as_str() {
        "bool" | "boolean" => return TypeCategory::Boolean,
        "json" | "jsonb" => return TypeCategory::Json,
        "uuid" => return TypeCategory::Uuid,
        "date" => return TypeCategory::Date,
        "time" => return TypeCategory::Time,
        "datetime" => return TypeCategory::DateTime,
        "timestamptz" => return TypeCategory::Timestamp,
        // MySQL TIMESTAMP is stored in UTC; PostgreSQL TIMESTAMP has no zone
        "timestamp" => {
            return match backend {
                Backend::MySql => TypeCategory::Timestamp,
                Backend::Postgres => TypeCategory::DateTime,
            };
        }
        _ => {}
    }

    let is_integer = (lower.contains("int")
        && !lower.contains("interval")
        && !lower.contains("point"))
        || lower.contains("serial");
    if is_integer {
        if lower.contains("unsigned") {
            return TypeCategory::UnsignedInteger;
        }
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value, kept as the backend's text representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    let read = |offset: usize| -> Result<u16, sqlx::error::BoxDynError> {
        bytes
            .get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = read(0)? as usize;
    let weight = read(2)? as i16 as i32;
    let sign = read(4)?;
    let scale = read(6)? as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read(8 + 2 * i))
        .collect::<Result<Vec<u16>, _>>()?;
    // Digit group i has exponent (weight - i)
    let group = |i: i32| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", group(i)));
        }
    }

    if scale > 0 {
        let mut fraction = String::with_capacity(scale + 4);
        let mut i = weight + 1;
        while fraction.len() < scale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(scale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Conversion of a driver row into a gateway [`Row`].
pub trait DecodeRow {
    fn column_names(&self) -> Arc<[String]>;
    fn decode_values(&self) -> Vec<SqlValue>;

    /// Decode the row, reusing `columns` when the result set already has them.
    fn to_row(&self, columns: &mut Option<Arc<[String]>>) -> Row {
        let names = columns.get_or_insert_with(|| self.column_names());
        Row::new(Arc::clone(names), self.decode_values())
    }
}

impl DecodeRow for MySqlRow {
    fn column_names(&self) -> Arc<[String]> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn decode_values(&self) -> Vec<SqlValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Backend::MySql);
                mysql::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl DecodeRow for PgRow {
    fn column_names(&self) -> Arc<[String]> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn decode_values(&self) -> Vec<SqlValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Backend::Postgres);
                postgres::decode_column(self, idx, category)
            })
            .collect()
    }
}

/// Placeholder for a value the driver could not decode.
fn unsupported<R: sqlx::Row>(row: &R, idx: usize, error: &dyn std::fmt::Display) -> SqlValue {
    let type_name = row
        .columns()
        .get(idx)
        .map(|col| col.type_info().name().to_string())
        .unwrap_or_default();
    tracing::debug!(column = idx, type_name = %type_name, error = %error, "Unsupported column type");
    SqlValue::Unsupported { type_name }
}

// =============================================================================
// Backend-Specific Decoders
// =============================================================================
//
// Both modules share one shape; the differences are the integer widths and
// the fallbacks each driver supports.

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::UnsignedInteger => decode_unsigned(row, idx),
            TypeCategory::Boolean => decode_as(row, idx, SqlValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_as(row, idx, SqlValue::Bytes),
            TypeCategory::Json => decode_as(row, idx, SqlValue::Json),
            TypeCategory::Date => decode_or_text(row, idx, SqlValue::Date),
            TypeCategory::Time => decode_or_text(row, idx, SqlValue::Time),
            TypeCategory::DateTime => decode_or_text(row, idx, SqlValue::DateTime),
            TypeCategory::Timestamp => decode_or_text(row, idx, SqlValue::Timestamp),
            _ => decode_text(row, idx),
        }
    }

    fn decode_as<T>(row: &MySqlRow, idx: usize, wrap: fn(T) -> SqlValue) -> SqlValue
    where
        T: for<'r> Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(Some(v)) => wrap(v),
            Ok(None) => SqlValue::Null,
            Err(e) => unsupported(row, idx, &e),
        }
    }

    /// Temporal values outside chrono's range (zero dates) come back as text.
    fn decode_or_text<T>(row: &MySqlRow, idx: usize, wrap: fn(T) -> SqlValue) -> SqlValue
    where
        T: for<'r> Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(Some(v)) => wrap(v),
            Ok(None) => SqlValue::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> SqlValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => SqlValue::Decimal(v.0),
            Ok(None) => SqlValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                unsupported(row, idx, &e)
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> SqlValue {
        // Check NULL first
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        decode_unsigned(row, idx)
    }

    fn decode_unsigned(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get::<Option<u64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return SqlValue::UInt(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return SqlValue::UInt(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return SqlValue::UInt(v.into());
        }
        decode_as(row, idx, SqlValue::UInt)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return SqlValue::Float(v as f64);
        }
        decode_as(row, idx, SqlValue::Float)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> SqlValue {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => SqlValue::Text(v),
            Ok(None) => SqlValue::Null,
            // Text reported with a binary collation
            Err(_) => match row.try_get::<Option<Vec<u8>>, _>(idx) {
                Ok(Some(bytes)) => match String::from_utf8(bytes) {
                    Ok(s) => SqlValue::Text(s),
                    Err(e) => SqlValue::Bytes(e.into_bytes()),
                },
                Ok(None) => SqlValue::Null,
                Err(e) => unsupported(row, idx, &e),
            },
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer | TypeCategory::UnsignedInteger => decode_integer(row, idx),
            TypeCategory::Boolean => decode_as(row, idx, SqlValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_as(row, idx, SqlValue::Bytes),
            TypeCategory::Json => decode_as(row, idx, SqlValue::Json),
            TypeCategory::Uuid => decode_as(row, idx, |v: uuid::Uuid| SqlValue::Text(v.to_string())),
            TypeCategory::Date => decode_as(row, idx, SqlValue::Date),
            TypeCategory::Time => decode_as(row, idx, SqlValue::Time),
            TypeCategory::DateTime => decode_as(row, idx, SqlValue::DateTime),
            TypeCategory::Timestamp => decode_as(row, idx, SqlValue::Timestamp),
            _ => decode_as(row, idx, SqlValue::Text),
        }
    }

    fn decode_as<T>(row: &PgRow, idx: usize, wrap: fn(T) -> SqlValue) -> SqlValue
    where
        T: for<'r> Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(Some(v)) => wrap(v),
            Ok(None) => SqlValue::Null,
            Err(e) => unsupported(row, idx, &e),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> SqlValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => SqlValue::Decimal(v.0),
            Ok(None) => SqlValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                unsupported(row, idx, &e)
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return SqlValue::Int(v.into());
        }
        decode_as(row, idx, SqlValue::Int)
    }

    fn decode_float(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return SqlValue::Float(v as f64);
        }
        decode_as(row, idx, SqlValue::Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT", Backend::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT", Backend::Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT", Backend::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("INT4", Backend::Postgres), TypeCategory::Integer);
        assert_eq!(
            categorize_type("BIGINT UNSIGNED", Backend::MySql),
            TypeCategory::UnsignedInteger
        );
    }

    #[test]
    fn test_categorize_type_not_integer() {
        assert_eq!(categorize_type("INTERVAL", Backend::Postgres), TypeCategory::Unknown);
        assert_eq!(categorize_type("POINT", Backend::Postgres), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("DECIMAL", Backend::MySql), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC", Backend::Postgres), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("DATE", Backend::MySql), TypeCategory::Date);
        assert_eq!(categorize_type("DATETIME", Backend::MySql), TypeCategory::DateTime);
        assert_eq!(categorize_type("TIMESTAMP", Backend::MySql), TypeCategory::Timestamp);
        assert_eq!(categorize_type("TIMESTAMP", Backend::Postgres), TypeCategory::DateTime);
        assert_eq!(categorize_type("TIMESTAMPTZ", Backend::Postgres), TypeCategory::Timestamp);
    }

    fn numeric(weight: i16, sign: u16, scale: u16, digits: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&weight.to_be_bytes());
        bytes.extend_from_slice(&sign.to_be_bytes());
        bytes.extend_from_slice(&scale.to_be_bytes());
        for d in digits {
            bytes.extend_from_slice(&d.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_numeric_to_string() {
        assert_eq!(numeric_to_string(&numeric(0, 0, 2, &[12, 5000])).unwrap(), "12.50");
        assert_eq!(numeric_to_string(&numeric(1, 0, 0, &[1, 2345])).unwrap(), "12345");
        assert_eq!(numeric_to_string(&numeric(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(numeric_to_string(&numeric(0, 0x4000, 3, &[7, 1250])).unwrap(), "-7.125");
        assert_eq!(numeric_to_string(&numeric(-2, 0, 8, &[1234])).unwrap(), "0.00001234");
        assert_eq!(numeric_to_string(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(numeric_to_string(&numeric(0, 0xC000, 0, &[])).unwrap(), "NaN");
        assert!(numeric_to_string(&[0, 1]).is_err());
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(categorize_type("jsonb", Backend::Postgres), TypeCategory::Json);
        assert_eq!(categorize_type("BOOLEAN", Backend::MySql), TypeCategory::Boolean);
        assert_eq!(categorize_type("BYTEA", Backend::Postgres), TypeCategory::Binary);
        assert_eq!(categorize_type("VARBINARY", Backend::MySql), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR", Backend::MySql), TypeCategory::Text);
        assert_eq!(categorize_type("UUID", Backend::Postgres), TypeCategory::Uuid);
        assert_eq!(categorize_type("DOUBLE", Backend::MySql), TypeCategory::Float);
    }
}
