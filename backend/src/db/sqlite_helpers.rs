//! SQLite helper utilities for type conversion
//!
//! SQLite has no native boolean or timestamp types. Booleans are stored as
//! 0/1 integers and timestamps as fixed-width ISO8601 TEXT so that string
//! comparison orders them chronologically.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, ValueRef};

use crate::orm::{FieldType, Value};

// ============================================================================
// Timestamp Helpers (stored as ISO8601 TEXT in SQLite)
// ============================================================================

/// Convert a chrono DateTime to a fixed-width ISO8601 string
#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an ISO8601 string to DateTime
#[inline]
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's datetime() format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
}

// ============================================================================
// Boolean Helpers (SQLite uses 0/1 integers)
// ============================================================================

/// Convert bool to SQLite integer (0 or 1)
#[inline]
pub fn bool_to_int(b: bool) -> i32 {
    if b { 1 } else { 0 }
}

/// Convert SQLite integer to bool
#[inline]
pub fn int_to_bool(i: i64) -> bool {
    i != 0
}

// ============================================================================
// Binding and decoding
// ============================================================================

/// Bind one value to a query in its SQLite storage form
pub fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(bool_to_int(*b)),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.as_str()),
        Value::Time(t) => query.bind(datetime_to_str(*t)),
    }
}

/// Bind every value in order
pub fn bind_all<'q>(sql: &'q str, values: &'q [Value]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    values
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

/// Decode column `index` of `row` as `field_type`
pub fn decode_value(row: &SqliteRow, index: usize, field_type: FieldType) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    Ok(match field_type {
        FieldType::Int => Value::Int(row.try_get_unchecked::<i64, _>(index)?),
        FieldType::Float => Value::Float(row.try_get_unchecked::<f64, _>(index)?),
        FieldType::Bool => Value::Bool(int_to_bool(row.try_get_unchecked::<i64, _>(index)?)),
        FieldType::String => Value::String(row.try_get_unchecked::<String, _>(index)?),
        FieldType::Time => {
            let raw = row.try_get_unchecked::<String, _>(index)?;
            let parsed = str_to_datetime(&raw).map_err(|e| sqlx::Error::ColumnDecode {
                index: index.to_string(),
                source: Box::new(e),
            })?;
            Value::Time(parsed)
        }
    })
}

/// SQLite column type for a field type
pub fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Bool | FieldType::Int => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::String | FieldType::Time => "TEXT",
    }
}
