//! Row decoding that tolerates driver differences.
//!
//! The `any` driver reports a column by the type of the value it holds, so
//! an aggregate may come back as an integer on one database and as a double
//! on another. These helpers accept either.

use crate::error::{HistoryError, HistoryResult};
use crate::storage::sql::dialect::Dialect;
use sqlx::any::AnyRow;
use sqlx::Row;
use trendline_shared::{HistoryRecord, HistoryValue, LogValue, ValueType};

fn decode_error(column: &str, what: &str) -> HistoryError {
    HistoryError::Database(sqlx::Error::Decode(
        format!("column {:?}: {}", column, what).into(),
    ))
}

pub fn get_opt_i64(row: &AnyRow, column: &str) -> HistoryResult<Option<i64>> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(column) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(column) {
        return Ok(v.map(|v| v as i64));
    }
    let text: Option<String> = row.try_get(column)?;
    text.map(|s| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| decode_error(column, "not an integer"))
    })
    .transpose()
}

pub fn get_i64(row: &AnyRow, column: &str) -> HistoryResult<i64> {
    get_opt_i64(row, column)?.ok_or_else(|| decode_error(column, "unexpected NULL"))
}

pub fn get_opt_f64(row: &AnyRow, column: &str) -> HistoryResult<Option<f64>> {
    if let Ok(v) = row.try_get::<Option<f64>, _>(column) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(column) {
        return Ok(v.map(|v| v as f64));
    }
    let text: Option<String> = row.try_get(column)?;
    text.map(|s| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| decode_error(column, "not a number"))
    })
    .transpose()
}

fn get_u64(row: &AnyRow, column: &str) -> HistoryResult<u64> {
    if let Ok(v) = row.try_get::<i64, _>(column) {
        return Ok(v as u64);
    }
    if let Ok(s) = row.try_get::<String, _>(column) {
        return s
            .trim()
            .parse::<u64>()
            .map_err(|_| decode_error(column, "not an unsigned integer"));
    }
    let v: f64 = row.try_get(column)?;
    Ok(v as u64)
}

fn get_text(row: &AnyRow, column: &str) -> HistoryResult<String> {
    Ok(row.try_get::<Option<String>, _>(column)?.unwrap_or_default())
}

/// Column list selected for a record of the given value type.
pub fn record_columns(dialect: Dialect, value_type: ValueType) -> String {
    match value_type {
        ValueType::Log => {
            "itemid,clock,ns,value,timestamp,source,severity,logeventid".to_string()
        }
        ValueType::Unsigned => format!(
            "itemid,clock,ns,{} AS value",
            dialect.unsigned_value("value")
        ),
        ValueType::Float | ValueType::Str | ValueType::Text => {
            "itemid,clock,ns,value".to_string()
        }
    }
}

pub fn decode_record(row: &AnyRow, value_type: ValueType) -> HistoryResult<HistoryRecord> {
    let value = match value_type {
        ValueType::Float => HistoryValue::Float(
            get_opt_f64(row, "value")?.ok_or_else(|| decode_error("value", "unexpected NULL"))?,
        ),
        ValueType::Unsigned => HistoryValue::Unsigned(get_u64(row, "value")?),
        ValueType::Str => HistoryValue::Str(get_text(row, "value")?),
        ValueType::Text => HistoryValue::Text(get_text(row, "value")?),
        ValueType::Log => HistoryValue::Log(LogValue {
            timestamp: get_opt_i64(row, "timestamp")?.unwrap_or_default(),
            source: get_text(row, "source")?,
            severity: get_opt_i64(row, "severity")?.unwrap_or_default() as i32,
            logeventid: get_opt_i64(row, "logeventid")?.unwrap_or_default(),
            value: get_text(row, "value")?,
        }),
    };

    Ok(HistoryRecord::new(
        get_i64(row, "itemid")? as u64,
        get_i64(row, "clock")?,
        get_i64(row, "ns")? as u32,
        value,
    ))
}
