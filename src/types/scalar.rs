//! Scalar values for literals, partition values and cell access

use crate::error::{QueryError, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array,
    Int64Array, NullArray, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Scalar value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(OrderedFloat<f32>),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since epoch
    Date32(i32),
    /// Microseconds since epoch, no zone
    Timestamp(i64),
}

impl ScalarValue {
    pub fn data_type(&self) -> ArrowDataType {
        match self {
            ScalarValue::Null => ArrowDataType::Null,
            ScalarValue::Boolean(_) => ArrowDataType::Boolean,
            ScalarValue::Int32(_) => ArrowDataType::Int32,
            ScalarValue::Int64(_) => ArrowDataType::Int64,
            ScalarValue::Float32(_) => ArrowDataType::Float32,
            ScalarValue::Float64(_) => ArrowDataType::Float64,
            ScalarValue::Utf8(_) => ArrowDataType::Utf8,
            ScalarValue::Date32(_) => ArrowDataType::Date32,
            ScalarValue::Timestamp(_) => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Broadcast this value into an array of `num_rows` entries
    pub fn to_array(&self, num_rows: usize) -> ArrayRef {
        match self {
            ScalarValue::Null => Arc::new(NullArray::new(num_rows)),
            ScalarValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; num_rows])),
            ScalarValue::Int32(v) => Arc::new(Int32Array::from(vec![*v; num_rows])),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from(vec![*v; num_rows])),
            ScalarValue::Float32(v) => Arc::new(Float32Array::from(vec![v.0; num_rows])),
            ScalarValue::Float64(v) => Arc::new(Float64Array::from(vec![v.0; num_rows])),
            ScalarValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); num_rows])),
            ScalarValue::Date32(v) => Arc::new(Date32Array::from(vec![*v; num_rows])),
            ScalarValue::Timestamp(v) => {
                Arc::new(TimestampMicrosecondArray::from(vec![*v; num_rows]))
            }
        }
    }

    /// Read the value at `row` of `array`
    pub fn try_from_array(array: &dyn Array, row: usize) -> Result<Self> {
        if row >= array.len() {
            return Err(QueryError::execution(
                "ColumnarBatch",
                format!("row {}", row),
                format!("row index out of range for {} rows", array.len()),
            ));
        }
        if array.is_null(row) {
            return Ok(ScalarValue::Null);
        }
        let any = array.as_any();
        let value = match array.data_type() {
            ArrowDataType::Null => ScalarValue::Null,
            ArrowDataType::Boolean => {
                ScalarValue::Boolean(downcast::<BooleanArray>(any)?.value(row))
            }
            ArrowDataType::Int32 => ScalarValue::Int32(downcast::<Int32Array>(any)?.value(row)),
            ArrowDataType::Int64 => ScalarValue::Int64(downcast::<Int64Array>(any)?.value(row)),
            ArrowDataType::Float32 => {
                ScalarValue::Float32(OrderedFloat(downcast::<Float32Array>(any)?.value(row)))
            }
            ArrowDataType::Float64 => {
                ScalarValue::Float64(OrderedFloat(downcast::<Float64Array>(any)?.value(row)))
            }
            ArrowDataType::Utf8 => {
                ScalarValue::Utf8(downcast::<StringArray>(any)?.value(row).to_string())
            }
            ArrowDataType::Date32 => ScalarValue::Date32(downcast::<Date32Array>(any)?.value(row)),
            ArrowDataType::Timestamp(TimeUnit::Microsecond, _) => {
                ScalarValue::Timestamp(downcast::<TimestampMicrosecondArray>(any)?.value(row))
            }
            other => {
                return Err(QueryError::TypeMismatch(format!(
                    "Unsupported array type {:?}",
                    other
                )))
            }
        };
        Ok(value)
    }

    /// Numeric view used for cross-type comparisons
    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int32(v) => Some(*v as f64),
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float32(v) => Some(v.0 as f64),
            ScalarValue::Float64(v) => Some(v.0),
            _ => None,
        }
    }

    /// Compare two non-null values. Numeric types compare across widths;
    /// other types only compare with themselves.
    pub fn compare(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Int32(a), ScalarValue::Int32(b)) => Some(a.cmp(b)),
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
            (ScalarValue::Int32(a), ScalarValue::Int64(b)) => Some((*a as i64).cmp(b)),
            (ScalarValue::Int64(a), ScalarValue::Int32(b)) => Some(a.cmp(&(*b as i64))),
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => Some(a.cmp(b)),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
            (ScalarValue::Date32(a), ScalarValue::Date32(b)) => Some(a.cmp(b)),
            (ScalarValue::Timestamp(a), ScalarValue::Timestamp(b)) => Some(a.cmp(b)),
            (ScalarValue::Null, _) | (_, ScalarValue::Null) => None,
            (a, b) => {
                let (x, y) = (a.as_f64()?, b.as_f64()?);
                x.partial_cmp(&y)
            }
        }
    }
}

fn downcast<T: 'static>(any: &dyn std::any::Any) -> Result<&T> {
    any.downcast_ref::<T>()
        .ok_or_else(|| QueryError::Internal("array downcast failed".to_string()))
}

/// Parse `YYYY-MM-DD` into days since epoch
pub fn parse_date(s: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    Some(date.signed_duration_since(epoch).num_days() as i32)
}

/// Parse `YYYY-MM-DD[ T]HH:MM:SS[.ffffff]` (or a bare date) into epoch microseconds
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts.and_utc().timestamp_micros());
        }
    }
    parse_date(s).map(|days| days as i64 * MICROS_PER_DAY)
}

pub const MICROS_PER_DAY: i64 = 86_400_000_000;

fn format_date(days: i32) -> String {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn format_timestamp(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|ts| ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
        .unwrap_or_else(|| micros.to_string())
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(v) => write!(f, "{}", v),
            ScalarValue::Int32(v) => write!(f, "{}", v),
            ScalarValue::Int64(v) => write!(f, "{}", v),
            ScalarValue::Float32(v) => write!(f, "{}", v),
            ScalarValue::Float64(v) => write!(f, "{}", v),
            ScalarValue::Utf8(v) => write!(f, "'{}'", v),
            ScalarValue::Date32(v) => write!(f, "DATE '{}'", format_date(*v)),
            ScalarValue::Timestamp(v) => write!(f, "TIMESTAMP '{}'", format_timestamp(*v)),
        }
    }
}
