//! Partition transforms

use crate::error::{QueryError, Result};
use crate::types::{PrimitiveType, ScalarValue, MICROS_PER_DAY};
use arrow::array::{Array, ArrayRef};
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MICROS_PER_HOUR: i64 = 3_600_000_000;

/// Derives a partition value from a source column value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Transform {
    Identity,
    /// Years since 1970
    Year,
    /// Months since 1970-01
    Month,
    /// Days since epoch
    Day,
    /// Hours since epoch
    Hour,
    /// Integer floor to a multiple of the width, or string prefix
    Truncate(u32),
    /// Always null
    Void,
}

impl Transform {
    /// Type of the partition value produced from a `source` column, or
    /// `IncompatibleTransform` if the source type is not supported
    pub fn result_type(&self, source: PrimitiveType) -> Result<PrimitiveType> {
        let incompatible = || {
            QueryError::IncompatibleTransform(format!(
                "transform {} cannot be applied to a {} column",
                self, source
            ))
        };
        match self {
            Transform::Identity | Transform::Void => Ok(source),
            Transform::Year | Transform::Month | Transform::Day => {
                if source.is_temporal() {
                    Ok(PrimitiveType::Int)
                } else {
                    Err(incompatible())
                }
            }
            Transform::Hour => match source {
                PrimitiveType::Timestamp => Ok(PrimitiveType::Int),
                _ => Err(incompatible()),
            },
            Transform::Truncate(width) => {
                if *width == 0 {
                    return Err(QueryError::IncompatibleTransform(
                        "truncate width must be positive".to_string(),
                    ));
                }
                match source {
                    PrimitiveType::Int | PrimitiveType::Long | PrimitiveType::String => Ok(source),
                    _ => Err(incompatible()),
                }
            }
        }
    }

    /// Whether `a <= b` implies `transform(a) <= transform(b)`
    pub fn preserves_order(&self) -> bool {
        !matches!(self, Transform::Void)
    }

    /// Apply to a single value. NULL maps to NULL.
    pub fn apply_scalar(&self, value: &ScalarValue) -> Result<ScalarValue> {
        if value.is_null() || matches!(self, Transform::Void) {
            return Ok(ScalarValue::Null);
        }
        let unsupported = || {
            QueryError::IncompatibleTransform(format!(
                "transform {} cannot be applied to {}",
                self, value
            ))
        };

        let result = match (self, value) {
            (Transform::Identity, v) => v.clone(),
            (Transform::Year, ScalarValue::Date32(d)) => {
                ScalarValue::Int32(date_from_days(*d).ok_or_else(unsupported)?.year() - 1970)
            }
            (Transform::Year, ScalarValue::Timestamp(ts)) => {
                ScalarValue::Int32(date_from_micros(*ts).ok_or_else(unsupported)?.year() - 1970)
            }
            (Transform::Month, ScalarValue::Date32(d)) => {
                ScalarValue::Int32(months_since_epoch(date_from_days(*d).ok_or_else(unsupported)?))
            }
            (Transform::Month, ScalarValue::Timestamp(ts)) => ScalarValue::Int32(
                months_since_epoch(date_from_micros(*ts).ok_or_else(unsupported)?),
            ),
            (Transform::Day, ScalarValue::Date32(d)) => ScalarValue::Int32(*d),
            (Transform::Day, ScalarValue::Timestamp(ts)) => {
                ScalarValue::Int32(ts.div_euclid(MICROS_PER_DAY) as i32)
            }
            (Transform::Hour, ScalarValue::Timestamp(ts)) => {
                ScalarValue::Int32(ts.div_euclid(MICROS_PER_HOUR) as i32)
            }
            (Transform::Truncate(w), ScalarValue::Int32(v)) => {
                // Floors below the type minimum clamp to it
                let v = *v as i64;
                let floor = v - v.rem_euclid(*w as i64);
                ScalarValue::Int32(floor.max(i32::MIN as i64) as i32)
            }
            (Transform::Truncate(w), ScalarValue::Int64(v)) => {
                let v = *v as i128;
                let floor = v - v.rem_euclid(*w as i128);
                ScalarValue::Int64(floor.max(i64::MIN as i128) as i64)
            }
            (Transform::Truncate(w), ScalarValue::Utf8(s)) => {
                ScalarValue::Utf8(s.chars().take(*w as usize).collect())
            }
            _ => return Err(unsupported()),
        };
        Ok(result)
    }

    /// Apply to every value of a column
    pub fn apply(&self, array: &ArrayRef, source: PrimitiveType) -> Result<ArrayRef> {
        let result_type = self.result_type(source)?;
        let values = (0..array.len())
            .map(|row| {
                let value = ScalarValue::try_from_array(array.as_ref(), row)?;
                self.apply_scalar(&value)
            })
            .collect::<Result<Vec<_>>>()?;
        result_type.build_array(&values)
    }

    /// Human readable form of a partition value produced by this transform
    pub fn to_human_string(&self, value: &ScalarValue) -> String {
        match (self, value) {
            (_, ScalarValue::Null) => "null".to_string(),
            (Transform::Year, ScalarValue::Int32(y)) => format!("{:04}", 1970 + y),
            (Transform::Month, ScalarValue::Int32(m)) => {
                let year = 1970 + m.div_euclid(12);
                let month = m.rem_euclid(12) + 1;
                format!("{:04}-{:02}", year, month)
            }
            (Transform::Day, ScalarValue::Int32(d)) => match date_from_days(*d) {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => d.to_string(),
            },
            (Transform::Hour, ScalarValue::Int32(h)) => {
                match DateTime::from_timestamp_micros(*h as i64 * MICROS_PER_HOUR) {
                    Some(ts) => {
                        let ts = ts.naive_utc();
                        format!("{}-{:02}", ts.date().format("%Y-%m-%d"), ts.hour())
                    }
                    None => h.to_string(),
                }
            }
            (_, ScalarValue::Date32(d)) => match date_from_days(*d) {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => d.to_string(),
            },
            (_, ScalarValue::Timestamp(ts)) => match DateTime::from_timestamp_micros(*ts) {
                Some(t) => t.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
                None => ts.to_string(),
            },
            (_, ScalarValue::Utf8(s)) => s.clone(),
            (_, other) => other.to_string(),
        }
    }
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(days as i64))
}

fn date_from_micros(micros: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_micros(micros).map(|ts| ts.date_naive())
}

fn months_since_epoch(date: NaiveDate) -> i32 {
    (date.year() - 1970) * 12 + date.month0() as i32
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Truncate(w) => write!(f, "truncate[{}]", w),
            Transform::Void => write!(f, "void"),
        }
    }
}

impl FromStr for Transform {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "identity" => return Ok(Transform::Identity),
            "year" => return Ok(Transform::Year),
            "month" => return Ok(Transform::Month),
            "day" => return Ok(Transform::Day),
            "hour" => return Ok(Transform::Hour),
            "void" => return Ok(Transform::Void),
            _ => {}
        }
        lower
            .strip_prefix("truncate[")
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|w| w.parse::<u32>().ok())
            .map(Transform::Truncate)
            .ok_or_else(|| QueryError::InvalidArgument(format!("Unknown transform: {}", s)))
    }
}

impl From<Transform> for String {
    fn from(t: Transform) -> Self {
        t.to_string()
    }
}

impl TryFrom<String> for Transform {
    type Error = QueryError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_timestamp;
    use arrow::array::{Int32Array, Int64Array, TimestampMicrosecondArray};
    use std::sync::Arc;

    #[test]
    fn test_day_transform() {
        let ts = parse_timestamp("2024-03-15 10:00:00").unwrap();
        let value = Transform::Day.apply_scalar(&ScalarValue::Timestamp(ts)).unwrap();
        assert_eq!(value, ScalarValue::Int32(19797));
        assert_eq!(Transform::Day.to_human_string(&value), "2024-03-15");

        // deterministic
        assert_eq!(
            Transform::Day.apply_scalar(&ScalarValue::Timestamp(ts)).unwrap(),
            value
        );
    }

    #[test]
    fn test_day_before_epoch() {
        let value = Transform::Day
            .apply_scalar(&ScalarValue::Timestamp(-1))
            .unwrap();
        assert_eq!(value, ScalarValue::Int32(-1));
        assert_eq!(Transform::Day.to_human_string(&value), "1969-12-31");
    }

    #[test]
    fn test_temporal_transforms() {
        let ts = parse_timestamp("2024-03-15 10:30:00").unwrap();
        let year = Transform::Year.apply_scalar(&ScalarValue::Timestamp(ts)).unwrap();
        assert_eq!(year, ScalarValue::Int32(54));
        assert_eq!(Transform::Year.to_human_string(&year), "2024");

        let month = Transform::Month.apply_scalar(&ScalarValue::Date32(19797)).unwrap();
        assert_eq!(month, ScalarValue::Int32(54 * 12 + 2));
        assert_eq!(Transform::Month.to_human_string(&month), "2024-03");

        let hour = Transform::Hour.apply_scalar(&ScalarValue::Timestamp(ts)).unwrap();
        assert_eq!(hour, ScalarValue::Int32(19797 * 24 + 10));
        assert_eq!(Transform::Hour.to_human_string(&hour), "2024-03-15-10");
    }

    #[test]
    fn test_truncate() {
        let t = Transform::Truncate(10);
        assert_eq!(t.apply_scalar(&ScalarValue::Int64(27)).unwrap(), ScalarValue::Int64(20));
        assert_eq!(t.apply_scalar(&ScalarValue::Int32(-1)).unwrap(), ScalarValue::Int32(-10));
    }

    #[test]
    fn test_truncate_near_integer_min() {
        let t = Transform::Truncate(3);
        assert_eq!(
            t.apply_scalar(&ScalarValue::Int32(i32::MIN)).unwrap(),
            ScalarValue::Int32(i32::MIN)
        );
        assert_eq!(
            t.apply_scalar(&ScalarValue::Int64(i64::MIN)).unwrap(),
            ScalarValue::Int64(i64::MIN)
        );
        assert_eq!(
            t.apply_scalar(&ScalarValue::Int32(i32::MIN + 1)).unwrap(),
            ScalarValue::Int32(i32::MIN)
        );
        assert_eq!(
            Transform::Truncate(2)
                .apply_scalar(&ScalarValue::Utf8("abc".into()))
                .unwrap(),
            ScalarValue::Utf8("ab".into())
        );
    }

    #[test]
    fn test_result_type_validation() {
        assert!(matches!(
            Transform::Day.result_type(PrimitiveType::Long),
            Err(QueryError::IncompatibleTransform(_))
        ));
        assert!(Transform::Hour.result_type(PrimitiveType::Date).is_err());
        assert!(Transform::Truncate(4).result_type(PrimitiveType::Date).is_err());
        assert!(Transform::Truncate(0).result_type(PrimitiveType::Long).is_err());
        assert_eq!(
            Transform::Identity.result_type(PrimitiveType::String).unwrap(),
            PrimitiveType::String
        );
    }

    #[test]
    fn test_null_and_void() {
        assert_eq!(
            Transform::Day.apply_scalar(&ScalarValue::Null).unwrap(),
            ScalarValue::Null
        );
        assert_eq!(
            Transform::Void.apply_scalar(&ScalarValue::Int64(3)).unwrap(),
            ScalarValue::Null
        );
        assert_eq!(Transform::Day.to_human_string(&ScalarValue::Null), "null");
    }

    #[test]
    fn test_vectorized_apply() {
        let array: ArrayRef = Arc::new(TimestampMicrosecondArray::from(vec![
            Some(0),
            None,
            Some(MICROS_PER_DAY * 2),
        ]));
        let days = Transform::Day.apply(&array, PrimitiveType::Timestamp).unwrap();
        let days = days.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(days.value(0), 0);
        assert!(days.is_null(1));
        assert_eq!(days.value(2), 2);

        let longs: ArrayRef = Arc::new(Int64Array::from(vec![1]));
        assert!(Transform::Day.apply(&longs, PrimitiveType::Long).is_err());
    }

    #[test]
    fn test_string_form() {
        for t in [
            Transform::Identity,
            Transform::Year,
            Transform::Month,
            Transform::Day,
            Transform::Hour,
            Transform::Truncate(16),
            Transform::Void,
        ] {
            assert_eq!(t.to_string().parse::<Transform>().unwrap(), t);
        }
        assert_eq!(
            serde_json::to_string(&Transform::Truncate(3)).unwrap(),
            "\"truncate[3]\""
        );
    }
}
