//! Typed values, field types and time-series helpers

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Double,
    Bool,
    /// Epoch milliseconds
    Timestamp,
}

impl FieldType {
    /// Whether values of this type compare numerically
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Int32 | FieldType::Int64 | FieldType::Double | FieldType::Timestamp
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

/// A single attribute value.
///
/// Serializes untagged, so a record renders as plain JSON. Also used as the
/// group key of `$apply` results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value (ints widen, strings and bools are `None`)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values of compatible kinds.
    ///
    /// Numbers compare numerically across widths, strings lexicographically,
    /// booleans with `false < true`. Mixed kinds and nulls are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
                Some(self.as_i64()?.cmp(&other.as_i64()?))
            }
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }

    /// Ordering used for sorting: nulls sort first, incomparable values are equal
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Canonical string used when the value is a hash key (join keys, group keys).
    ///
    /// Integral doubles map to the same key as the equivalent integer.
    pub fn key_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => format!("b:{}", b),
            Value::Int32(v) => format!("n:{}", v),
            Value::Int64(v) => format!("n:{}", v),
            Value::Double(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => {
                format!("n:{}", *v as i64)
            }
            Value::Double(v) => format!("n:{}", v),
            Value::String(s) => format!("s:{}", s),
        }
    }

    /// Convert a backend JSON value into a typed value for the given field type.
    ///
    /// Values that cannot represent the type become `Null`.
    pub fn from_json(json: &serde_json::Value, ty: FieldType) -> Value {
        use serde_json::Value as Json;

        match (ty, json) {
            (_, Json::Null) => Value::Null,
            (FieldType::String, Json::String(s)) => Value::String(s.clone()),
            (FieldType::String, Json::Number(n)) => Value::String(n.to_string()),
            (FieldType::String, Json::Bool(b)) => Value::String(b.to_string()),
            (FieldType::Bool, Json::Bool(b)) => Value::Bool(*b),
            (FieldType::Int32, Json::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int32)
                .unwrap_or(Value::Null),
            (FieldType::Int64 | FieldType::Timestamp, Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::Int64)
                .unwrap_or(Value::Null),
            (FieldType::Timestamp, Json::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::Int64(dt.timestamp_millis()))
                .unwrap_or(Value::Null),
            (FieldType::Double, Json::Number(n)) => {
                n.as_f64().map(Value::Double).unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int32(v) => serde_json::Value::from(*v),
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Sampling aggregation applied to a metric column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatType {
    #[default]
    Avg,
    Min,
    Max,
    Last,
    Sum,
    Count,
}

impl StatType {
    /// Parse a stat type, case-insensitively. Returns `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVG" => Some(StatType::Avg),
            "MIN" => Some(StatType::Min),
            "MAX" => Some(StatType::Max),
            "LAST" => Some(StatType::Last),
            "SUM" => Some(StatType::Sum),
            "COUNT" => Some(StatType::Count),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatType::Avg => "AVG",
            StatType::Min => "MIN",
            StatType::Max => "MAX",
            StatType::Last => "LAST",
            StatType::Sum => "SUM",
            StatType::Count => "COUNT",
        }
    }

    /// Reduce samples (in time order) to one value. Empty input gives `None`.
    pub fn reduce(&self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let value = match self {
            StatType::Avg => samples.iter().sum::<f64>() / samples.len() as f64,
            StatType::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            StatType::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            StatType::Last => *samples.last()?,
            StatType::Sum => samples.iter().sum(),
            StatType::Count => samples.len() as f64,
        };
        Some(value)
    }
}

impl fmt::Display for StatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed time interval in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Window of length `span` ending at `now`
    pub fn ending_at(now: DateTime<Utc>, span: Duration) -> Self {
        let end_ms = now.timestamp_millis();
        Self {
            start_ms: end_ms - span.num_milliseconds(),
            end_ms,
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms <= self.end_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_compare_across_widths() {
        assert_eq!(
            Value::Int32(5).compare(&Value::Double(5.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Int64(10).compare(&Value::Int32(10)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_string_compare_is_lexicographic() {
        // "10" < "9" as strings
        assert_eq!(
            Value::from("10").compare(&Value::from("9")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_mixed_kinds_incomparable() {
        assert_eq!(Value::from("5").compare(&Value::Int32(5)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_key_string_unifies_integral_numbers() {
        assert_eq!(Value::Int32(3).key_string(), Value::Double(3.0).key_string());
        assert_ne!(Value::from("3").key_string(), Value::Int32(3).key_string());
    }

    #[test]
    fn test_from_json_by_type() {
        assert_eq!(
            Value::from_json(&json!(42), FieldType::Int32),
            Value::Int32(42)
        );
        assert_eq!(
            Value::from_json(&json!(1.5), FieldType::Double),
            Value::Double(1.5)
        );
        assert_eq!(
            Value::from_json(&json!("2024-01-01T00:00:00Z"), FieldType::Timestamp),
            Value::Int64(1_704_067_200_000)
        );
        assert_eq!(
            Value::from_json(&json!("abc"), FieldType::Int32),
            Value::Null
        );
    }

    #[test]
    fn test_untagged_serialization() {
        assert_eq!(serde_json::to_value(Value::from("x")).unwrap(), json!("x"));
        assert_eq!(serde_json::to_value(Value::Null).unwrap(), json!(null));
        assert_eq!(serde_json::to_value(Value::Int64(7)).unwrap(), json!(7));
    }

    #[test]
    fn test_stat_type_parse() {
        assert_eq!(StatType::parse("avg"), Some(StatType::Avg));
        assert_eq!(StatType::parse("Max"), Some(StatType::Max));
        assert_eq!(StatType::parse("median"), None);
    }

    #[test]
    fn test_stat_type_reduce() {
        let samples = [1.0, 4.0, 2.0];
        assert_eq!(StatType::Avg.reduce(&samples), Some(7.0 / 3.0));
        assert_eq!(StatType::Min.reduce(&samples), Some(1.0));
        assert_eq!(StatType::Max.reduce(&samples), Some(4.0));
        assert_eq!(StatType::Last.reduce(&samples), Some(2.0));
        assert_eq!(StatType::Count.reduce(&samples), Some(3.0));
        assert_eq!(StatType::Sum.reduce(&[]), None);
    }

    #[test]
    fn test_time_window() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T01:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let window = TimeWindow::ending_at(now, Duration::hours(1));
        assert_eq!(window.start_ms, 1_704_067_200_000);
        assert!(window.contains(1_704_067_200_000));
        assert!(!window.contains(window.end_ms + 1));
    }
}
