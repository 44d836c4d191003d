//! Native query shape of the primary (structured-attribute) store

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{TimeWindow, Value};

// =============================================================================
// Comparison
// =============================================================================

/// Comparison operator of a single-field predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    /// Parse an OData operator keyword (`eq`, `ne`, ...), case-insensitively
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }

    /// Evaluate `lhs op rhs`.
    ///
    /// Null equals only null. Any other comparison involving null, or two
    /// values of incomparable kinds, is true only for `ne`.
    pub fn evaluate(&self, lhs: &Value, rhs: &Value) -> bool {
        match (lhs.is_null(), rhs.is_null()) {
            (true, true) => *self == CompareOp::Eq,
            (true, false) | (false, true) => *self == CompareOp::Ne,
            (false, false) => match lhs.compare(rhs) {
                Some(ordering) => self.accepts(ordering),
                None => *self == CompareOp::Ne,
            },
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Single-column predicate in backend column terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate against a column value (missing columns are null)
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        self.op.evaluate(actual.unwrap_or(&Value::Null), &self.value)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.symbol(), self.value)
    }
}

// =============================================================================
// Sorting
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    /// Apply the direction to an ascending ordering
    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

// =============================================================================
// Grouping
// =============================================================================

/// Aggregation operator of `$apply=...aggregate(field with op as alias)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl AggregateOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateOp::Count),
            "sum" => Some(AggregateOp::Sum),
            "average" => Some(AggregateOp::Average),
            "min" => Some(AggregateOp::Min),
            "max" => Some(AggregateOp::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Average => "average",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
        }
    }

    /// Whether the operator only makes sense on numeric columns
    pub fn requires_numeric(&self) -> bool {
        matches!(self, AggregateOp::Sum | AggregateOp::Average)
    }

    /// Aggregate over the non-null values of a column.
    ///
    /// `count` counts non-null values of any kind; the other operators use
    /// the numeric values only and give `None` when there are none.
    pub fn aggregate(&self, values: &[&Value]) -> Option<f64> {
        let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
        let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
        if *self != AggregateOp::Count && numbers.is_empty() {
            return None;
        }
        let value = match self {
            AggregateOp::Count => present.len() as f64,
            AggregateOp::Sum => numbers.iter().sum(),
            AggregateOp::Average => numbers.iter().sum::<f64>() / numbers.len() as f64,
            AggregateOp::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateOp::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        Some(value)
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed identity of one aggregate, decided at plan time and echoed back by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub column: String,
    pub op: AggregateOp,
}

impl AggregateKey {
    pub fn new(column: impl Into<String>, op: AggregateOp) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.column, self.op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub columns: Vec<String>,
    pub aggregates: Vec<AggregateKey>,
}

// =============================================================================
// Queries
// =============================================================================

/// Query against one primary-store table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryQuery {
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortKey>,
    /// Projected columns
    pub columns: Vec<String>,
    pub offset: u64,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
}

impl PrimaryQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: None,
            sort: None,
            columns: Vec::new(),
            offset: 0,
            limit: crate::params::DEFAULT_LIMIT,
            grouping: None,
        }
    }
}

/// Direct lookup of related rows by join key
///
/// Used for association expands and for the fallback path of metrics
/// expands, where only the latest sample per key is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedQuery {
    pub table: String,
    pub key_column: String,
    pub keys: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    /// Keep only the newest sample of each metric series
    #[serde(default)]
    pub latest_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_display() {
        let predicate = Predicate::new("item_type", CompareOp::Eq, "TYPE1");
        assert_eq!(predicate.to_string(), r#"item_type == "TYPE1""#);

        let predicate = Predicate::new("price", CompareOp::Ge, 9.5);
        assert_eq!(predicate.to_string(), "price >= 9.5");
    }

    #[test]
    fn test_compare_numeric_across_widths() {
        assert!(CompareOp::Gt.evaluate(&Value::Int32(5), &Value::Double(4.5)));
        assert!(CompareOp::Eq.evaluate(&Value::Int64(3), &Value::Int32(3)));
        assert!(CompareOp::Le.evaluate(&Value::Double(3.0), &Value::Int64(3)));
    }

    #[test]
    fn test_compare_strings_lexicographic() {
        assert!(CompareOp::Lt.evaluate(&"10".into(), &"9".into()));
        assert!(CompareOp::Ne.evaluate(&"a".into(), &"b".into()));
    }

    #[test]
    fn test_compare_null_semantics() {
        assert!(CompareOp::Eq.evaluate(&Value::Null, &Value::Null));
        assert!(!CompareOp::Ge.evaluate(&Value::Null, &Value::Null));
        assert!(!CompareOp::Eq.evaluate(&Value::Null, &Value::Int32(1)));
        assert!(CompareOp::Ne.evaluate(&Value::Null, &Value::Int32(1)));
        assert!(!CompareOp::Lt.evaluate(&Value::Null, &Value::Int32(1)));
    }

    #[test]
    fn test_mixed_kinds_only_ne() {
        assert!(!CompareOp::Eq.evaluate(&"1".into(), &Value::Int32(1)));
        assert!(CompareOp::Ne.evaluate(&"1".into(), &Value::Int32(1)));
    }

    #[test]
    fn test_predicate_missing_column_is_null() {
        let predicate = Predicate::new("breed", CompareOp::Eq, Value::Null);
        assert!(predicate.matches(None));
    }

    #[test]
    fn test_aggregate_ops() {
        let values = [
            Value::Double(2.0),
            Value::Null,
            Value::Int32(4),
            Value::Double(6.0),
        ];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(AggregateOp::Count.aggregate(&refs), Some(3.0));
        assert_eq!(AggregateOp::Sum.aggregate(&refs), Some(12.0));
        assert_eq!(AggregateOp::Average.aggregate(&refs), Some(4.0));
        assert_eq!(AggregateOp::Min.aggregate(&refs), Some(2.0));
        assert_eq!(AggregateOp::Max.aggregate(&refs), Some(6.0));
        assert_eq!(AggregateOp::Sum.aggregate(&[]), None);
    }

    #[test]
    fn test_sort_direction_apply() {
        assert_eq!(SortDirection::Desc.apply(Ordering::Less), Ordering::Greater);
        assert_eq!(SortDirection::parse("DESC"), Some(SortDirection::Desc));
        assert_eq!(SortDirection::parse("up"), None);
    }
}
