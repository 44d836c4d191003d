//! Metrics graph-query AST and its text rendering
//!
//! The metrics gateway accepts a nested-selection query language. Queries
//! are assembled as a tree of [`Selection`]s and rendered to text only at
//! the backend boundary, so builders and tests work on structure rather
//! than strings.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::value::{StatType, Value};

/// Argument value of a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Bare identifier such as `equal` or `asc`
    Enum(String),
    Object(Vec<(String, ArgValue)>),
}

impl ArgValue {
    pub fn object(entries: Vec<(&str, ArgValue)>) -> Self {
        ArgValue::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn enumeration(name: &str) -> Self {
        ArgValue::Enum(name.to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String content of `Str` and `Enum` values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) | ArgValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, ArgValue)]> {
        match self {
            ArgValue::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Entry of an object value
    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Convert a literal argument back to a typed value. Objects become null.
    pub fn to_value(&self) -> Value {
        match self {
            ArgValue::Null | ArgValue::Object(_) => Value::Null,
            ArgValue::Bool(b) => Value::Bool(*b),
            ArgValue::Int(v) => Value::Int64(*v),
            ArgValue::Float(v) => Value::Double(*v),
            ArgValue::Str(s) | ArgValue::Enum(s) => Value::String(s.clone()),
        }
    }

    fn render(&self, out: &mut String) -> fmt::Result {
        match self {
            ArgValue::Null => out.write_str("null"),
            ArgValue::Bool(b) => write!(out, "{}", b),
            ArgValue::Int(v) => write!(out, "{}", v),
            ArgValue::Float(v) => write!(out, "{:?}", v),
            ArgValue::Str(s) => write!(out, "{:?}", s),
            ArgValue::Enum(s) => out.write_str(s),
            ArgValue::Object(entries) => {
                out.write_char('{')?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{}: ", key)?;
                    value.render(out)?;
                }
                out.write_char('}')
            }
        }
    }
}

impl From<&Value> for ArgValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ArgValue::Null,
            Value::Bool(b) => ArgValue::Bool(*b),
            Value::Int32(v) => ArgValue::Int(i64::from(*v)),
            Value::Int64(v) => ArgValue::Int(*v),
            Value::Double(v) => ArgValue::Float(*v),
            Value::String(s) => ArgValue::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: ArgValue,
}

/// One selected field of a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    /// Plain scalar column
    Column(String),
    /// Time-series metric column sampled with an aggregation
    Metric {
        name: String,
        sampling: StatType,
        timeseries: bool,
    },
    /// Joined child selection
    Nested(Selection),
}

impl Field {
    pub fn column(name: &str) -> Self {
        Field::Column(name.to_string())
    }

    pub fn metric(name: &str, sampling: StatType) -> Self {
        Field::Metric {
            name: name.to_string(),
            sampling,
            timeseries: true,
        }
    }

    /// Column name for scalar and metric fields
    pub fn name(&self) -> &str {
        match self {
            Field::Column(name) | Field::Metric { name, .. } => name,
            Field::Nested(selection) => &selection.name,
        }
    }
}

/// A table selection with arguments and child fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub name: String,
    pub args: Vec<Argument>,
    pub fields: Vec<Field>,
}

impl Selection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn push_arg(&mut self, name: &str, value: ArgValue) {
        self.args.push(Argument {
            name: name.to_string(),
            value,
        });
    }

    /// Replace an argument in place, or append it
    pub fn set_arg(&mut self, name: &str, value: ArgValue) {
        match self.args.iter_mut().find(|a| a.name == name) {
            Some(arg) => arg.value = value,
            None => self.push_arg(name, value),
        }
    }

    pub fn with_arg(mut self, name: &str, value: ArgValue) -> Self {
        self.push_arg(name, value);
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.arg(name).is_some()
    }

    /// First nested child selection
    pub fn nested(&self) -> Option<&Selection> {
        self.fields.iter().find_map(|f| match f {
            Field::Nested(selection) => Some(selection),
            _ => None,
        })
    }

    /// Names of plain scalar columns
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| match f {
            Field::Column(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Metric columns with their sampling
    pub fn metrics(&self) -> impl Iterator<Item = (&str, StatType)> {
        self.fields.iter().filter_map(|f| match f {
            Field::Metric { name, sampling, .. } => Some((name.as_str(), *sampling)),
            _ => None,
        })
    }

    fn render(&self, out: &mut String, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        write!(out, "{}{}", indent, self.name)?;
        if !self.args.is_empty() {
            out.write_char('(')?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write!(out, "{}: ", arg.name)?;
                arg.value.render(out)?;
            }
            out.write_char(')')?;
        }
        out.write_str(" {\n")?;
        let child_indent = "  ".repeat(depth + 1);
        for field in &self.fields {
            match field {
                Field::Column(name) => writeln!(out, "{}{}", child_indent, name)?,
                Field::Metric {
                    name,
                    sampling,
                    timeseries,
                } => writeln!(
                    out,
                    "{}{}(sampling: {}, timeseries: {})",
                    child_indent, name, sampling, timeseries
                )?,
                Field::Nested(selection) => selection.render(out, depth + 1)?,
            }
        }
        writeln!(out, "{}}}", indent)
    }
}

/// A complete metrics query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQuery {
    pub root: Selection,
}

impl GraphQuery {
    pub fn new(root: Selection) -> Self {
        Self { root }
    }

    /// Render the query text sent to the metrics gateway
    pub fn render(&self) -> String {
        let mut out = String::from("{\n");
        // Writing into a String cannot fail
        let _ = self.root.render(&mut out, 1);
        out.push('}');
        out
    }
}

impl fmt::Display for GraphQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
