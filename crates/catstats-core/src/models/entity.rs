//! Canonical, backend-agnostic result records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One result record, keyed by logical field names.
///
/// Serializes as a flat JSON object: scalar fields followed by expanded
/// navigations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entity {
    #[serde(skip)]
    pub entity_type: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub expanded: BTreeMap<String, Expansion>,
}

/// Data attached for one expanded navigation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Expansion {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Expansion {
    /// Attached records, regardless of cardinality
    pub fn records(&self) -> Vec<&Entity> {
        match self {
            Expansion::One(one) => one.iter().map(|e| e.as_ref()).collect(),
            Expansion::Many(many) => many.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Expansion::One(one) => usize::from(one.is_some()),
            Expansion::Many(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field value, treating a missing field as null
    pub fn value(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn attach(&mut self, navigation: impl Into<String>, expansion: Expansion) {
        self.expanded.insert(navigation.into(), expansion);
    }

    pub fn expansion(&self, navigation: &str) -> Option<&Expansion> {
        self.expanded.get(navigation)
    }

    /// Keep only the listed scalar fields. An empty list keeps everything.
    pub fn project(&mut self, fields: &[String]) {
        if fields.is_empty() {
            return;
        }
        self.fields.retain(|name, _| fields.iter().any(|f| f == name));
    }
}

/// One aggregate of a `$apply` group, labelled with its requested alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub label: String,
    pub value: f64,
}

/// Output of `$apply=groupby(...)/aggregate(...)`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupResult {
    /// Group key, one value per group-by field
    pub keys: BTreeMap<String, Value>,
    pub rows: Vec<Entity>,
    pub aggregates: Vec<AggregateResult>,
}

impl GroupResult {
    pub fn aggregate(&self, label: &str) -> Option<f64> {
        self.aggregates
            .iter()
            .find(|a| a.label == label)
            .map(|a| a.value)
    }
}
