//! Metrics-document decoding
//!
//! The metrics gateway answers with a JSON document whose top-level key is
//! the outer selection name, mapping to an array of records. Metric blocks
//! hold parallel arrays, one entry per downsampled sample:
//!
//! ```json
//! { "cat": [ { "id": "c1", "name": "Tom",
//!              "cat_stats": { "cat_id": ["c1", "c1"],
//!                             "heart_rate": [120.0, 125.0],
//!                             "timestamp": [1704067200000, 1704067260000] } } ] }
//! ```
//!
//! A metrics-driven (flipped) query nests the other way around, with the
//! entity record as a one-element array inside each metrics record.

use std::collections::BTreeMap;

use catstats_core::{BackendError, BackendResult, Entity, EntityBinding, Value};
use catstats_query::JoinDirection;
use serde_json::{Map, Value as Json};

/// One parent row of a metrics document, still keyed by backend column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRow {
    pub entity: BTreeMap<String, Value>,
    /// Metric-block columns; `None` when the backend returned null
    pub series: BTreeMap<String, Option<Vec<Value>>>,
}

impl DecodedRow {
    /// Whether a metric column holds no data at all
    pub fn is_null_column(&self, column: &str) -> bool {
        match self.series.get(column) {
            None | Some(None) => true,
            Some(Some(values)) => !values.is_empty() && values.iter().all(Value::is_null),
        }
    }

    /// Parent record with logical field names
    pub fn to_entity(&self, binding: &EntityBinding) -> Entity {
        columns_to_entity(&self.entity, binding)
    }

    /// Metric-block records, one per sample index.
    ///
    /// Single-value columns are repeated across samples. Samples where every
    /// metric column is null are dropped.
    pub fn series_records(&self, target: &EntityBinding, metric_columns: &[String]) -> Vec<Entity> {
        let len = self
            .series
            .values()
            .flatten()
            .map(Vec::len)
            .max()
            .unwrap_or(0);

        let mut records = Vec::with_capacity(len);
        for index in 0..len {
            let at = |column: &str| -> Value {
                match self.series.get(column) {
                    Some(Some(values)) if values.len() == 1 => values[0].clone(),
                    Some(Some(values)) => values.get(index).cloned().unwrap_or(Value::Null),
                    _ => Value::Null,
                }
            };
            if metric_columns.iter().all(|c| at(c).is_null()) {
                continue;
            }
            let mut record = Entity::new(target.name.clone());
            for column in self.series.keys() {
                if let Some(field) = target.field_by_column(column) {
                    record.set(field.logical_name.clone(), at(column));
                }
            }
            records.push(record);
        }
        records
    }
}

/// Map backend columns to logical fields, dropping unknown columns
pub fn columns_to_entity(columns: &BTreeMap<String, Value>, binding: &EntityBinding) -> Entity {
    let mut entity = Entity::new(binding.name.clone());
    for (column, value) in columns {
        if let Some(field) = binding.field_by_column(column) {
            entity.set(field.logical_name.clone(), value.clone());
        }
    }
    entity
}

/// Whether a metrics answer means "relation not supported".
///
/// True only when rows came back and every requested metric column of every
/// row is null or missing. Zero rows is a legitimate empty result, and zero
/// or an empty series is data.
pub fn is_structurally_empty(rows: &[DecodedRow], metric_columns: &[String]) -> bool {
    !rows.is_empty()
        && rows
            .iter()
            .all(|row| metric_columns.iter().all(|c| row.is_null_column(c)))
}

fn malformed(reason: impl Into<String>) -> BackendError {
    BackendError::Malformed(reason.into())
}

fn records<'a>(doc: &'a Json, key: &str) -> BackendResult<&'a Vec<Json>> {
    match doc.get(key) {
        Some(Json::Array(items)) => Ok(items),
        Some(Json::Null) | None => Err(malformed(format!("missing '{}' in metrics response", key))),
        Some(_) => Err(malformed(format!("'{}' is not an array", key))),
    }
}

fn typed(binding: &EntityBinding, column: &str, json: &Json) -> Value {
    match binding.field_by_column(column) {
        Some(field) => Value::from_json(json, field.field_type),
        None => serde_json::from_value(json.clone()).unwrap_or(Value::Null),
    }
}

fn decode_entity(object: &Map<String, Json>, binding: &EntityBinding, skip: &str) -> BTreeMap<String, Value> {
    object
        .iter()
        .filter(|(column, _)| column.as_str() != skip)
        .map(|(column, json)| (column.clone(), typed(binding, column, json)))
        .collect()
}

fn decode_column(binding: &EntityBinding, column: &str, json: &Json) -> Option<Vec<Value>> {
    match json {
        Json::Null => None,
        Json::Array(items) => Some(items.iter().map(|v| typed(binding, column, v)).collect()),
        scalar => Some(vec![typed(binding, column, scalar)]),
    }
}

/// Decode a metrics block, either as parallel arrays or as one object per sample
fn decode_series(
    json: Option<&Json>,
    binding: &EntityBinding,
    skip: &str,
) -> BackendResult<BTreeMap<String, Option<Vec<Value>>>> {
    let mut series = BTreeMap::new();
    match json {
        None | Some(Json::Null) => {}
        Some(Json::Object(object)) => {
            for (column, value) in object.iter().filter(|(c, _)| c.as_str() != skip) {
                series.insert(column.clone(), decode_column(binding, column, value));
            }
        }
        Some(Json::Array(samples)) => {
            for sample in samples {
                let Json::Object(object) = sample else {
                    return Err(malformed(format!("{} sample is not an object", binding.table)));
                };
                for (column, value) in object.iter().filter(|(c, _)| c.as_str() != skip) {
                    series
                        .entry(column.clone())
                        .or_insert_with(|| Some(Vec::new()))
                        .get_or_insert_with(Vec::new)
                        .push(typed(binding, column, value));
                }
            }
        }
        Some(_) => return Err(malformed(format!("{} block is not an object", binding.table))),
    }
    Ok(series)
}

/// Decode a metrics document into parent rows
pub fn decode_metrics(
    doc: &Json,
    direction: JoinDirection,
    entity: &EntityBinding,
    target: &EntityBinding,
) -> BackendResult<Vec<DecodedRow>> {
    match direction {
        JoinDirection::EntityDriven => records(doc, &entity.table)?
            .iter()
            .map(|record| {
                let Json::Object(object) = record else {
                    return Err(malformed(format!("{} record is not an object", entity.table)));
                };
                Ok(DecodedRow {
                    entity: decode_entity(object, entity, &target.table),
                    series: decode_series(object.get(&target.table), target, &entity.table)?,
                })
            })
            .collect(),
        JoinDirection::MetricsDriven => {
            let mut rows = Vec::new();
            for record in records(doc, &target.table)? {
                let Json::Object(object) = record else {
                    return Err(malformed(format!("{} record is not an object", target.table)));
                };
                let parent = match object.get(&entity.table) {
                    Some(Json::Array(items)) => items.first(),
                    Some(Json::Null) | None => None,
                    Some(other) => Some(other),
                };
                // Metrics rows whose entity did not pass the filter
                let Some(parent) = parent else {
                    continue;
                };
                let Json::Object(parent) = parent else {
                    return Err(malformed(format!("{} record is not an object", entity.table)));
                };
                let series = object
                    .iter()
                    .filter(|(column, _)| column.as_str() != entity.table)
                    .map(|(column, value)| (column.clone(), decode_column(target, column, value)))
                    .collect();
                rows.push(DecodedRow {
                    entity: decode_entity(parent, entity, &target.table),
                    series,
                });
            }
            Ok(rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::{CAT, CAT_STATS};
    use catstats_core::SchemaRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn bindings() -> (EntityBinding, EntityBinding) {
        let registry = SchemaRegistry::builtin();
        (
            registry.entity(CAT).cloned().unwrap(),
            registry.entity(CAT_STATS).cloned().unwrap(),
        )
    }

    fn metrics() -> Vec<String> {
        vec!["heart_rate".to_string()]
    }

    #[test]
    fn test_decode_entity_driven() {
        let (cat, stats) = bindings();
        let doc = json!({
            "cat": [
                {"id": "c1", "name": "Tom", "age": 3, "cat_stats": {
                    "cat_id": ["c1", "c1"],
                    "heart_rate": [120.0, null],
                    "timestamp": [1000, 2000]
                }},
                {"id": "c2", "name": "Kit", "cat_stats": null}
            ]
        });

        let rows = decode_metrics(&doc, JoinDirection::EntityDriven, &cat, &stats).unwrap();
        assert_eq!(rows.len(), 2);

        let tom = rows[0].to_entity(&cat);
        assert_eq!(tom.value("name"), &Value::from("Tom"));
        assert_eq!(tom.value("age"), &Value::Int32(3));

        let samples = rows[0].series_records(&stats, &metrics());
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value("catId"), &Value::from("c1"));
        assert_eq!(samples[0].value("heartRate"), &Value::Double(120.0));
        assert_eq!(samples[0].value("timestamp"), &Value::Int64(1000));

        assert!(rows[1].is_null_column("heart_rate"));
        assert!(rows[1].series_records(&stats, &metrics()).is_empty());
    }

    #[test]
    fn test_decode_metrics_driven() {
        let (cat, stats) = bindings();
        let doc = json!({
            "cat_stats": [
                {"cat_id": "c2", "heart_rate": [140.0], "timestamp": [1000],
                 "cat": [{"id": "c2", "name": "Kit"}]},
                {"cat_id": "c9", "heart_rate": [99.0], "timestamp": [1000], "cat": []},
                {"cat_id": "c1", "heart_rate": [120.0], "timestamp": [1000],
                 "cat": [{"id": "c1", "name": "Tom"}]}
            ]
        });

        let rows = decode_metrics(&doc, JoinDirection::MetricsDriven, &cat, &stats).unwrap();
        let names: Vec<Value> = rows
            .iter()
            .map(|r| r.to_entity(&cat).value("name").clone())
            .collect();
        assert_eq!(names, vec![Value::from("Kit"), Value::from("Tom")]);

        let samples = rows[0].series_records(&stats, &metrics());
        assert_eq!(samples[0].value("catId"), &Value::from("c2"));
        assert_eq!(samples[0].value("heartRate"), &Value::Double(140.0));
    }

    #[test]
    fn test_sample_objects_accepted() {
        let (cat, stats) = bindings();
        let doc = json!({
            "cat": [{"id": "c1", "cat_stats": [
                {"cat_id": "c1", "heart_rate": 110.0, "timestamp": 1000},
                {"cat_id": "c1", "heart_rate": 111.0, "timestamp": 2000}
            ]}]
        });
        let rows = decode_metrics(&doc, JoinDirection::EntityDriven, &cat, &stats).unwrap();
        let samples = rows[0].series_records(&stats, &metrics());
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value("heartRate"), &Value::Double(111.0));
    }

    #[test]
    fn test_malformed_documents() {
        let (cat, stats) = bindings();
        for doc in [
            json!({}),
            json!({"cat": {"id": "c1"}}),
            json!({"cat": [42]}),
            json!({"cat": [{"id": "c1", "cat_stats": "oops"}]}),
        ] {
            let err = decode_metrics(&doc, JoinDirection::EntityDriven, &cat, &stats).unwrap_err();
            assert!(matches!(err, BackendError::Malformed(_)), "{}", doc);
        }
    }

    fn row(values: Option<Vec<Value>>) -> DecodedRow {
        let mut row = DecodedRow::default();
        row.series.insert("heart_rate".to_string(), values);
        row
    }

    #[test]
    fn test_structurally_empty() {
        let columns = metrics();

        // Zero rows is a legitimate empty result
        assert!(!is_structurally_empty(&[], &columns));

        assert!(is_structurally_empty(&[row(None), DecodedRow::default()], &columns));
        assert!(is_structurally_empty(
            &[row(Some(vec![Value::Null, Value::Null]))],
            &columns
        ));

        // Zero and empty series are data
        assert!(!is_structurally_empty(&[row(Some(vec![Value::Double(0.0)]))], &columns));
        assert!(!is_structurally_empty(&[row(Some(vec![]))], &columns));
        assert!(!is_structurally_empty(
            &[row(None), row(Some(vec![Value::Double(98.5)]))],
            &columns
        ));
    }
}
