//! In-memory backends seeded from a JSON fixture
//!
//! Both backends share one [`MemoryDataset`]: plain tables for the primary
//! store and sample tables for the metrics gateway. The primary store also
//! answers lookups on sample tables, returning the latest sample per key,
//! which is what the fallback path needs.
//!
//! Fixture format:
//!
//! ```json
//! {
//!   "tables": { "cat": [ { "id": "c1", "name": "Tom", "age": 3 } ] },
//!   "series": { "cat_stats": [ { "cat_id": "c1", "heart_rate": 120.0, "timestamp": 1704067200000 } ] }
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use catstats_core::{
    AggregateMetric, BackendError, BackendResult, GraphQuery, Grouping, MetricsGateway,
    Predicate, PrimaryQuery, PrimaryResult, PrimaryStore, RelatedQuery, Sample, SchemaRegistry,
    Selection, SortDirection, StatType, StoreGroup, StoreRow, TimeWindow, Value,
};
use catstats_core::{ArgValue, CompareOp};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::context::{LazyClient, QueryContext};

type Row = BTreeMap<String, Value>;

// =============================================================================
// Dataset
// =============================================================================

/// Errors loading a fixture
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw fixture file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<Map<String, Json>>>,
    #[serde(default)]
    pub series: BTreeMap<String, Vec<Map<String, Json>>>,
}

impl Fixture {
    pub fn from_json(content: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Default)]
struct Tables {
    tables: HashMap<String, Vec<Row>>,
    series: HashMap<String, Vec<Row>>,
}

/// Typed rows shared by the in-memory backends
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    registry: Arc<SchemaRegistry>,
    inner: Arc<RwLock<Tables>>,
}

impl MemoryDataset {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            inner: Arc::new(RwLock::new(Tables::default())),
        }
    }

    pub fn from_fixture(registry: Arc<SchemaRegistry>, fixture: &Fixture) -> Self {
        let dataset = Self::new(registry);
        for (table, rows) in &fixture.tables {
            for row in rows {
                dataset.insert_row(table, dataset.typed_row(table, row));
            }
        }
        for (table, rows) in &fixture.series {
            for row in rows {
                dataset.insert_sample(table, dataset.typed_row(table, row));
            }
        }
        info!(
            tables = fixture.tables.len(),
            series = fixture.series.len(),
            "Loaded in-memory dataset"
        );
        dataset
    }

    /// Add a row to a plain table
    pub fn insert_row(&self, table: &str, row: BTreeMap<String, Value>) {
        self.inner
            .write()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Add one metrics sample
    pub fn insert_sample(&self, table: &str, row: BTreeMap<String, Value>) {
        self.inner
            .write()
            .series
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.read();
        inner
            .tables
            .get(table)
            .or_else(|| inner.series.get(table))
            .map_or(0, Vec::len)
    }

    /// Convert JSON columns using the declared field types
    fn typed_row(&self, table: &str, row: &Map<String, Json>) -> Row {
        let binding = self.registry.entity_by_table(table);
        row.iter()
            .map(|(column, json)| {
                let value = match binding.and_then(|b| b.field_by_column(column)) {
                    Some(field) => Value::from_json(json, field.field_type),
                    None => serde_json::from_value(json.clone()).unwrap_or(Value::Null),
                };
                (column.clone(), value)
            })
            .collect()
    }

    fn timestamp_column(&self, table: &str) -> String {
        self.registry
            .entity_by_table(table)
            .and_then(|b| b.timestamp_column())
            .unwrap_or("timestamp")
            .to_string()
    }

    fn metric_columns(&self, table: &str) -> Vec<String> {
        self.registry
            .entity_by_table(table)
            .map(|b| b.metric_fields().map(|f| f.backend_column.clone()).collect())
            .unwrap_or_default()
    }
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    row.get(column).unwrap_or(&NULL)
}

fn timestamp_of(row: &Row, column: &str) -> Option<i64> {
    cell(row, column).as_f64().map(|v| v as i64)
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

fn page<T>(items: Vec<T>, offset: u64, limit: u32) -> Vec<T> {
    items
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(limit as usize)
        .collect()
}

fn unknown_table(table: &str) -> BackendError {
    BackendError::InvalidQuery(format!("unknown table '{}'", table))
}

// =============================================================================
// Primary store
// =============================================================================

/// Primary store over the in-memory dataset
pub struct InMemoryPrimaryStore {
    name: String,
    data: MemoryDataset,
    available: AtomicBool,
}

impl InMemoryPrimaryStore {
    pub fn new(name: &str, data: MemoryDataset) -> Self {
        Self {
            name: name.to_string(),
            data,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!("{} is offline", self.name)))
        }
    }

    fn run_query(&self, query: &PrimaryQuery) -> BackendResult<PrimaryResult> {
        let inner = self.data.inner.read();
        let rows = inner
            .tables
            .get(&query.table)
            .ok_or_else(|| unknown_table(&query.table))?;

        let mut matched: Vec<&Row> = rows
            .iter()
            .filter(|row| {
                query
                    .predicate
                    .as_ref()
                    .map_or(true, |p| p.matches(row.get(&p.column)))
            })
            .collect();

        if let Some(grouping) = &query.grouping {
            return Ok(group_rows(&matched, grouping, query));
        }

        if let Some(sort) = &query.sort {
            matched.sort_by(|a, b| {
                sort.direction
                    .apply(cell(a, &sort.column).sort_cmp(cell(b, &sort.column)))
            });
        }

        let total = matched.len() as u64;
        let rows = page(matched, query.offset, query.limit)
            .into_iter()
            .map(|row| StoreRow {
                attributes: project(row, &query.columns),
                metrics: BTreeMap::new(),
            })
            .collect();
        Ok(PrimaryResult {
            rows,
            groups: Vec::new(),
            total: Some(total),
        })
    }

    fn run_related(&self, query: &RelatedQuery) -> BackendResult<Vec<StoreRow>> {
        let inner = self.data.inner.read();
        let mut seen = HashSet::new();
        let keys: Vec<&Value> = query
            .keys
            .iter()
            .filter(|k| !k.is_null() && seen.insert(k.key_string()))
            .collect();

        if let Some(samples) = inner.series.get(&query.table) {
            let ts_column = self.data.timestamp_column(&query.table);
            let metric_columns = self.data.metric_columns(&query.table);
            let mut out = Vec::new();
            for key in keys {
                let mut matching: Vec<(i64, &Row)> = samples
                    .iter()
                    .filter(|row| cell(row, &query.key_column).key_string() == key.key_string())
                    .filter_map(|row| timestamp_of(row, &ts_column).map(|ts| (ts, row)))
                    .filter(|(ts, _)| query.window.map_or(true, |w| w.contains(*ts)))
                    .collect();
                if matching.is_empty() {
                    continue;
                }
                matching.sort_by_key(|(ts, _)| *ts);

                let mut row = StoreRow::new().with(&query.key_column, key.clone());
                for column in &metric_columns {
                    let mut series: Vec<Sample> = matching
                        .iter()
                        .filter_map(|(ts, r)| cell(r, column).as_f64().map(|v| Sample::new(*ts, v)))
                        .collect();
                    if query.latest_only {
                        series = series.last().copied().into_iter().collect();
                    }
                    row = row.with_series(column, series);
                }
                out.push(row);
            }
            return Ok(out);
        }

        let rows = inner
            .tables
            .get(&query.table)
            .ok_or_else(|| unknown_table(&query.table))?;
        let wanted: HashSet<String> = keys.iter().map(|k| k.key_string()).collect();
        Ok(rows
            .iter()
            .filter(|row| wanted.contains(&cell(row, &query.key_column).key_string()))
            .map(|row| StoreRow {
                attributes: row.clone(),
                metrics: BTreeMap::new(),
            })
            .collect())
    }
}

fn group_rows(matched: &[&Row], grouping: &Grouping, query: &PrimaryQuery) -> PrimaryResult {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<&Row>)> = Vec::new();
    for row in matched {
        let key: Vec<Value> = grouping
            .columns
            .iter()
            .map(|c| cell(row, c).clone())
            .collect();
        let hash = key.iter().map(Value::key_string).collect::<Vec<_>>().join("|");
        match index.get(&hash) {
            Some(&i) => groups[i].1.push(*row),
            None => {
                index.insert(hash, groups.len());
                groups.push((key, vec![*row]));
            }
        }
    }

    groups.sort_by(|(a, _), (b, _)| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.sort_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total = groups.len() as u64;
    let groups = page(groups, query.offset, query.limit)
        .into_iter()
        .map(|(_, rows)| {
            let mut aggregates = vec![AggregateMetric {
                name: "count".to_string(),
                key: None,
                value: rows.len() as f64,
            }];
            for key in &grouping.aggregates {
                let values: Vec<&Value> = rows.iter().map(|r| cell(r, &key.column)).collect();
                if let Some(value) = key.op.aggregate(&values) {
                    aggregates.push(AggregateMetric {
                        name: key.to_string(),
                        key: Some(key.clone()),
                        value,
                    });
                }
            }
            StoreGroup {
                rows: rows
                    .into_iter()
                    .map(|row| StoreRow {
                        attributes: project(row, &query.columns),
                        metrics: BTreeMap::new(),
                    })
                    .collect(),
                aggregates,
            }
        })
        .collect();

    PrimaryResult {
        rows: Vec::new(),
        groups,
        total: Some(total),
    }
}

#[async_trait]
impl PrimaryStore for InMemoryPrimaryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: &PrimaryQuery) -> BackendResult<PrimaryResult> {
        self.check_available()?;
        debug!(store = %self.name, table = %query.table, "Primary query");
        self.run_query(query)
    }

    async fn fetch_related(&self, query: &RelatedQuery) -> BackendResult<Vec<StoreRow>> {
        self.check_available()?;
        debug!(store = %self.name, table = %query.table, keys = query.keys.len(), "Related lookup");
        self.run_related(query)
    }
}

// =============================================================================
// Metrics gateway
// =============================================================================

/// Metrics gateway evaluating graph queries over the in-memory dataset
///
/// Selections naming a table without samples answer with null metric
/// blocks, the way a gateway without that relation registered does.
pub struct InMemoryMetricsGateway {
    name: String,
    data: MemoryDataset,
    available: AtomicBool,
}

fn invalid(reason: impl Into<String>) -> BackendError {
    BackendError::InvalidQuery(reason.into())
}

fn window_of(selection: &Selection) -> BackendResult<TimeWindow> {
    let bound = |name: &str| {
        selection
            .arg(name)
            .and_then(ArgValue::as_i64)
            .ok_or_else(|| invalid(format!("{} requires {}", selection.name, name)))
    };
    Ok(TimeWindow::new(bound("interval_start_ms")?, bound("interval_end_ms")?))
}

fn interval_ms(selection: &Selection) -> i64 {
    selection
        .arg("downsampling_interval_secs")
        .and_then(ArgValue::as_i64)
        .unwrap_or(60)
        .max(1)
        * 1000
}

fn join_columns(selection: &Selection) -> BackendResult<(String, String)> {
    let column = |name: &str| {
        selection
            .arg(name)
            .and_then(ArgValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| invalid(format!("{} requires {}", selection.name, name)))
    };
    Ok((column("left_column")?, column("right_column")?))
}

fn page_args(selection: &Selection) -> (u64, u32) {
    let offset = selection
        .arg("offset")
        .and_then(ArgValue::as_i64)
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(0);
    let limit = selection
        .arg("limit")
        .and_then(ArgValue::as_i64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(u32::MAX);
    (offset, limit)
}

fn filter_of(selection: &Selection) -> BackendResult<Option<Predicate>> {
    let Some(arg) = selection.arg("filter") else {
        return Ok(None);
    };
    let malformed = || invalid(format!("malformed filter on {}", selection.name));
    let [(column, condition)] = arg.as_object().ok_or_else(malformed)? else {
        return Err(malformed());
    };
    let [(keyword, literal)] = condition.as_object().ok_or_else(malformed)? else {
        return Err(malformed());
    };
    let op = CompareOp::parse(keyword).ok_or_else(malformed)?;
    Ok(Some(Predicate::new(column.clone(), op, literal.to_value())))
}

fn order_of(selection: &Selection) -> BackendResult<Option<(String, SortDirection)>> {
    let Some(arg) = selection.arg("order_by") else {
        return Ok(None);
    };
    let malformed = || invalid(format!("malformed order_by on {}", selection.name));
    let [(column, direction)] = arg.as_object().ok_or_else(malformed)? else {
        return Err(malformed());
    };
    let direction = direction
        .as_str()
        .and_then(SortDirection::parse)
        .ok_or_else(malformed)?;
    Ok(Some((column.clone(), direction)))
}

fn json_array(values: Vec<Json>) -> Json {
    Json::Array(values)
}

/// Downsampled metrics block for one key, as parallel arrays
fn downsample(
    selection: &Selection,
    key: (&str, &Value),
    samples: &[(i64, &Row)],
    ts_column: &str,
    window: TimeWindow,
    interval_ms: i64,
) -> Map<String, Json> {
    let mut buckets: BTreeMap<i64, Vec<&Row>> = BTreeMap::new();
    for (ts, row) in samples {
        buckets
            .entry((ts - window.start_ms) / interval_ms)
            .or_default()
            .push(*row);
    }

    let mut block = Map::new();
    let (key_column, key_value) = key;
    for column in selection.columns() {
        let values = buckets
            .keys()
            .map(|bucket| {
                if column == ts_column {
                    Json::from(window.start_ms + bucket * interval_ms)
                } else if column == key_column {
                    key_value.to_json()
                } else {
                    Json::Null
                }
            })
            .collect();
        block.insert(column.to_string(), json_array(values));
    }
    for (column, sampling) in selection.metrics() {
        let values = buckets
            .values()
            .map(|rows| {
                let numbers: Vec<f64> = rows.iter().filter_map(|r| cell(r, column).as_f64()).collect();
                sampling
                    .reduce(&numbers)
                    .map(Json::from)
                    .unwrap_or(Json::Null)
            })
            .collect();
        block.insert(column.to_string(), json_array(values));
    }
    block
}

/// One value per key for a metrics-driven sort
fn reduce_column(samples: &[(i64, &Row)], column: &str, sampling: StatType) -> Value {
    let numbers: Vec<f64> = samples
        .iter()
        .filter_map(|(_, r)| cell(r, column).as_f64())
        .collect();
    sampling
        .reduce(&numbers)
        .map(Value::Double)
        .unwrap_or(Value::Null)
}

fn null_block(selection: &Selection) -> Map<String, Json> {
    selection
        .columns()
        .chain(selection.metrics().map(|(name, _)| name))
        .map(|column| (column.to_string(), Json::Null))
        .collect()
}

fn entity_json(row: &Row, selection: &Selection) -> Map<String, Json> {
    selection
        .columns()
        .map(|column| (column.to_string(), cell(row, column).to_json()))
        .collect()
}

impl InMemoryMetricsGateway {
    pub fn new(name: &str, data: MemoryDataset) -> Self {
        Self {
            name: name.to_string(),
            data,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn run(&self, query: &GraphQuery) -> BackendResult<Json> {
        let root = &query.root;
        let nested = root
            .nested()
            .ok_or_else(|| invalid(format!("{} has no nested selection", root.name)))?;
        let records = if root.has_arg("interval_start_ms") {
            self.metrics_driven(root, nested)?
        } else {
            self.entity_driven(root, nested)?
        };
        let mut doc = Map::new();
        doc.insert(root.name.clone(), json_array(records));
        Ok(Json::Object(doc))
    }

    fn entity_driven(&self, root: &Selection, nested: &Selection) -> BackendResult<Vec<Json>> {
        let inner = self.data.inner.read();
        let rows = inner
            .tables
            .get(&root.name)
            .ok_or_else(|| unknown_table(&root.name))?;
        let (left, right) = join_columns(nested)?;
        let window = window_of(nested)?;
        let interval = interval_ms(nested);
        let ts_column = self.data.timestamp_column(&nested.name);
        let samples = inner.series.get(&nested.name);

        let predicate = filter_of(root)?;
        let mut matched: Vec<&Row> = rows
            .iter()
            .filter(|row| predicate.as_ref().map_or(true, |p| p.matches(row.get(&p.column))))
            .collect();
        if let Some((column, direction)) = order_of(root)? {
            matched.sort_by(|a, b| direction.apply(cell(a, &column).sort_cmp(cell(b, &column))));
        }
        let (offset, limit) = page_args(root);

        Ok(page(matched, offset, limit)
            .into_iter()
            .map(|row| {
                let mut record = entity_json(row, root);
                let block = match samples {
                    None => null_block(nested),
                    Some(samples) => {
                        let key = cell(row, &left);
                        let matching: Vec<(i64, &Row)> = samples
                            .iter()
                            .filter(|s| !key.is_null() && cell(s, &right).key_string() == key.key_string())
                            .filter_map(|s| timestamp_of(s, &ts_column).map(|ts| (ts, s)))
                            .filter(|(ts, _)| window.contains(*ts))
                            .collect();
                        downsample(nested, (right.as_str(), key), &matching, &ts_column, window, interval)
                    }
                };
                record.insert(nested.name.clone(), Json::Object(block));
                Json::Object(record)
            })
            .collect())
    }

    fn metrics_driven(&self, root: &Selection, nested: &Selection) -> BackendResult<Vec<Json>> {
        let inner = self.data.inner.read();
        let samples = inner.series.get(&root.name).ok_or_else(|| {
            BackendError::SchemaUnsupported(format!("no metrics registered for '{}'", root.name))
        })?;
        let entities = inner
            .tables
            .get(&nested.name)
            .ok_or_else(|| unknown_table(&nested.name))?;
        let (left, right) = join_columns(nested)?;
        let window = window_of(root)?;
        let interval = interval_ms(root);
        let ts_column = self.data.timestamp_column(&root.name);
        let predicate = filter_of(nested)?;

        // Samples in range, grouped by key in first-seen order
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut by_key: Vec<(Value, Vec<(i64, &Row)>)> = Vec::new();
        for sample in samples {
            let Some(ts) = timestamp_of(sample, &ts_column).filter(|ts| window.contains(*ts)) else {
                continue;
            };
            let key = cell(sample, &left);
            if key.is_null() {
                continue;
            }
            match index.get(&key.key_string()) {
                Some(&i) => by_key[i].1.push((ts, sample)),
                None => {
                    index.insert(key.key_string(), by_key.len());
                    by_key.push((key.clone(), vec![(ts, sample)]));
                }
            }
        }

        // First entity per join key
        let mut by_right: HashMap<String, &Row> = HashMap::with_capacity(entities.len());
        for entity in entities {
            by_right.entry(cell(entity, &right).key_string()).or_insert(entity);
        }

        let mut joined: Vec<(Value, &Row, Vec<(i64, &Row)>)> = by_key
            .into_iter()
            .filter_map(|(key, rows)| {
                by_right
                    .get(&key.key_string())
                    .copied()
                    .filter(|e| predicate.as_ref().map_or(true, |p| p.matches(e.get(&p.column))))
                    .map(|entity| (key, entity, rows))
            })
            .collect();

        if let Some((column, direction)) = order_of(root)? {
            let sampling = root
                .metrics()
                .find(|(name, _)| *name == column)
                .map(|(_, stat)| stat)
                .unwrap_or(StatType::Avg);
            joined.sort_by(|a, b| {
                let x = reduce_column(&a.2, &column, sampling);
                let y = reduce_column(&b.2, &column, sampling);
                direction
                    .apply(x.sort_cmp(&y))
                    .then_with(|| a.0.key_string().cmp(&b.0.key_string()))
            });
        }
        let (offset, limit) = page_args(root);

        Ok(page(joined, offset, limit)
            .into_iter()
            .map(|(key, entity, rows)| {
                let mut record = downsample(root, (left.as_str(), &key), &rows, &ts_column, window, interval);
                record.insert(
                    nested.name.clone(),
                    json_array(vec![Json::Object(entity_json(entity, nested))]),
                );
                Json::Object(record)
            })
            .collect())
    }
}

#[async_trait]
impl MetricsGateway for InMemoryMetricsGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, query: &GraphQuery) -> BackendResult<Json> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!("{} is offline", self.name)));
        }
        debug!(gateway = %self.name, root = %query.root.name, "Metrics query");
        self.run(query)
    }
}

// =============================================================================
// Context
// =============================================================================

/// Query context over in-memory backends.
///
/// The metrics gateway is left out when `backends.metrics_enabled` is false,
/// which sends every metrics expand down the fallback path.
pub fn in_memory_context(data: &MemoryDataset, config: GatewayConfig) -> QueryContext {
    let primary_data = data.clone();
    let primary: LazyClient<dyn PrimaryStore> = LazyClient::new("memory-primary", move || {
        let data = primary_data.clone();
        async move {
            let store: Arc<dyn PrimaryStore> = Arc::new(InMemoryPrimaryStore::new("memory-primary", data));
            Ok(store)
        }
    });

    let metrics_enabled = config.backends.metrics_enabled;
    let mut context = QueryContext::new(data.registry.clone(), primary, config);
    if metrics_enabled {
        let metrics_data = data.clone();
        context = context.with_metrics(LazyClient::new("memory-metrics", move || {
            let data = metrics_data.clone();
            async move {
                let gateway: Arc<dyn MetricsGateway> =
                    Arc::new(InMemoryMetricsGateway::new("memory-metrics", data));
                Ok(gateway)
            }
        }));
    }
    context
}
