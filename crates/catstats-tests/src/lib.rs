//! End-to-end tests for the catstats query gateway
//!
//! The suites under `tests/` drive [`StatsGateway`] from a raw query string
//! through parsing, planning, both backends and the merge step. Backends
//! are the in-memory implementations, wrapped so a test can count primary
//! queries, inspect the metrics queries that were sent, or take the
//! metrics gateway offline.
//!
//! # Test Structure
//!
//! - `scenarios_test.rs` - request-to-result scenarios for items and cats
//! - `fallback_test.rs` - metrics failures and the primary-store fallback
//! - `demo_fixture_test.rs` - queries over the dataset bundled with catstatsd

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catstats_core::{
    BackendError, BackendResult, GraphQuery, MetricsGateway, PrimaryQuery, PrimaryResult,
    PrimaryStore, RelatedQuery, SchemaRegistry, StoreRow,
};
use catstats_gateway::{
    Fixture, GatewayConfig, GatewayError, InMemoryMetricsGateway, InMemoryPrimaryStore,
    LazyClient, MemoryDataset, QueryContext, QueryOutput, StatsGateway,
};
use catstats_odata::parse_query_string;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};

/// 2024-01-01T00:00:00Z
pub const T0: i64 = 1_704_067_200_000;

const DEMO_FIXTURE: &str = include_str!("../../catstatsd/fixtures/demo.json");

/// Fixed request time, thirty minutes after the first sample
pub fn now() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(T0 + 30 * 60_000)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Three items, three cats and a few minutes of samples for each domain
pub fn fixture() -> Json {
    json!({
        "tables": {
            "item": [
                {"id": "i1", "name": "Widget", "item_type": "TYPE1", "price": 10.0, "quantity": 5, "in_stock": true},
                {"id": "i2", "name": "Gadget", "item_type": "TYPE2", "price": 20.0, "quantity": 2, "in_stock": true},
                {"id": "i3", "name": "Doohickey", "item_type": "TYPE1", "price": 4.0, "quantity": 0, "in_stock": false}
            ],
            "association": [
                {"id": "a1", "item_id": "i1", "target_id": "i2", "kind": "bundle", "weight": 0.8},
                {"id": "a2", "item_id": "i1", "target_id": "i3", "kind": "similar", "weight": 0.4},
                {"id": "a3", "item_id": "i2", "target_id": "i1", "kind": "bundle", "weight": 0.5}
            ],
            "cat": [
                {"id": "c1", "name": "Tom", "breed": "siamese", "age": 3, "weight": 4.0, "owner_id": "o1", "indoor": true},
                {"id": "c2", "name": "Kit", "breed": "tabby", "age": 5, "weight": 5.5, "owner_id": "o2", "indoor": false},
                {"id": "c3", "name": "Max", "breed": "siamese", "age": 7, "weight": 6.0, "owner_id": "o1", "indoor": true}
            ],
            "owner": [
                {"id": "o1", "name": "Ann", "email": "ann@example.com", "city": "Oslo"},
                {"id": "o2", "name": "Bob", "email": "bob@example.com", "city": "Rome"}
            ]
        },
        "series": {
            "item_stats": [
                {"item_id": "i1", "view_count": 100.0, "sales_count": 3.0, "stock_level": 5.0, "timestamp": T0},
                {"item_id": "i1", "view_count": 110.0, "sales_count": 4.0, "stock_level": 4.0, "timestamp": T0 + 60_000},
                {"item_id": "i2", "view_count": 50.0, "sales_count": 1.0, "stock_level": 2.0, "timestamp": T0}
            ],
            "cat_stats": [
                {"cat_id": "c1", "heart_rate": 120.0, "body_temperature": 38.5, "timestamp": T0},
                {"cat_id": "c1", "heart_rate": 130.0, "body_temperature": 38.6, "timestamp": T0 + 60_000},
                {"cat_id": "c2", "heart_rate": 150.0, "body_temperature": 38.9, "timestamp": T0},
                {"cat_id": "c3", "heart_rate": 100.0, "body_temperature": 38.1, "timestamp": T0},
                {"cat_id": "c3", "heart_rate": 110.0, "body_temperature": 38.2, "timestamp": T0 + 120_000}
            ]
        }
    })
}

pub fn registry() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::builtin())
}

/// Dataset seeded from [`fixture`]
pub fn dataset() -> MemoryDataset {
    load(&fixture().to_string())
}

/// Dataset seeded from the catstatsd demo fixture
pub fn demo_dataset() -> MemoryDataset {
    load(DEMO_FIXTURE)
}

fn load(content: &str) -> MemoryDataset {
    let fixture = Fixture::from_json(content).unwrap_or_else(|e| panic!("bad fixture: {}", e));
    MemoryDataset::from_fixture(registry(), &fixture)
}

// =============================================================================
// Backend wrappers
// =============================================================================

/// Primary store that counts calls
pub struct CountingPrimary {
    inner: InMemoryPrimaryStore,
    queries: AtomicUsize,
    related: AtomicUsize,
}

impl CountingPrimary {
    pub fn new(data: MemoryDataset) -> Self {
        Self {
            inner: InMemoryPrimaryStore::new("primary", data),
            queries: AtomicUsize::new(0),
            related: AtomicUsize::new(0),
        }
    }

    /// Parent-table queries served
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Related-row lookups served
    pub fn related(&self) -> usize {
        self.related.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.inner.set_available(available);
    }
}

#[async_trait]
impl PrimaryStore for CountingPrimary {
    fn name(&self) -> &str {
        "counting-primary"
    }

    async fn query(&self, query: &PrimaryQuery) -> BackendResult<PrimaryResult> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(query).await
    }

    async fn fetch_related(&self, query: &RelatedQuery) -> BackendResult<Vec<StoreRow>> {
        self.related.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_related(query).await
    }
}

/// How [`RecordingMetrics`] answers
#[derive(Debug, Clone)]
pub enum MetricsBehavior {
    /// Delegate to the in-memory gateway
    Live,
    Fail(BackendError),
    /// Never answer within any sane timeout
    Hang,
    /// Return a fixed document
    Respond(Json),
}

/// Metrics gateway that records every query it receives
pub struct RecordingMetrics {
    inner: InMemoryMetricsGateway,
    behavior: Mutex<MetricsBehavior>,
    queries: Mutex<Vec<GraphQuery>>,
}

impl RecordingMetrics {
    pub fn new(data: MemoryDataset) -> Self {
        Self {
            inner: InMemoryMetricsGateway::new("metrics", data),
            behavior: Mutex::new(MetricsBehavior::Live),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: MetricsBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn queries(&self) -> Vec<GraphQuery> {
        self.queries.lock().clone()
    }

    pub fn last_query(&self) -> Option<GraphQuery> {
        self.queries.lock().last().cloned()
    }
}

#[async_trait]
impl MetricsGateway for RecordingMetrics {
    fn name(&self) -> &str {
        "recording-metrics"
    }

    async fn execute(&self, query: &GraphQuery) -> BackendResult<Json> {
        self.queries.lock().push(query.clone());
        let behavior = self.behavior.lock().clone();
        match behavior {
            MetricsBehavior::Live => self.inner.execute(query).await,
            MetricsBehavior::Fail(e) => Err(e),
            MetricsBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BackendError::Timeout)
            }
            MetricsBehavior::Respond(doc) => Ok(doc),
        }
    }
}

// =============================================================================
// Gateway under test
// =============================================================================

/// A [`StatsGateway`] with handles on both of its backends
pub struct TestGateway {
    pub gateway: StatsGateway,
    pub primary: Arc<CountingPrimary>,
    pub metrics: Arc<RecordingMetrics>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(dataset(), GatewayConfig::default())
    }

    pub fn with_config(data: MemoryDataset, config: GatewayConfig) -> Self {
        let primary = Arc::new(CountingPrimary::new(data.clone()));
        let metrics = Arc::new(RecordingMetrics::new(data));

        let primary_client: Arc<dyn PrimaryStore> = primary.clone();
        let metrics_client: Arc<dyn MetricsGateway> = metrics.clone();
        let context = QueryContext::new(
            registry(),
            LazyClient::ready("primary", primary_client),
            config,
        )
        .with_metrics(LazyClient::ready("metrics", metrics_client));

        Self {
            gateway: StatsGateway::new(context),
            primary,
            metrics,
        }
    }

    /// Run a raw query string at the fixed request time
    pub async fn list(&self, entity_type: &str, query: &str) -> Result<QueryOutput, GatewayError> {
        let params = parse_query_string(query)?;
        self.gateway.list_at(entity_type, &params, now()).await
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// `id` of every returned record, in order
pub fn ids(output: &QueryOutput) -> Vec<String> {
    output
        .records
        .iter()
        .filter_map(|r| r.value("id").as_str().map(str::to_string))
        .collect()
}
