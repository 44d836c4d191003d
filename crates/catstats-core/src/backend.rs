//! Backend traits - the boundary to the two external stores

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::graph::GraphQuery;
use crate::models::{PrimaryResult, StoreRow};
use crate::primary::{PrimaryQuery, RelatedQuery};

/// The structured-attribute store holding entity records
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run a filtered, sorted, paginated (optionally grouped) query
    async fn query(&self, query: &PrimaryQuery) -> BackendResult<PrimaryResult>;

    /// Fetch rows of a related table by join key
    async fn fetch_related(&self, query: &RelatedQuery) -> BackendResult<Vec<StoreRow>>;
}

/// The time-series metrics gateway, queried with the nested graph language
///
/// Responses are JSON documents whose top-level keys are table names mapping
/// to arrays of records; metric columns carry parallel arrays of samples.
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn execute(&self, query: &GraphQuery) -> BackendResult<serde_json::Value>;
}
