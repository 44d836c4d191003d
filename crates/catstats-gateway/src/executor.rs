//! Execution and fallback
//!
//! ```text
//! PRIMARY_ONLY ----------------------------------------------> DONE
//! TRY_METRICS --(error | timeout | structurally empty)--> FALLBACK --> DONE
//! ```
//!
//! The metrics path answers parents and their metrics in one call. The
//! fallback path re-runs the parent query on the primary store and looks up
//! the latest metric sample per parent, trading the time series for an
//! answer. Association expands are always side queries on the primary
//! store; independent side queries run concurrently and are merged in plan
//! order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use catstats_core::{
    ArgValue, BackendError, BackendResult, Entity, EntityBinding, GraphQuery, GroupResult,
    MetricsGateway, PrimaryQuery, PrimaryResult, PrimaryStore, Value,
};
use catstats_query::{
    ApplyPlan, BoundExpand, JoinDirection, MetricsPlan, PlannedQuery, PlanningWarning, SideQuery,
};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::QueryContext;
use crate::decode::{decode_metrics, is_structurally_empty, DecodedRow};
use crate::error::GatewayError;
use crate::merge::{
    attach_expansion, attach_records, group_results, join_keys, post_sort, project_expansions,
    store_rows_to_entities,
};

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    PrimaryOnly,
    Metrics,
    Fallback,
}

/// Canonical result of one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutput {
    pub entity_type: String,
    pub path: ExecutionPath,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<Entity>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupResult>,
    /// Total matches reported by the primary store, when known. The metrics
    /// gateway reports no total, so results from the metrics path leave it
    /// empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PlanningWarning>,
}

/// Runs planned queries against the backends of a [`QueryContext`]
pub struct Executor<'a> {
    context: &'a QueryContext,
    timeout: Duration,
}

impl<'a> Executor<'a> {
    pub fn new(context: &'a QueryContext) -> Self {
        Self {
            context,
            timeout: context.config().backend_timeout(),
        }
    }

    pub async fn execute(&self, plan: &PlannedQuery) -> Result<QueryOutput, GatewayError> {
        let entity = self.entity(&plan.entity_type).map_err(GatewayError::Primary)?;

        if let Some(apply) = &plan.apply {
            let groups = self
                .grouped(plan, apply, entity)
                .await
                .map_err(GatewayError::Primary)?;
            return Ok(self.output(plan, ExecutionPath::PrimaryOnly, Vec::new(), groups, None));
        }

        let Some(metrics) = &plan.metrics else {
            let (records, total) = self
                .primary_path(plan, entity, None)
                .await
                .map_err(GatewayError::Primary)?;
            return Ok(self.output(plan, ExecutionPath::PrimaryOnly, records, Vec::new(), total));
        };

        let mut parents = match self.metrics_parents(plan, metrics, entity).await {
            Ok(parents) => parents,
            Err(metrics_error) => {
                warn!(
                    entity = %plan.entity_type,
                    navigation = %metrics.expand.navigation,
                    error = %metrics_error,
                    "Metrics path failed, falling back to primary store"
                );
                return match self.primary_path(plan, entity, Some(&metrics.fallback)).await {
                    Ok((records, total)) => {
                        Ok(self.output(plan, ExecutionPath::Fallback, records, Vec::new(), total))
                    }
                    Err(fallback_error) => {
                        warn!(
                            entity = %plan.entity_type,
                            error = %fallback_error,
                            "Fallback path failed"
                        );
                        Err(GatewayError::FallbackExhausted {
                            metrics: metrics_error,
                            fallback: fallback_error,
                        })
                    }
                };
            }
        };

        // Side-query failures are primary-store errors and never trigger the fallback
        let side_queries: Vec<&SideQuery> = plan.side_queries.iter().collect();
        if !side_queries.is_empty() {
            let store = self.primary().await.map_err(GatewayError::Primary)?;
            self.run_side_queries(&store, &side_queries, &mut parents)
                .await
                .map_err(GatewayError::Primary)?;
        }

        let mut expands: Vec<&BoundExpand> = side_queries.iter().map(|s| &s.expand).collect();
        expands.push(&metrics.expand);
        let records = self.finish(plan, parents, !plan.is_flipped, &expands);
        Ok(self.output(plan, ExecutionPath::Metrics, records, Vec::new(), None))
    }

    fn output(
        &self,
        plan: &PlannedQuery,
        path: ExecutionPath,
        records: Vec<Entity>,
        groups: Vec<GroupResult>,
        total: Option<u64>,
    ) -> QueryOutput {
        debug!(
            entity = %plan.entity_type,
            path = ?path,
            records = records.len(),
            groups = groups.len(),
            "Query executed"
        );
        QueryOutput {
            entity_type: plan.entity_type.clone(),
            path,
            records,
            groups,
            total,
            warnings: plan.warnings.clone(),
        }
    }

    fn entity(&self, name: &str) -> BackendResult<&'a EntityBinding> {
        self.context
            .registry()
            .entity(name)
            .ok_or_else(|| BackendError::Internal(format!("entity type '{}' is not registered", name)))
    }

    /// Run one backend call under the configured timeout
    async fn timed<T>(&self, call: impl Future<Output = BackendResult<T>>) -> BackendResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| BackendError::Timeout)?
    }

    async fn primary(&self) -> BackendResult<Arc<dyn PrimaryStore>> {
        self.timed(self.context.primary().get()).await
    }

    async fn metrics_gateway(&self) -> BackendResult<Arc<dyn MetricsGateway>> {
        let client = self
            .context
            .metrics()
            .ok_or_else(|| BackendError::Unavailable("no metrics gateway configured".to_string()))?;
        self.timed(client.get()).await
    }

    // =========================================================================
    // Paths
    // =========================================================================

    async fn grouped(
        &self,
        plan: &PlannedQuery,
        apply: &ApplyPlan,
        entity: &EntityBinding,
    ) -> BackendResult<Vec<GroupResult>> {
        let store = self.primary().await?;
        let result = self.timed(store.query(&plan.primary)).await?;
        Ok(group_results(result, apply, entity))
    }

    /// Parents from the primary store, plus side queries (and the metrics
    /// fallback lookup when given)
    async fn primary_path(
        &self,
        plan: &PlannedQuery,
        entity: &EntityBinding,
        fallback: Option<&SideQuery>,
    ) -> BackendResult<(Vec<Entity>, Option<u64>)> {
        let store = self.primary().await?;
        let result = if plan.post_sort.is_some() {
            self.all_parents(&store, &plan.primary).await?
        } else {
            self.timed(store.query(&plan.primary)).await?
        };
        let mut parents = store_rows_to_entities(&result.rows, entity);
        debug!(entity = %entity.name, rows = parents.len(), "Primary rows fetched");

        let mut side_queries: Vec<&SideQuery> = plan.side_queries.iter().collect();
        side_queries.extend(fallback);
        self.run_side_queries(&store, &side_queries, &mut parents).await?;

        let expands: Vec<&BoundExpand> = side_queries.iter().map(|s| &s.expand).collect();
        let parents = self.finish(plan, parents, true, &expands);
        Ok((parents, result.total))
    }

    /// Every matching parent, read in pages of the query limit until a short
    /// page. An in-memory sort must see the whole candidate set.
    async fn all_parents(
        &self,
        store: &Arc<dyn PrimaryStore>,
        query: &PrimaryQuery,
    ) -> BackendResult<PrimaryResult> {
        let mut query = query.clone();
        let mut result = PrimaryResult::default();
        let mut pages = 0_u32;
        loop {
            let page = self.timed(store.query(&query)).await?;
            pages += 1;
            let fetched = page.rows.len();
            result.rows.extend(page.rows);
            result.total = page.total.or(result.total);
            if fetched == 0 || fetched < query.limit as usize {
                break;
            }
            query.offset += u64::from(query.limit);
        }
        debug!(table = %query.table, pages, rows = result.rows.len(), "Read all candidate parents");
        Ok(result)
    }

    /// Parents with their series attached, from the metrics gateway alone.
    /// Any error here sends the request down the fallback path.
    async fn metrics_parents(
        &self,
        plan: &PlannedQuery,
        metrics: &MetricsPlan,
        entity: &EntityBinding,
    ) -> BackendResult<Vec<Entity>> {
        let target = self.entity(&metrics.expand.target)?;
        let gateway = self.metrics_gateway().await?;

        let rows = if plan.post_sort.is_some() && !plan.is_flipped {
            self.all_metrics_rows(&gateway, metrics, entity, target).await?
        } else {
            self.metrics_rows(&gateway, &metrics.query, metrics.direction, entity, target)
                .await?
        };

        if is_structurally_empty(&rows, &metrics.metric_columns) {
            return Err(BackendError::SchemaUnsupported(format!(
                "{} returned no data for {}",
                gateway.name(),
                target.table
            )));
        }

        Ok(rows
            .iter()
            .map(|row| {
                let mut parent = row.to_entity(entity);
                attach_records(
                    &mut parent,
                    row.series_records(target, &metrics.metric_columns),
                    &metrics.expand,
                );
                parent
            })
            .collect())
    }

    async fn metrics_rows(
        &self,
        gateway: &Arc<dyn MetricsGateway>,
        query: &GraphQuery,
        direction: JoinDirection,
        entity: &EntityBinding,
        target: &EntityBinding,
    ) -> BackendResult<Vec<DecodedRow>> {
        debug!(gateway = %gateway.name(), query = %query, "Running metrics query");
        let doc = self.timed(gateway.execute(query)).await?;
        decode_metrics(&doc, direction, entity, target)
    }

    /// Entity-driven metrics query read page by page, for an in-memory sort
    async fn all_metrics_rows(
        &self,
        gateway: &Arc<dyn MetricsGateway>,
        metrics: &MetricsPlan,
        entity: &EntityBinding,
        target: &EntityBinding,
    ) -> BackendResult<Vec<DecodedRow>> {
        let mut query = metrics.query.clone();
        let limit = query.root.arg("limit").and_then(ArgValue::as_i64).unwrap_or(0);
        let mut offset = query.root.arg("offset").and_then(ArgValue::as_i64).unwrap_or(0);
        let mut rows = Vec::new();
        loop {
            let page = self
                .metrics_rows(gateway, &query, metrics.direction, entity, target)
                .await?;
            let fetched = page.len();
            rows.extend(page);
            if limit <= 0 || fetched == 0 || (fetched as i64) < limit {
                break;
            }
            offset += limit;
            query.root.set_arg("offset", ArgValue::Int(offset));
        }
        Ok(rows)
    }

    /// Fetch every side query concurrently, then attach in plan order
    async fn run_side_queries(
        &self,
        store: &Arc<dyn PrimaryStore>,
        side_queries: &[&SideQuery],
        parents: &mut [Entity],
    ) -> BackendResult<()> {
        let requests: Vec<(&SideQuery, Vec<Value>)> = side_queries
            .iter()
            .map(|side| (*side, join_keys(parents, &side.expand.left_key)))
            .collect();
        let fetches = requests
            .into_iter()
            .map(|(side, keys)| self.fetch_side(store, side, keys));
        let related = try_join_all(fetches).await?;

        for (side, records) in side_queries.iter().zip(related) {
            attach_expansion(parents, records, &side.expand);
        }
        Ok(())
    }

    async fn fetch_side(
        &self,
        store: &Arc<dyn PrimaryStore>,
        side: &SideQuery,
        keys: Vec<Value>,
    ) -> BackendResult<Vec<Entity>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let target = self.entity(&side.expand.target)?;
        let rows = self
            .timed(store.fetch_related(&side.related_query(keys)))
            .await?;
        debug!(table = %side.table, rows = rows.len(), "Side query fetched");
        Ok(store_rows_to_entities(&rows, target))
    }

    /// Post-sort, nested select, then parent projection
    fn finish(
        &self,
        plan: &PlannedQuery,
        parents: Vec<Entity>,
        allow_post_sort: bool,
        expands: &[&BoundExpand],
    ) -> Vec<Entity> {
        let mut parents = match (&plan.post_sort, allow_post_sort) {
            (Some(sort), true) => post_sort(parents, sort),
            _ => parents,
        };

        project_expansions(&mut parents, expands);
        for parent in &mut parents {
            parent.project(&plan.select);
        }
        parents
    }
}
