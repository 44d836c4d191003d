//! Request entry point: parse, plan, execute

use std::sync::Arc;

use catstats_core::QueryParams;
use catstats_odata::{parse_params, parse_query_string};
use catstats_query::{PlannedQuery, QueryPlanner};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::context::QueryContext;
use crate::error::GatewayError;
use crate::executor::{Executor, QueryOutput};

/// Stats query gateway over one [`QueryContext`]
#[derive(Debug, Clone)]
pub struct StatsGateway {
    context: Arc<QueryContext>,
}

impl StatsGateway {
    pub fn new(context: QueryContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// Parse and plan without touching a backend
    pub fn plan(
        &self,
        entity_type: &str,
        params: &QueryParams,
        now: DateTime<Utc>,
    ) -> Result<PlannedQuery, GatewayError> {
        let registry = self.context.registry();
        let parsed = parse_params(entity_type, params, registry)?;
        let planner = QueryPlanner::new(registry, self.context.config().planner.clone());
        let plan = planner.plan(&parsed, params, now)?;
        debug!(
            entity = %entity_type,
            flipped = plan.is_flipped,
            side_queries = plan.side_queries.len(),
            "Query planned"
        );
        Ok(plan)
    }

    /// List records of an entity type
    pub async fn list(
        &self,
        entity_type: &str,
        params: &QueryParams,
    ) -> Result<QueryOutput, GatewayError> {
        self.list_at(entity_type, params, Utc::now()).await
    }

    /// List records with default time windows anchored at `now`
    #[instrument(
        name = "query",
        skip(self, entity_type, params, now),
        fields(request_id = %Uuid::new_v4(), entity = %entity_type)
    )]
    pub async fn list_at(
        &self,
        entity_type: &str,
        params: &QueryParams,
        now: DateTime<Utc>,
    ) -> Result<QueryOutput, GatewayError> {
        let plan = self.plan(entity_type, params, now)?;
        Executor::new(&self.context).execute(&plan).await
    }

    /// List records for a raw `$name=value&...` query string
    pub async fn list_query_string(
        &self,
        entity_type: &str,
        query: &str,
    ) -> Result<QueryOutput, GatewayError> {
        let params = parse_query_string(query)?;
        self.list(entity_type, &params).await
    }
}
