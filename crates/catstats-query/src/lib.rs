//! catstats-query - query planning and backend query construction
//!
//! Takes a validated [`catstats_odata::ParsedQuery`] and produces a
//! [`PlannedQuery`]: the primary-store query, the optional metrics graph
//! query (normal or flipped), side queries for association expands and the
//! fallback lookup used when the metrics gateway cannot answer.

pub mod config;
pub mod error;
pub mod expand;
pub mod metrics;
pub mod planner;
pub mod primary;

pub use config::PlannerConfig;
pub use error::{PlanError, PlanningWarning};
pub use expand::{bind_expand, BoundExpand, NestedSort, StatsExpandParams};
pub use metrics::{build_metrics_query, JoinDirection, MetricsRequest};
pub use planner::{MetricsPlan, PlannedQuery, PostSort, QueryPlanner, SideQuery};
pub use primary::{
    build_grouped_query, build_primary_query, required_columns, AggregateBinding, ApplyPlan,
    GroupKeyBinding, Page,
};
