//! Query planner - decides which backends answer a request and how
//!
//! For every request the planner produces a [`PlannedQuery`]:
//!
//! - `$apply` requests and requests without a metrics expand are answered by
//!   the primary store alone (plus side queries for association expands).
//! - A metrics expand adds a [`MetricsPlan`] with the graph query for the
//!   metrics gateway and the side query the executor falls back to.
//! - Sorting parents by a metric of the expanded relation flips the metrics
//!   query so the metrics table drives sort and pagination.

use catstats_core::{
    clamp_limit, EntityBinding, GraphQuery, PrimaryQuery, QueryParams, RelatedQuery,
    SchemaRegistry, SortDirection, SortKey, StatType, TimeWindow, Value,
};
use catstats_odata::{ExpandOptions, ParseError, ParsedQuery};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::PlannerConfig;
use crate::error::{PlanError, PlanningWarning};
use crate::expand::{bind_expand, BoundExpand, StatsExpandParams};
use crate::metrics::{build_metrics_query, JoinDirection, MetricsRequest};
use crate::primary::{build_grouped_query, build_primary_query, required_columns, ApplyPlan, Page};

// =============================================================================
// Plan types
// =============================================================================

/// Direct primary-store lookup for one expanded navigation
#[derive(Debug, Clone, PartialEq)]
pub struct SideQuery {
    pub expand: BoundExpand,
    /// Target table
    pub table: String,
    /// Target column holding the join key
    pub key_column: String,
    pub window: Option<TimeWindow>,
    /// Keep only the newest sample per metric series
    pub latest_only: bool,
}

impl SideQuery {
    fn new(expand: BoundExpand, target: &EntityBinding) -> Self {
        let key_column = target
            .column(&expand.right_key)
            .unwrap_or(&expand.right_key)
            .to_string();
        Self {
            table: target.table.clone(),
            key_column,
            window: None,
            latest_only: false,
            expand,
        }
    }

    /// Store query for the given parent keys
    pub fn related_query(&self, keys: Vec<Value>) -> RelatedQuery {
        RelatedQuery {
            table: self.table.clone(),
            key_column: self.key_column.clone(),
            keys,
            window: self.window,
            latest_only: self.latest_only,
        }
    }
}

/// In-memory sort of parents by a field of an expanded navigation
///
/// Used when the sort cannot be pushed to a backend. Parents are read in
/// pages of the configured maximum until the backend runs out, sorted, then
/// paged.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSort {
    pub navigation: String,
    /// Field on the navigation target
    pub field: String,
    pub direction: SortDirection,
    /// Reduction of a collection to one sort value
    pub stat_type: StatType,
    pub page: Page,
}

/// Metrics-gateway part of a plan
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsPlan {
    pub query: GraphQuery,
    pub stats: StatsExpandParams,
    pub expand: BoundExpand,
    pub window: TimeWindow,
    pub stat_type: StatType,
    pub sampling_interval_secs: u32,
    pub direction: JoinDirection,
    /// Requested metric columns; all null means the relation is unsupported
    pub metric_columns: Vec<String>,
    /// Primary-store lookup used when the metrics path fails
    pub fallback: SideQuery,
}

/// Planner output, consumed by the executor
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub entity_type: String,
    /// Query for the primary-only and fallback paths
    pub primary: PrimaryQuery,
    pub metrics: Option<MetricsPlan>,
    /// Association expands, answered by the primary store on every path
    pub side_queries: Vec<SideQuery>,
    pub is_flipped: bool,
    /// Applies on every path except a flipped metrics path
    pub post_sort: Option<PostSort>,
    pub apply: Option<ApplyPlan>,
    /// Output projection of parent records
    pub select: Vec<String>,
    pub warnings: Vec<PlanningWarning>,
}

// =============================================================================
// Planner
// =============================================================================

/// How the parent sort is carried out
enum SortPlan {
    None,
    /// Plain field, pushed to the backend
    Pushdown,
    /// Metric sort, pushed to the metrics gateway via a flipped query
    Flip {
        navigation: String,
        field: String,
        direction: SortDirection,
        raw: String,
    },
    InMemory {
        navigation: String,
        field: String,
        direction: SortDirection,
    },
}

pub struct QueryPlanner<'a> {
    registry: &'a SchemaRegistry,
    config: PlannerConfig,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(registry: &'a SchemaRegistry, config: PlannerConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan one request. `now` anchors default time windows.
    pub fn plan(
        &self,
        parsed: &ParsedQuery,
        params: &QueryParams,
        now: DateTime<Utc>,
    ) -> Result<PlannedQuery, PlanError> {
        let entity = self
            .registry
            .entity(&parsed.entity_type)
            .ok_or_else(|| ParseError::UnknownEntity(parsed.entity_type.clone()))?;

        let limit = clamp_limit(params.limit, self.config.default_limit, self.config.max_limit);
        let page = Page {
            offset: u64::from(params.page_index()) * u64::from(limit),
            limit,
        };

        if parsed.is_grouped() {
            return Ok(self.plan_grouped(parsed, entity, page));
        }

        let mut warnings = Vec::new();
        let mut expands: Vec<(BoundExpand, ExpandOptions)> = Vec::new();
        for item in &parsed.expand {
            if let Some(value) = &item.options.rejected_stat_type {
                warn!(navigation = %item.navigation, stat_type = %value, "Invalid statType ignored, using default");
                warnings.push(PlanningWarning::InvalidStatTypeIgnored {
                    navigation: item.navigation.clone(),
                    value: value.clone(),
                });
            }
            let bound = bind_expand(item, entity, self.registry)?;
            expands.push((bound, item.options.clone()));
        }

        let sort = self.resolve_sort(parsed, entity, &mut expands, &mut warnings);

        if expands.iter().filter(|(b, _)| b.metrics).count() > 1 {
            return Err(PlanError::Unsupported(
                "at most one metrics navigation can be expanded".to_string(),
            ));
        }

        let metrics_expand = expands.iter().find(|(b, _)| b.metrics);
        let stat_type = metrics_expand
            .and_then(|(_, o)| o.stat_type)
            .unwrap_or(self.config.default_stat_type);

        let post_sort = match &sort {
            SortPlan::Flip {
                navigation,
                field,
                direction,
                ..
            }
            | SortPlan::InMemory {
                navigation,
                field,
                direction,
            } => Some(PostSort {
                navigation: navigation.clone(),
                field: field.clone(),
                direction: *direction,
                stat_type,
                page,
            }),
            SortPlan::None | SortPlan::Pushdown => None,
        };

        let primary_page = if post_sort.is_some() {
            Page {
                offset: 0,
                limit: self.config.max_limit,
            }
        } else {
            page
        };
        let keys: Vec<&str> = expands.iter().map(|(b, _)| b.left_key.as_str()).collect();
        let columns = required_columns(entity, &parsed.select, &keys);
        let pushed_sort = match &sort {
            SortPlan::Pushdown => parsed.order_by.as_ref(),
            _ => None,
        };
        let primary = build_primary_query(
            entity,
            parsed.filter.as_ref(),
            pushed_sort,
            columns,
            primary_page,
        );

        let mut metrics = None;
        let mut side_queries = Vec::new();
        for (bound, options) in expands {
            let nav = entity
                .navigation(&bound.navigation)
                .ok_or_else(|| PlanError::Unsupported(format!("navigation {}", bound.navigation)))?;
            let target = self
                .registry
                .target_of(nav)
                .ok_or_else(|| PlanError::Unsupported(format!("target {}", nav.target)))?;

            if !bound.metrics {
                side_queries.push(SideQuery::new(bound, target));
                continue;
            }

            let window = resolve_window(&options, now, self.config.metrics_window(now));
            let sampling_interval_secs = options
                .sampling_interval_secs
                .unwrap_or(self.config.default_sampling_interval_secs);
            let mut metric_columns = selected_metrics(target, &bound.select);
            if metric_columns.is_empty() {
                if !bound.select.is_empty() {
                    warn!(navigation = %bound.navigation, "No metric selected, sampling all metrics");
                    warnings.push(PlanningWarning::NoMetricSelected {
                        navigation: bound.navigation.clone(),
                    });
                }
                metric_columns = target
                    .metric_fields()
                    .map(|f| f.backend_column.clone())
                    .collect();
            }

            let (direction, metric_sort, flipped_raw, metrics_page) = match &sort {
                SortPlan::Flip {
                    field,
                    direction,
                    raw,
                    ..
                } => (
                    JoinDirection::MetricsDriven,
                    target.column(field).map(|column| SortKey {
                        column: column.to_string(),
                        direction: *direction,
                    }),
                    Some(raw.clone()),
                    page,
                ),
                _ => (JoinDirection::EntityDriven, None, None, primary_page),
            };

            let query = build_metrics_query(&MetricsRequest {
                entity,
                target,
                navigation: nav,
                entity_columns: &primary.columns,
                predicate: primary.predicate.as_ref(),
                entity_sort: primary.sort.as_ref(),
                metric_columns: &metric_columns,
                metric_sort: metric_sort.as_ref(),
                stat_type,
                sampling_interval_secs,
                window,
                page: metrics_page,
                direction,
            });

            let mut fallback = SideQuery::new(bound.clone(), target);
            fallback.window = Some(if options.has_time_range() {
                window
            } else {
                self.config.fallback_window(now)
            });
            fallback.latest_only = true;

            debug!(
                entity = %entity.name,
                navigation = %bound.navigation,
                direction = ?direction,
                "Planned metrics query"
            );

            metrics = Some(MetricsPlan {
                query,
                stats: StatsExpandParams {
                    expansion_key: bound.navigation.clone(),
                    options,
                    is_query_flipped: direction == JoinDirection::MetricsDriven,
                    flipped_order_by_raw: flipped_raw,
                },
                expand: bound,
                window,
                stat_type,
                sampling_interval_secs,
                direction,
                metric_columns,
                fallback,
            });
        }

        Ok(PlannedQuery {
            entity_type: entity.name.clone(),
            primary,
            is_flipped: metrics
                .as_ref()
                .is_some_and(|m| m.direction == JoinDirection::MetricsDriven),
            metrics,
            side_queries,
            post_sort,
            apply: None,
            select: parsed.select.clone(),
            warnings,
        })
    }

    fn plan_grouped(&self, parsed: &ParsedQuery, entity: &EntityBinding, page: Page) -> PlannedQuery {
        if !parsed.expand.is_empty() {
            debug!(entity = %entity.name, "Ignoring $expand for grouped output");
        }
        if parsed.order_by.is_some() {
            debug!(entity = %entity.name, "Ignoring $orderby for grouped output");
        }

        let (primary, apply_plan) = match &parsed.apply {
            Some(apply) => {
                let (query, plan) = build_grouped_query(entity, parsed.filter.as_ref(), apply, page);
                (query, Some(plan))
            }
            None => (
                build_primary_query(entity, parsed.filter.as_ref(), None, Vec::new(), page),
                None,
            ),
        };

        PlannedQuery {
            entity_type: entity.name.clone(),
            primary,
            metrics: None,
            side_queries: Vec::new(),
            is_flipped: false,
            post_sort: None,
            apply: apply_plan,
            select: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Decide how the parent sort is executed.
    ///
    /// A sort through a navigation implies expanding it. Only a metric field
    /// of an expanded metrics navigation flips the query; every other
    /// navigation sort runs in memory.
    fn resolve_sort(
        &self,
        parsed: &ParsedQuery,
        entity: &EntityBinding,
        expands: &mut Vec<(BoundExpand, ExpandOptions)>,
        warnings: &mut Vec<PlanningWarning>,
    ) -> SortPlan {
        if let Some(order) = &parsed.order_by {
            let Some(nav_name) = &order.navigation else {
                return SortPlan::Pushdown;
            };
            let Some(nav) = entity.navigation(nav_name) else {
                return self.reject_flip(&order.raw, "navigation is not registered", warnings, None);
            };
            if !expands.iter().any(|(b, _)| b.navigation == nav.name) {
                debug!(navigation = %nav.name, "Expanding navigation used by $orderby");
                expands.push((BoundExpand::plain(nav), ExpandOptions::default()));
            }

            let in_memory = SortPlan::InMemory {
                navigation: nav.name.clone(),
                field: order.field.clone(),
                direction: order.direction,
            };
            if !nav.is_metrics() {
                return in_memory;
            }
            if !self.is_metric_field(nav.target.as_str(), &order.field) {
                return self.reject_flip(
                    &order.raw,
                    &format!("{} is not a metric of {}", order.field, nav.name),
                    warnings,
                    Some(in_memory),
                );
            }
            return SortPlan::Flip {
                navigation: nav.name.clone(),
                field: order.field.clone(),
                direction: order.direction,
                raw: order.raw.clone(),
            };
        }

        let requested = expands.iter().find_map(|(bound, options)| {
            options
                .order_by
                .as_ref()
                .filter(|o| o.is_metric_field)
                .map(|o| (bound, o))
        });
        let Some((bound, order)) = requested else {
            return SortPlan::None;
        };

        let in_memory = SortPlan::InMemory {
            navigation: bound.navigation.clone(),
            field: order.field.clone(),
            direction: order.direction,
        };
        if !bound.metrics {
            let reason = format!("{} is not a metrics navigation", bound.navigation);
            return self.reject_flip(&order.raw, &reason, warnings, Some(in_memory));
        }
        if !self.is_metric_field(&bound.target, &order.field) {
            let reason = format!("{} is not a metric of {}", order.field, bound.navigation);
            return self.reject_flip(&order.raw, &reason, warnings, Some(in_memory));
        }
        SortPlan::Flip {
            navigation: bound.navigation.clone(),
            field: order.field.clone(),
            direction: order.direction,
            raw: order.raw.clone(),
        }
    }

    fn is_metric_field(&self, target: &str, field: &str) -> bool {
        self.registry
            .entity(target)
            .and_then(|t| t.field(field))
            .is_some_and(|f| f.metric)
    }

    fn reject_flip(
        &self,
        raw: &str,
        reason: &str,
        warnings: &mut Vec<PlanningWarning>,
        instead: Option<SortPlan>,
    ) -> SortPlan {
        warn!(order_by = %raw, reason = %reason, "Flip requested but not possible, sorting in memory");
        warnings.push(PlanningWarning::FlipRequestedButNoNavigation {
            order_by: raw.to_string(),
            reason: reason.to_string(),
        });
        instead.unwrap_or(SortPlan::None)
    }
}

/// Backend columns of the metrics named in a nested `$select`
fn selected_metrics(target: &EntityBinding, select: &[String]) -> Vec<String> {
    target
        .metric_fields()
        .filter(|f| select.iter().any(|s| *s == f.logical_name))
        .map(|f| f.backend_column.clone())
        .collect()
}

/// Caller time range with open ends filled in, or `default`
fn resolve_window(options: &ExpandOptions, now: DateTime<Utc>, default: TimeWindow) -> TimeWindow {
    let span = default.end_ms - default.start_ms;
    match (options.start_time_ms, options.end_time_ms) {
        (Some(start), Some(end)) => TimeWindow::new(start, end),
        (Some(start), None) => TimeWindow::new(start, now.timestamp_millis().max(start)),
        (None, Some(end)) => TimeWindow::new(end - span, end),
        (None, None) => default,
    }
}
