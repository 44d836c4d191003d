//! Metrics graph-query builder
//!
//! One builder serves both join directions:
//!
//! - [`JoinDirection::EntityDriven`]: the entity table is the outer block and
//!   carries filter, sort and pagination; the metrics table is nested with
//!   the join and time-range arguments (left outer join, entity drives).
//! - [`JoinDirection::MetricsDriven`]: the metrics table is the outer block
//!   carrying the time range, the metric sort and pagination; the entity
//!   table is nested with the join arguments and the entity filter. Sorting
//!   and paging then apply to metrics rows before the join, which gives
//!   correct top-N-by-metric results.

use catstats_core::{
    ArgValue, EntityBinding, Field, GraphQuery, NavigationBinding, Predicate, Selection,
    SortKey, StatType, TimeWindow,
};
use serde::Serialize;

use crate::primary::Page;

/// Which side of the join drives the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinDirection {
    EntityDriven,
    MetricsDriven,
}

/// Everything the builder needs for one metrics expand
#[derive(Debug, Clone)]
pub struct MetricsRequest<'a> {
    pub entity: &'a EntityBinding,
    pub target: &'a EntityBinding,
    pub navigation: &'a NavigationBinding,
    /// Entity columns to select
    pub entity_columns: &'a [String],
    pub predicate: Option<&'a Predicate>,
    /// Entity-side sort (entity-driven only)
    pub entity_sort: Option<&'a SortKey>,
    /// Metric columns to sample
    pub metric_columns: &'a [String],
    /// Metric sort (metrics-driven only)
    pub metric_sort: Option<&'a SortKey>,
    pub stat_type: StatType,
    pub sampling_interval_secs: u32,
    pub window: TimeWindow,
    pub page: Page,
    pub direction: JoinDirection,
}

fn filter_arg(predicate: &Predicate) -> ArgValue {
    ArgValue::Object(vec![(
        predicate.column.clone(),
        ArgValue::Object(vec![(
            predicate.op.keyword().to_string(),
            ArgValue::from(&predicate.value),
        )]),
    )])
}

fn order_arg(sort: &SortKey) -> ArgValue {
    ArgValue::Object(vec![(
        sort.column.clone(),
        ArgValue::enumeration(sort.direction.as_str()),
    )])
}

fn push_join_args(selection: &mut Selection, left_column: &str, right_column: &str) {
    selection.push_arg("left_column", ArgValue::Str(left_column.to_string()));
    selection.push_arg("right_column", ArgValue::Str(right_column.to_string()));
    selection.push_arg("condition_operator", ArgValue::enumeration("equal"));
    selection.push_arg("join_type", ArgValue::enumeration("left_outer_join"));
}

fn push_time_args(selection: &mut Selection, request: &MetricsRequest<'_>) {
    selection.push_arg("interval_start_ms", ArgValue::Int(request.window.start_ms));
    selection.push_arg("interval_end_ms", ArgValue::Int(request.window.end_ms));
    selection.push_arg(
        "downsampling_interval_secs",
        ArgValue::Int(i64::from(request.sampling_interval_secs)),
    );
}

fn push_page_args(selection: &mut Selection, page: Page) {
    selection.push_arg("limit", ArgValue::Int(i64::from(page.limit)));
    selection.push_arg(
        "offset",
        ArgValue::Int(i64::try_from(page.offset).unwrap_or(i64::MAX)),
    );
}

/// Backend column of a navigation key, falling back to the logical name
fn key_column<'a>(entity: &'a EntityBinding, key: &'a str) -> &'a str {
    entity.column(key).unwrap_or(key)
}

/// Fields of the metrics block: join key, sampled metrics, timestamp.
///
/// The join key and timestamp are always present, even when an explicit
/// select left them out.
fn metrics_fields(request: &MetricsRequest<'_>) -> Vec<Field> {
    let key = key_column(request.target, &request.navigation.right_key);
    let mut fields = vec![Field::column(key)];
    for column in request.metric_columns {
        if column != key {
            fields.push(Field::metric(column, request.stat_type));
        }
    }
    if let Some(ts) = request.target.timestamp_column() {
        if ts != key && !request.metric_columns.iter().any(|c| c == ts) {
            fields.push(Field::column(ts));
        }
    }
    fields
}

fn entity_fields(request: &MetricsRequest<'_>) -> Vec<Field> {
    request
        .entity_columns
        .iter()
        .map(|c| Field::column(c))
        .collect()
}

/// Build the metrics query for one expand
pub fn build_metrics_query(request: &MetricsRequest<'_>) -> GraphQuery {
    let entity_key = key_column(request.entity, &request.navigation.left_key);
    let metrics_key = key_column(request.target, &request.navigation.right_key);

    let mut entity_block = Selection::new(&request.entity.table);
    entity_block.fields = entity_fields(request);
    let mut metrics_block = Selection::new(&request.target.table);
    metrics_block.fields = metrics_fields(request);

    match request.direction {
        JoinDirection::EntityDriven => {
            if let Some(predicate) = request.predicate {
                entity_block.push_arg("filter", filter_arg(predicate));
            }
            if let Some(sort) = request.entity_sort {
                entity_block.push_arg("order_by", order_arg(sort));
            }
            push_page_args(&mut entity_block, request.page);

            push_join_args(&mut metrics_block, entity_key, metrics_key);
            push_time_args(&mut metrics_block, request);

            entity_block.fields.push(Field::Nested(metrics_block));
            GraphQuery::new(entity_block)
        }
        JoinDirection::MetricsDriven => {
            push_time_args(&mut metrics_block, request);
            if let Some(sort) = request.metric_sort {
                metrics_block.push_arg("order_by", order_arg(sort));
            }
            push_page_args(&mut metrics_block, request.page);

            push_join_args(&mut entity_block, metrics_key, entity_key);
            if let Some(predicate) = request.predicate {
                entity_block.push_arg("filter", filter_arg(predicate));
            }

            metrics_block.fields.push(Field::Nested(entity_block));
            GraphQuery::new(metrics_block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::CAT;
    use catstats_core::{CompareOp, SchemaRegistry, SortDirection};
    use pretty_assertions::assert_eq;

    const JAN_1: i64 = 1_704_067_200_000;
    const JAN_2: i64 = 1_704_153_600_000;

    fn render(direction: JoinDirection, metric_columns: &[String]) -> String {
        let registry = SchemaRegistry::builtin();
        let cat = registry.entity(CAT).unwrap();
        let nav = cat.navigation("stats").unwrap();
        let target = registry.target_of(nav).unwrap();
        let predicate = Predicate::new("breed", CompareOp::Eq, "siamese");
        let entity_sort = SortKey {
            column: "name".into(),
            direction: SortDirection::Asc,
        };
        let metric_sort = SortKey {
            column: "heart_rate".into(),
            direction: SortDirection::Desc,
        };
        let columns = vec!["id".to_string(), "name".to_string()];

        let request = MetricsRequest {
            entity: cat,
            target,
            navigation: nav,
            entity_columns: &columns,
            predicate: Some(&predicate),
            entity_sort: Some(&entity_sort),
            metric_columns,
            metric_sort: Some(&metric_sort),
            stat_type: StatType::Avg,
            sampling_interval_secs: 60,
            window: TimeWindow::new(JAN_1, JAN_2),
            page: Page { offset: 0, limit: 10 },
            direction,
        };
        build_metrics_query(&request).render()
    }

    #[test]
    fn test_entity_driven() {
        let expected = r#"{
  cat(filter: {breed: {eq: "siamese"}}, order_by: {name: asc}, limit: 10, offset: 0) {
    id
    name
    cat_stats(left_column: "id", right_column: "cat_id", condition_operator: equal, join_type: left_outer_join, interval_start_ms: 1704067200000, interval_end_ms: 1704153600000, downsampling_interval_secs: 60) {
      cat_id
      heart_rate(sampling: AVG, timeseries: true)
      timestamp
    }
  }
}"#;
        assert_eq!(render(JoinDirection::EntityDriven, &["heart_rate".to_string()]), expected);
    }

    #[test]
    fn test_metrics_driven_moves_join_to_inner_block() {
        let expected = r#"{
  cat_stats(interval_start_ms: 1704067200000, interval_end_ms: 1704153600000, downsampling_interval_secs: 60, order_by: {heart_rate: desc}, limit: 10, offset: 0) {
    cat_id
    heart_rate(sampling: AVG, timeseries: true)
    timestamp
    cat(left_column: "cat_id", right_column: "id", condition_operator: equal, join_type: left_outer_join, filter: {breed: {eq: "siamese"}}) {
      id
      name
    }
  }
}"#;
        assert_eq!(render(JoinDirection::MetricsDriven, &["heart_rate".to_string()]), expected);
    }

    #[test]
    fn test_join_key_always_selected() {
        let registry = SchemaRegistry::builtin();
        let cat = registry.entity(CAT).unwrap();
        let nav = cat.navigation("stats").unwrap();
        let target = registry.target_of(nav).unwrap();
        let metric_columns = vec!["activity_level".to_string(), "cat_id".to_string()];
        let request = MetricsRequest {
            entity: cat,
            target,
            navigation: nav,
            entity_columns: &[],
            predicate: None,
            entity_sort: None,
            metric_columns: &metric_columns,
            metric_sort: None,
            stat_type: StatType::Max,
            sampling_interval_secs: 300,
            window: TimeWindow::new(JAN_1, JAN_2),
            page: Page { offset: 20, limit: 10 },
            direction: JoinDirection::EntityDriven,
        };
        let query = build_metrics_query(&request);
        let stats = query.root.nested().unwrap();
        assert_eq!(stats.columns().collect::<Vec<_>>(), vec!["cat_id", "timestamp"]);
        assert_eq!(
            stats.metrics().collect::<Vec<_>>(),
            vec![("activity_level", StatType::Max)]
        );
        assert_eq!(query.root.arg("offset"), Some(&ArgValue::Int(20)));
        assert!(!query.root.has_arg("filter"));
    }
}
