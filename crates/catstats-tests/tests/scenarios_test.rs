//! Request-to-result scenarios over the in-memory backends
//!
//! Each test starts from a raw query string and checks both the plan the
//! gateway derived and the records it returned.

use catstats_core::catalog::{CAT, ITEM};
use catstats_core::{ArgValue, CompareOp, Entity, QueryParams, StatType, Value};
use catstats_gateway::{ExecutionPath, GatewayError};
use catstats_odata::{parse_expand_item, parse_query_string, ParseError};
use catstats_query::JoinDirection;
use catstats_tests::{ids, now, TestGateway, T0};
use pretty_assertions::assert_eq;
use rstest::rstest;

const DAY_MS: i64 = 86_400_000;

fn series(record: &Entity, navigation: &str, field: &str) -> Vec<f64> {
    record
        .expansion(navigation)
        .map(|e| e.records())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| s.value(field).as_f64())
        .collect()
}

fn record<'a>(records: &'a [Entity], id: &str) -> &'a Entity {
    records
        .iter()
        .find(|r| r.value("id").as_str() == Some(id))
        .unwrap_or_else(|| panic!("record {} missing", id))
}

// =============================================================================
// Scenario A: filter and paging go to the primary store
// =============================================================================

#[tokio::test]
async fn test_filter_and_page_on_primary_store() {
    let harness = TestGateway::new();
    let query = "$filter=itemType eq 'TYPE1'&$page=1&$limit=10";

    let params = parse_query_string(query).unwrap();
    let plan = harness.gateway.plan(ITEM, &params, now()).unwrap();
    let predicate = plan.primary.predicate.as_ref().unwrap();
    assert_eq!(predicate.column, "item_type");
    assert_eq!(predicate.op, CompareOp::Eq);
    assert_eq!(predicate.value, Value::from("TYPE1"));
    assert_eq!(plan.primary.offset, 0);
    assert_eq!(plan.primary.limit, 10);

    let output = harness.list(ITEM, query).await.unwrap();
    assert_eq!(output.path, ExecutionPath::PrimaryOnly);
    let mut found = ids(&output);
    found.sort();
    assert_eq!(found, vec!["i1", "i3"]);
    assert_eq!(output.total, Some(2));
    assert!(harness.metrics.queries().is_empty());
}

#[rstest]
#[case("$orderby=price asc&$page=1&$limit=2", vec!["i3", "i1"])]
#[case("$orderby=price asc&$page=2&$limit=1", vec!["i1"])]
#[case("$orderby=price asc&$page=0&$limit=1", vec!["i3"])]
#[case("$orderby=price desc&$page=4&$limit=1", vec![])]
#[tokio::test]
async fn test_paging(#[case] query: &str, #[case] expected: Vec<&str>) {
    let harness = TestGateway::new();
    let output = harness.list(ITEM, query).await.unwrap();
    assert_eq!(ids(&output), expected);
}

// =============================================================================
// Scenario B: expand options set the metrics window and sampling
// =============================================================================

#[tokio::test]
async fn test_expand_window_reaches_metrics_query() {
    let expand = "stats($startTime=2024-01-01T00:00:00Z;$endTime=2024-01-02T00:00:00Z;$statType=AVG)";

    let item = parse_expand_item(expand).unwrap();
    assert_eq!(item.navigation, "stats");
    assert_eq!(item.options.start_time_ms, Some(T0));
    assert_eq!(item.options.end_time_ms, Some(T0 + DAY_MS));
    assert_eq!(item.options.stat_type, Some(StatType::Avg));

    let harness = TestGateway::new();
    let output = harness
        .list(ITEM, &format!("$expand={}&$orderby=name asc", expand))
        .await
        .unwrap();
    assert_eq!(output.path, ExecutionPath::Metrics);
    assert_eq!(ids(&output), vec!["i3", "i2", "i1"]);

    let sent = harness.metrics.last_query().unwrap();
    assert_eq!(sent.root.name, "item");
    let stats = sent.root.nested().unwrap();
    assert_eq!(stats.name, "item_stats");
    assert_eq!(stats.arg("interval_start_ms"), Some(&ArgValue::Int(T0)));
    assert_eq!(stats.arg("interval_end_ms"), Some(&ArgValue::Int(T0 + DAY_MS)));
    assert!(stats.metrics().all(|(_, sampling)| sampling == StatType::Avg));

    assert_eq!(series(record(&output.records, "i1"), "stats", "viewCount"), vec![100.0, 110.0]);
    assert_eq!(series(record(&output.records, "i2"), "stats", "viewCount"), vec![50.0]);
    assert!(series(record(&output.records, "i3"), "stats", "viewCount").is_empty());
    assert_eq!(harness.primary.queries(), 0);
}

#[tokio::test]
async fn test_window_excludes_older_samples() {
    let harness = TestGateway::new();
    let output = harness
        .list(
            CAT,
            "$filter=id eq 'c3'&$expand=stats($startTime=2024-01-01T00:01:00Z;$endTime=2024-01-01T01:00:00Z)",
        )
        .await
        .unwrap();

    assert_eq!(output.path, ExecutionPath::Metrics);
    assert_eq!(series(&output.records[0], "stats", "heartRate"), vec![110.0]);
}

// =============================================================================
// Scenario C: a metric sort flips the query
// =============================================================================

#[tokio::test]
async fn test_metric_sort_flips_query() {
    let harness = TestGateway::new();
    let query = "$orderby=stats/heartRate desc&$expand=stats";

    let params = parse_query_string(query).unwrap();
    let plan = harness.gateway.plan(CAT, &params, now()).unwrap();
    assert!(plan.is_flipped);
    assert_eq!(
        plan.metrics.as_ref().map(|m| m.direction),
        Some(JoinDirection::MetricsDriven)
    );

    let output = harness.list(CAT, query).await.unwrap();
    assert_eq!(output.path, ExecutionPath::Metrics);
    // average heart rate: c2 150, c1 125, c3 105
    assert_eq!(ids(&output), vec!["c2", "c1", "c3"]);
    assert_eq!(series(&output.records[1], "stats", "heartRate"), vec![120.0, 130.0]);

    let sent = harness.metrics.last_query().unwrap();
    assert_eq!(sent.root.name, "cat_stats");
    assert!(!sent.root.has_arg("left_column"));
    let inner = sent.root.nested().unwrap();
    assert_eq!(inner.name, "cat");
    assert_eq!(inner.arg("left_column"), Some(&ArgValue::Str("cat_id".into())));
    assert_eq!(inner.arg("right_column"), Some(&ArgValue::Str("id".into())));
}

#[tokio::test]
async fn test_flipped_query_pages_in_backend() {
    let harness = TestGateway::new();
    let output = harness
        .list(ITEM, "$orderby=stats/viewCount desc&$limit=2")
        .await
        .unwrap();

    assert_eq!(output.path, ExecutionPath::Metrics);
    assert_eq!(ids(&output), vec!["i1", "i2"]);
    assert_eq!(
        harness.metrics.last_query().unwrap().root.arg("limit"),
        Some(&ArgValue::Int(2))
    );
}

// =============================================================================
// Scenario D: grouping and aggregation
// =============================================================================

#[tokio::test]
async fn test_group_by_with_average() {
    let harness = TestGateway::new();
    let output = harness
        .list(ITEM, "$apply=groupby((itemType),aggregate(price with average as avgPrice))")
        .await
        .unwrap();

    assert_eq!(output.path, ExecutionPath::PrimaryOnly);
    assert!(output.records.is_empty());
    assert_eq!(output.groups.len(), 2);

    let type1 = &output.groups[0];
    assert_eq!(type1.keys["itemType"], Value::from("TYPE1"));
    assert_eq!(type1.aggregate("avgPrice"), Some(7.0));
    assert_eq!(type1.aggregates.len(), 1);

    let type2 = &output.groups[1];
    assert_eq!(type2.keys["itemType"], Value::from("TYPE2"));
    assert_eq!(type2.aggregate("avgPrice"), Some(20.0));
    assert!(harness.metrics.queries().is_empty());
}

#[tokio::test]
async fn test_group_by_multiple_aggregates() {
    let harness = TestGateway::new();
    let output = harness
        .list(
            CAT,
            "$apply=groupby((breed),aggregate(weight with max as heaviest, age with sum as years))",
        )
        .await
        .unwrap();

    let siamese = &output.groups[0];
    assert_eq!(siamese.keys["breed"], Value::from("siamese"));
    assert_eq!(siamese.aggregate("heaviest"), Some(6.0));
    assert_eq!(siamese.aggregate("years"), Some(10.0));
}

// =============================================================================
// Associations and projection
// =============================================================================

#[tokio::test]
async fn test_association_expand_with_projection() {
    let harness = TestGateway::new();
    let output = harness
        .list(ITEM, "$filter=id eq 'i1'&$select=name&$expand=associations")
        .await
        .unwrap();

    assert_eq!(output.path, ExecutionPath::PrimaryOnly);
    assert_eq!(output.records.len(), 1);
    let widget = &output.records[0];
    assert_eq!(widget.value("name"), &Value::from("Widget"));
    assert!(widget.get("price").is_none());

    let mut targets: Vec<String> = widget
        .expansion("associations")
        .unwrap()
        .records()
        .into_iter()
        .filter_map(|a| a.value("targetId").as_str().map(str::to_string))
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["i2", "i3"]);
    assert_eq!(harness.primary.related(), 1);
}

#[tokio::test]
async fn test_metrics_and_association_expands_together() {
    let harness = TestGateway::new();
    let output = harness
        .list(ITEM, "$filter=id eq 'i2'&$expand=stats,associations")
        .await
        .unwrap();

    assert_eq!(output.path, ExecutionPath::Metrics);
    let gadget = &output.records[0];
    assert_eq!(series(gadget, "stats", "viewCount"), vec![50.0]);
    assert_eq!(gadget.expansion("associations").map(|e| e.len()), Some(1));
}

#[tokio::test]
async fn test_builder_params_match_query_string() {
    let harness = TestGateway::new();

    let params = QueryParams::new()
        .with_filter("price gt 5")
        .with_order_by("price desc")
        .with_select("name")
        .with_expand("associations");
    let built = harness.gateway.list_at(ITEM, &params, now()).await.unwrap();
    let parsed = harness
        .list(ITEM, "$filter=price gt 5&$orderby=price desc&$select=name&$expand=associations")
        .await
        .unwrap();
    assert_eq!(built, parsed);
    assert_eq!(built.records.len(), 2);

    let grouped = QueryParams::new().with_apply("groupby((inStock),aggregate(quantity with sum as units))");
    let output = harness.gateway.list_at(ITEM, &grouped, now()).await.unwrap();
    assert_eq!(output.groups.len(), 2);
}

// =============================================================================
// Client errors
// =============================================================================

#[rstest]
#[case("Dog", "")]
#[case(ITEM, "$filter=colour eq 'red'")]
#[case(ITEM, "$expand=owner")]
#[case(CAT, "$apply=groupby((name),aggregate(age with sum as total))")]
#[tokio::test]
async fn test_invalid_requests_are_client_errors(#[case] entity: &str, #[case] query: &str) {
    let harness = TestGateway::new();
    let err = harness.list(entity, query).await.unwrap_err();

    assert!(err.is_client_error(), "{} {} gave {:?}", entity, query, err);
    assert_eq!(err.status_code(), 400);
    assert!(harness.metrics.queries().is_empty());
    assert_eq!(harness.primary.queries(), 0);
}

#[tokio::test]
async fn test_unknown_entity_error() {
    let harness = TestGateway::new();
    let err = harness.list("Dog", "").await.unwrap_err();
    assert!(matches!(err, GatewayError::Parse(ParseError::UnknownEntity(name)) if name == "Dog"));
}
