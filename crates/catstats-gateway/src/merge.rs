//! Result merging
//!
//! Everything here is pure and synchronous: backend rows in, canonical
//! records out. The executor decides which function runs on which path.

use std::collections::{BTreeSet, HashMap, HashSet};

use catstats_core::{
    AggregateResult, Entity, EntityBinding, Expansion, GroupResult, PrimaryResult, StoreRow, Value,
};
use catstats_query::{ApplyPlan, BoundExpand, PostSort};
use tracing::debug;

use crate::decode::columns_to_entity;

// =============================================================================
// Row mapping
// =============================================================================

/// Canonical records for primary-store rows.
///
/// Rows carrying metric series (fallback lookups of a metrics table) become
/// one record per distinct timestamp, with the row attributes repeated.
pub fn store_row_records(row: &StoreRow, binding: &EntityBinding) -> Vec<Entity> {
    let base = columns_to_entity(&row.attributes, binding);
    if row.metrics.is_empty() {
        return vec![base];
    }

    let timestamps: BTreeSet<i64> = row
        .metrics
        .values()
        .flatten()
        .map(|s| s.timestamp_ms)
        .collect();
    let timestamp_field = binding.timestamp_field.as_deref();

    timestamps
        .into_iter()
        .map(|ts| {
            let mut record = base.clone();
            if let Some(field) = timestamp_field {
                record.set(field, Value::Int64(ts));
            }
            for (column, samples) in &row.metrics {
                let Some(field) = binding.field_by_column(column) else {
                    continue;
                };
                let value = samples
                    .iter()
                    .find(|s| s.timestamp_ms == ts)
                    .map(|s| Value::Double(s.value))
                    .unwrap_or(Value::Null);
                record.set(field.logical_name.clone(), value);
            }
            record
        })
        .collect()
}

pub fn store_rows_to_entities(rows: &[StoreRow], binding: &EntityBinding) -> Vec<Entity> {
    rows.iter()
        .flat_map(|row| store_row_records(row, binding))
        .collect()
}

// =============================================================================
// Expansion
// =============================================================================

/// Distinct non-null join keys of the parents, in first-seen order
pub fn join_keys(parents: &[Entity], left_key: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    parents
        .iter()
        .map(|p| p.value(left_key))
        .filter(|v| !v.is_null() && seen.insert(v.key_string()))
        .cloned()
        .collect()
}

/// Nested `$filter`, `$orderby` and `$limit`/`$page` of one expand
pub fn apply_nested(mut records: Vec<Entity>, expand: &BoundExpand) -> Vec<Entity> {
    if let Some(filter) = &expand.filter {
        records.retain(|r| filter.matches(r));
    }
    if let Some(order) = &expand.order_by {
        records.sort_by(|a, b| {
            order
                .direction
                .apply(a.value(&order.field).sort_cmp(b.value(&order.field)))
        });
    }
    let skip = expand.skip();
    let take = expand.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    records.into_iter().skip(skip).take(take).collect()
}

fn expansion_of(records: Vec<Entity>, expand: &BoundExpand) -> Expansion {
    if expand.collection {
        Expansion::Many(records)
    } else {
        Expansion::One(records.into_iter().next().map(Box::new))
    }
}

/// Attach records already belonging to one parent
pub fn attach_records(parent: &mut Entity, records: Vec<Entity>, expand: &BoundExpand) {
    let expansion = expansion_of(apply_nested(records, expand), expand);
    parent.attach(expand.navigation.clone(), expansion);
}

/// Hash join of related records onto their parents (left outer).
///
/// Parents without matches get an empty collection or a null one-to-one.
pub fn attach_expansion(parents: &mut [Entity], related: Vec<Entity>, expand: &BoundExpand) {
    let mut by_key: HashMap<String, Vec<Entity>> = HashMap::new();
    for record in related {
        let key = record.value(&expand.right_key);
        if key.is_null() {
            continue;
        }
        by_key.entry(key.key_string()).or_default().push(record);
    }

    for parent in parents.iter_mut() {
        let key = parent.value(&expand.left_key);
        let matched = if key.is_null() {
            Vec::new()
        } else {
            by_key.get(&key.key_string()).cloned().unwrap_or_default()
        };
        attach_records(parent, matched, expand);
    }
}

/// Nested `$select` of every attached expansion
pub fn project_expansions(parents: &mut [Entity], expands: &[&BoundExpand]) {
    for expand in expands.iter().filter(|e| !e.select.is_empty()) {
        for parent in parents.iter_mut() {
            let Some(expansion) = parent.expanded.get_mut(&expand.navigation) else {
                continue;
            };
            match expansion {
                Expansion::Many(records) => {
                    records.iter_mut().for_each(|r| r.project(&expand.select))
                }
                Expansion::One(Some(record)) => record.project(&expand.select),
                Expansion::One(None) => {}
            }
        }
    }
}

// =============================================================================
// Post-sort
// =============================================================================

/// Sort value of one parent for an in-memory navigation sort.
///
/// Collections reduce their numeric values with the stat type; non-numeric
/// collections use the first non-null value.
pub fn post_sort_key(parent: &Entity, sort: &PostSort) -> Value {
    let Some(expansion) = parent.expansion(&sort.navigation) else {
        return Value::Null;
    };
    let values: Vec<&Value> = expansion
        .records()
        .into_iter()
        .map(|r| r.value(&sort.field))
        .filter(|v| !v.is_null())
        .collect();

    match expansion {
        Expansion::One(_) => values.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
        Expansion::Many(_) => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                return values.first().map(|v| (*v).clone()).unwrap_or(Value::Null);
            }
            sort.stat_type
                .reduce(&numbers)
                .map(Value::Double)
                .unwrap_or(Value::Null)
        }
    }
}

/// Sort parents by a navigation field, then apply the requested page
pub fn post_sort(parents: Vec<Entity>, sort: &PostSort) -> Vec<Entity> {
    let mut keyed: Vec<(Value, Entity)> = parents
        .into_iter()
        .map(|p| (post_sort_key(&p, sort), p))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| sort.direction.apply(a.sort_cmp(b)));

    let offset = usize::try_from(sort.page.offset).unwrap_or(usize::MAX);
    keyed
        .into_iter()
        .skip(offset)
        .take(sort.page.limit as usize)
        .map(|(_, p)| p)
        .collect()
}

// =============================================================================
// Grouping
// =============================================================================

/// Map store groups to requested group keys and aggregate aliases.
///
/// Store metrics nobody asked for (the per-group row count) are dropped.
pub fn group_results(result: PrimaryResult, plan: &ApplyPlan, binding: &EntityBinding) -> Vec<GroupResult> {
    result
        .groups
        .into_iter()
        .map(|group| {
            let keys = plan
                .group_by
                .iter()
                .map(|key| {
                    let value = group
                        .rows
                        .first()
                        .and_then(|row| row.get(&key.column))
                        .cloned()
                        .unwrap_or(Value::Null);
                    (key.field.clone(), value)
                })
                .collect();

            let aggregates = plan
                .aggregates
                .iter()
                .filter_map(|requested| {
                    group
                        .aggregates
                        .iter()
                        .find(|m| m.key.as_ref() == Some(&requested.key))
                        .map(|m| AggregateResult {
                            label: requested.alias.clone(),
                            value: m.value,
                        })
                })
                .collect();

            let dropped = group
                .aggregates
                .iter()
                .filter(|m| m.key.as_ref().and_then(|k| plan.alias_for(k)).is_none())
                .count();
            if dropped > 0 {
                debug!(dropped, "Dropped unrequested store aggregates");
            }

            GroupResult {
                keys,
                rows: store_rows_to_entities(&group.rows, binding),
                aggregates,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::{CAT, CAT_STATS, OWNER};
    use catstats_core::{
        AggregateKey, AggregateMetric, AggregateOp, Sample, SchemaRegistry, SortDirection,
        StatType, StoreGroup,
    };
    use catstats_odata::{bind_comparison, parse_comparison};
    use catstats_query::{AggregateBinding, GroupKeyBinding, NestedSort, Page};
    use pretty_assertions::assert_eq;

    fn binding(name: &str) -> EntityBinding {
        SchemaRegistry::builtin().entity(name).cloned().unwrap()
    }

    fn stats_expand() -> BoundExpand {
        let registry = SchemaRegistry::builtin();
        BoundExpand::plain(registry.entity(CAT).unwrap().navigation("stats").unwrap())
    }

    fn owner_expand() -> BoundExpand {
        let registry = SchemaRegistry::builtin();
        BoundExpand::plain(registry.entity(CAT).unwrap().navigation("owner").unwrap())
    }

    fn cat(id: &str, owner: Option<&str>) -> Entity {
        let mut cat = Entity::new(CAT).with("id", id);
        cat.set("ownerId", owner.map(Value::from).unwrap_or(Value::Null));
        cat
    }

    fn sample(cat_id: &str, ts: i64, heart_rate: f64) -> Entity {
        Entity::new(CAT_STATS)
            .with("catId", cat_id)
            .with("timestamp", ts)
            .with("heartRate", heart_rate)
    }

    #[test]
    fn test_fallback_rows_become_sample_records() {
        let row = StoreRow::new()
            .with("cat_id", "c1")
            .with_series("heart_rate", vec![Sample::new(2000, 121.0)])
            .with_series("body_temperature", vec![Sample::new(1000, 38.5), Sample::new(2000, 38.6)]);

        let records = store_row_records(&row, &binding(CAT_STATS));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value("catId"), &Value::from("c1"));
        assert_eq!(records[0].value("timestamp"), &Value::Int64(1000));
        assert_eq!(records[0].value("heartRate"), &Value::Null);
        assert_eq!(records[1].value("heartRate"), &Value::Double(121.0));
        assert_eq!(records[1].value("bodyTemperature"), &Value::Double(38.6));
    }

    #[test]
    fn test_plain_rows_map_to_logical_names() {
        let row = StoreRow::new()
            .with("id", "o1")
            .with("name", "Ann")
            .with("internal_flag", true);
        let records = store_row_records(&row, &binding(OWNER));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value("name"), &Value::from("Ann"));
        assert!(records[0].get("internal_flag").is_none());
    }

    #[test]
    fn test_join_keys_are_distinct() {
        let parents = vec![cat("c1", Some("o1")), cat("c2", Some("o1")), cat("c3", None)];
        assert_eq!(join_keys(&parents, "ownerId"), vec![Value::from("o1")]);
        assert_eq!(join_keys(&parents, "id").len(), 3);
    }

    #[test]
    fn test_attach_one_to_one() {
        let mut parents = vec![cat("c1", Some("o1")), cat("c2", Some("o1")), cat("c3", None)];
        let owners = vec![
            Entity::new(OWNER).with("id", "o1").with("name", "Ann"),
            Entity::new(OWNER).with("id", "o1").with("name", "Duplicate"),
        ];
        attach_expansion(&mut parents, owners, &owner_expand());

        for parent in &parents[..2] {
            let Some(Expansion::One(Some(owner))) = parent.expansion("owner") else {
                panic!("owner not attached");
            };
            assert_eq!(owner.value("name"), &Value::from("Ann"));
        }
        assert_eq!(parents[2].expansion("owner"), Some(&Expansion::One(None)));
    }

    #[test]
    fn test_attach_collection_left_outer() {
        let mut parents = vec![cat("c1", None), cat("c2", None)];
        let related = vec![sample("c1", 1000, 120.0), sample("c1", 2000, 125.0)];
        attach_expansion(&mut parents, related, &stats_expand());

        assert_eq!(parents[0].expansion("stats").unwrap().len(), 2);
        assert_eq!(parents[1].expansion("stats"), Some(&Expansion::Many(vec![])));
    }

    #[test]
    fn test_nested_options_order() {
        let target = binding(CAT_STATS);
        let mut expand = stats_expand();
        expand.filter =
            Some(bind_comparison(&parse_comparison("heartRate gt 100").unwrap(), &target).unwrap());
        expand.order_by = Some(NestedSort {
            field: "heartRate".into(),
            direction: SortDirection::Desc,
        });
        expand.limit = Some(2);
        expand.page = Some(2);
        expand.select = vec!["heartRate".into()];

        let records = vec![
            sample("c1", 1, 90.0),
            sample("c1", 2, 130.0),
            sample("c1", 3, 110.0),
            sample("c1", 4, 150.0),
            sample("c1", 5, 120.0),
        ];
        let mut parents = vec![cat("c1", None)];
        attach_records(&mut parents[0], records, &expand);
        project_expansions(&mut parents, &[&expand]);

        let Some(Expansion::Many(page)) = parents[0].expansion("stats") else {
            panic!("stats not attached");
        };
        // 150, 130 on page 1; 120, 110 on page 2
        let rates: Vec<&Value> = page.iter().map(|r| r.value("heartRate")).collect();
        assert_eq!(rates, vec![&Value::Double(120.0), &Value::Double(110.0)]);
        assert!(page.iter().all(|r| r.get("timestamp").is_none()));
    }

    fn sort(stat_type: StatType, direction: SortDirection, limit: u32) -> PostSort {
        PostSort {
            navigation: "stats".into(),
            field: "heartRate".into(),
            direction,
            stat_type,
            page: Page { offset: 0, limit },
        }
    }

    #[test]
    fn test_post_sort_reduces_collections() {
        let expand = stats_expand();
        let mut parents = vec![cat("c1", None), cat("c2", None), cat("c3", None)];
        attach_records(
            &mut parents[0],
            vec![sample("c1", 1, 100.0), sample("c1", 2, 140.0)],
            &expand,
        );
        attach_records(&mut parents[1], vec![sample("c2", 1, 130.0)], &expand);
        attach_records(&mut parents[2], vec![], &expand);

        let ids = |sorted: Vec<Entity>| -> Vec<Value> {
            sorted.iter().map(|p| p.value("id").clone()).collect()
        };

        let by_avg = post_sort(parents.clone(), &sort(StatType::Avg, SortDirection::Desc, 10));
        assert_eq!(ids(by_avg), vec![Value::from("c2"), Value::from("c1"), Value::from("c3")]);

        let by_max = post_sort(parents.clone(), &sort(StatType::Max, SortDirection::Desc, 10));
        assert_eq!(ids(by_max), vec![Value::from("c1"), Value::from("c2"), Value::from("c3")]);

        // Nulls first ascending
        let asc = post_sort(parents, &sort(StatType::Avg, SortDirection::Asc, 2));
        assert_eq!(ids(asc), vec![Value::from("c3"), Value::from("c1")]);
    }

    #[test]
    fn test_post_sort_one_to_one() {
        let expand = owner_expand();
        let mut parents = vec![cat("c1", Some("o2")), cat("c2", Some("o1"))];
        let owners = vec![
            Entity::new(OWNER).with("id", "o1").with("name", "Ann"),
            Entity::new(OWNER).with("id", "o2").with("name", "Bob"),
        ];
        attach_expansion(&mut parents, owners, &expand);

        let sorted = post_sort(
            parents,
            &PostSort {
                navigation: "owner".into(),
                field: "name".into(),
                direction: SortDirection::Asc,
                stat_type: StatType::Avg,
                page: Page { offset: 1, limit: 5 },
            },
        );
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].value("id"), &Value::from("c1"));
    }

    #[test]
    fn test_group_results_use_aliases() {
        let key = AggregateKey::new("weight", AggregateOp::Average);
        let plan = ApplyPlan {
            group_by: vec![GroupKeyBinding {
                field: "breed".into(),
                column: "breed".into(),
            }],
            aggregates: vec![AggregateBinding {
                alias: "avgWeight".into(),
                key: key.clone(),
            }],
        };
        let result = PrimaryResult {
            rows: vec![],
            groups: vec![StoreGroup {
                rows: vec![StoreRow::new().with("breed", "siamese").with("weight", 4.0)],
                aggregates: vec![
                    AggregateMetric {
                        name: "count".into(),
                        key: None,
                        value: 1.0,
                    },
                    AggregateMetric {
                        name: key.to_string(),
                        key: Some(key),
                        value: 4.0,
                    },
                ],
            }],
            total: Some(1),
        };

        let groups = group_results(result, &plan, &binding(CAT));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keys.get("breed"), Some(&Value::from("siamese")));
        assert_eq!(
            groups[0].aggregates,
            vec![AggregateResult {
                label: "avgWeight".into(),
                value: 4.0
            }]
        );
        assert_eq!(groups[0].rows[0].value("weight"), &Value::Double(4.0));
    }
}
