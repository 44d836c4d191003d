//! Primary-store query builder

use catstats_core::{
    AggregateKey, EntityBinding, Grouping, PrimaryQuery, SortKey,
};
use catstats_odata::{Apply, Comparison, OrderBy};
use serde::Serialize;

/// Pagination of one request, already clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub offset: u64,
    pub limit: u32,
}

/// Backend columns needed to answer a request.
///
/// The explicit `$select` (or every field when absent), plus the identity
/// and the join keys in `keys` so the merge step can always re-associate
/// rows. Order follows the entity's field order.
pub fn required_columns(entity: &EntityBinding, select: &[String], keys: &[&str]) -> Vec<String> {
    entity
        .fields
        .iter()
        .filter(|f| {
            select.is_empty()
                || select.iter().any(|s| *s == f.logical_name)
                || f.logical_name == entity.identity
                || keys.contains(&f.logical_name.as_str())
        })
        .map(|f| f.backend_column.clone())
        .collect()
}

/// Build the query for a list request
pub fn build_primary_query(
    entity: &EntityBinding,
    filter: Option<&Comparison>,
    order_by: Option<&OrderBy>,
    columns: Vec<String>,
    page: Page,
) -> PrimaryQuery {
    let sort = order_by
        .filter(|o| !o.is_navigation())
        .and_then(|o| {
            entity.column(&o.field).map(|column| SortKey {
                column: column.to_string(),
                direction: o.direction,
            })
        });

    PrimaryQuery {
        table: entity.table.clone(),
        predicate: filter.map(Comparison::to_predicate),
        sort,
        columns,
        offset: page.offset,
        limit: page.limit,
        grouping: None,
    }
}

/// Group-by key as logical field and backend column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupKeyBinding {
    pub field: String,
    pub column: String,
}

/// Requested aggregate, keyed by its typed store-side identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateBinding {
    pub alias: String,
    pub key: AggregateKey,
}

/// How grouped store results map back to the requested shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyPlan {
    pub group_by: Vec<GroupKeyBinding>,
    pub aggregates: Vec<AggregateBinding>,
}

impl ApplyPlan {
    /// Alias requested for a store aggregate, if any
    pub fn alias_for(&self, key: &AggregateKey) -> Option<&str> {
        self.aggregates
            .iter()
            .find(|a| a.key == *key)
            .map(|a| a.alias.as_str())
    }
}

/// Build the grouped query for `$apply` and its result mapping
pub fn build_grouped_query(
    entity: &EntityBinding,
    filter: Option<&Comparison>,
    apply: &Apply,
    page: Page,
) -> (PrimaryQuery, ApplyPlan) {
    let group_by: Vec<GroupKeyBinding> = apply
        .group_by
        .iter()
        .filter_map(|field| {
            entity.column(field).map(|column| GroupKeyBinding {
                field: field.clone(),
                column: column.to_string(),
            })
        })
        .collect();
    let aggregates: Vec<AggregateBinding> = apply
        .aggregates
        .iter()
        .filter_map(|agg| {
            entity.column(&agg.field).map(|column| AggregateBinding {
                alias: agg.alias.clone(),
                key: AggregateKey::new(column, agg.op),
            })
        })
        .collect();

    let mut aggregate_keys: Vec<AggregateKey> = Vec::new();
    for binding in &aggregates {
        if !aggregate_keys.contains(&binding.key) {
            aggregate_keys.push(binding.key.clone());
        }
    }

    let query = PrimaryQuery {
        table: entity.table.clone(),
        predicate: filter.map(Comparison::to_predicate),
        sort: None,
        columns: required_columns(entity, &[], &[]),
        offset: page.offset,
        limit: page.limit,
        grouping: Some(Grouping {
            columns: group_by.iter().map(|g| g.column.clone()).collect(),
            aggregates: aggregate_keys,
        }),
    };

    (
        query,
        ApplyPlan {
            group_by,
            aggregates,
        },
    )
}
