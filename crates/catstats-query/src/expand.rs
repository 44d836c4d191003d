//! Expand options bound to their navigation target

use catstats_core::{EntityBinding, NavigationBinding, SchemaRegistry, SortDirection};
use catstats_odata::{bind_comparison, Comparison, ExpandItem, ExpandOptions, ParseError};

use crate::error::PlanError;

/// Nested sort of an expanded collection
#[derive(Debug, Clone, PartialEq)]
pub struct NestedSort {
    pub field: String,
    pub direction: SortDirection,
}

/// One expand, validated against the navigation target
///
/// Nested options are applied in memory after the join, in the order
/// filter, orderby, page/limit, select.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpand {
    pub navigation: String,
    /// Target entity type
    pub target: String,
    pub collection: bool,
    pub metrics: bool,
    /// Logical join field on the parent
    pub left_key: String,
    /// Logical join field on the target
    pub right_key: String,
    pub filter: Option<Comparison>,
    pub select: Vec<String>,
    pub order_by: Option<NestedSort>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

impl BoundExpand {
    /// Expand with no nested options
    pub fn plain(nav: &NavigationBinding) -> Self {
        Self {
            navigation: nav.name.clone(),
            target: nav.target.clone(),
            collection: nav.collection,
            metrics: nav.is_metrics(),
            left_key: nav.left_key.clone(),
            right_key: nav.right_key.clone(),
            filter: None,
            select: Vec::new(),
            order_by: None,
            limit: None,
            page: None,
        }
    }

    /// Rows to skip before `limit` applies (`page` is 1-based)
    pub fn skip(&self) -> usize {
        match (self.page, self.limit) {
            (Some(page), Some(limit)) => page.saturating_sub(1) as usize * limit as usize,
            _ => 0,
        }
    }
}

fn unknown_field(entity: &EntityBinding, field: &str) -> PlanError {
    PlanError::Parse(ParseError::UnknownField {
        entity: entity.name.clone(),
        field: field.to_string(),
    })
}

/// Bind an expand item to its navigation
pub fn bind_expand(
    item: &ExpandItem,
    entity: &EntityBinding,
    registry: &SchemaRegistry,
) -> Result<BoundExpand, PlanError> {
    let unknown_navigation = || {
        PlanError::Parse(ParseError::UnknownNavigation {
            entity: entity.name.clone(),
            navigation: item.navigation.clone(),
        })
    };
    let nav = entity
        .navigation(&item.navigation)
        .ok_or_else(unknown_navigation)?;
    let target = registry.target_of(nav).ok_or_else(unknown_navigation)?;

    let mut bound = BoundExpand::plain(nav);
    bind_options(&mut bound, &item.options, target)?;
    Ok(bound)
}

fn bind_options(
    bound: &mut BoundExpand,
    options: &ExpandOptions,
    target: &EntityBinding,
) -> Result<(), PlanError> {
    if let Some(raw) = &options.filter {
        bound.filter = Some(bind_comparison(raw, target)?);
    }

    if let Some(select) = &options.select {
        for field in select {
            if target.field(field).is_none() {
                return Err(unknown_field(target, field));
            }
        }
        bound.select = select.clone();
    }

    if let Some(order) = &options.order_by {
        let field = target
            .field(&order.field)
            .ok_or_else(|| unknown_field(target, &order.field))?;
        if !field.sortable {
            return Err(ParseError::NotSortable(order.field.clone()).into());
        }
        bound.order_by = Some(NestedSort {
            field: order.field.clone(),
            direction: order.direction,
        });
    }

    bound.limit = options.limit;
    bound.page = options.page;
    Ok(())
}

/// Metrics-expand parameters as the planner resolved them
#[derive(Debug, Clone, PartialEq)]
pub struct StatsExpandParams {
    /// Navigation being expanded
    pub expansion_key: String,
    pub options: ExpandOptions,
    pub is_query_flipped: bool,
    /// Sort clause that caused the flip, as written
    pub flipped_order_by_raw: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::{CAT, ITEM};
    use catstats_odata::parse_expand_item;

    fn bind(entity: &str, segment: &str) -> Result<BoundExpand, PlanError> {
        let registry = SchemaRegistry::builtin();
        let item = parse_expand_item(segment).unwrap();
        bind_expand(&item, registry.entity(entity).unwrap(), &registry)
    }

    #[test]
    fn test_bind_nested_options() {
        let bound = bind(
            ITEM,
            "associations($filter=weight gt 0.5;$orderby=weight desc;$select=targetId;$limit=2;$page=2)",
        )
        .unwrap();
        assert_eq!(bound.target, "Association");
        assert!(bound.collection && !bound.metrics);
        assert_eq!(bound.filter.as_ref().unwrap().column, "weight");
        assert_eq!(
            bound.order_by,
            Some(NestedSort {
                field: "weight".into(),
                direction: SortDirection::Desc
            })
        );
        assert_eq!(bound.select, vec!["targetId"]);
        assert_eq!(bound.skip(), 2);
    }

    #[test]
    fn test_bind_metric_field_sort() {
        let bound = bind(CAT, "stats($orderby=stats/heartRate desc)").unwrap();
        assert!(bound.metrics);
        assert_eq!(bound.order_by.unwrap().field, "heartRate");
    }

    #[test]
    fn test_bind_errors() {
        assert!(matches!(
            bind(CAT, "stats($select=pulse)"),
            Err(PlanError::Parse(ParseError::UnknownField { .. }))
        ));
        assert!(matches!(
            bind(CAT, "stats($filter=heartRate eq 'fast')"),
            Err(PlanError::Parse(ParseError::InvalidLiteral { .. }))
        ));
        assert!(matches!(
            bind(CAT, "owner($orderby=email)"),
            Err(PlanError::Parse(ParseError::NotSortable(_)))
        ));
        assert!(matches!(
            bind(CAT, "toys"),
            Err(PlanError::Parse(ParseError::UnknownNavigation { .. }))
        ));
    }
}
