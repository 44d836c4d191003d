//! catstats-odata - OData query-string parsing
//!
//! Turns the raw `$filter`, `$orderby`, `$select`, `$expand` and `$apply`
//! strings of a request into a validated [`ParsedQuery`]. Every field name
//! is checked against the [`SchemaRegistry`] before any backend is touched,
//! so all failures here are client errors ([`ParseError`]).
//!
//! Options inside `$expand=navigation(...)` are parsed syntactically only;
//! the planner binds them to the navigation target.

pub mod apply;
pub mod error;
pub mod expand;
pub mod filter;
pub mod lexer;
pub mod orderby;
pub mod params;
pub mod select;
pub mod time;

pub use apply::{parse_apply, Aggregate, Apply};
pub use error::{ParseError, ParseResult};
pub use expand::{parse_expand, parse_expand_item, ExpandItem, ExpandOptions, ExpandOrderBy};
pub use filter::{bind_comparison, parse_comparison, parse_filter, Comparison, Literal, RawComparison};
pub use orderby::{parse_orderby, parse_sort_clause, OrderBy, SortClause};
pub use params::parse_query_string;
pub use select::parse_select;
pub use time::{parse_interval_secs, parse_timestamp};

use catstats_core::{QueryParams, SchemaRegistry};

/// Validated query for one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub entity_type: String,
    pub filter: Option<Comparison>,
    pub order_by: Option<OrderBy>,
    pub select: Vec<String>,
    pub expand: Vec<ExpandItem>,
    pub apply: Option<Apply>,
}

impl ParsedQuery {
    pub fn is_grouped(&self) -> bool {
        self.apply.is_some()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse and validate the query parameters of one request
pub fn parse(
    entity_type: &str,
    filter: Option<&str>,
    order_by: Option<&str>,
    select: Option<&str>,
    expand: Option<&str>,
    apply: Option<&str>,
    registry: &SchemaRegistry,
) -> ParseResult<ParsedQuery> {
    let entity = registry
        .entity(entity_type)
        .ok_or_else(|| ParseError::UnknownEntity(entity_type.to_string()))?;

    let filter = present(filter)
        .map(|f| parse_filter(f, entity))
        .transpose()?;
    let order_by = present(order_by)
        .map(|o| parse_orderby(o, entity, registry))
        .transpose()?;
    let select = present(select)
        .map(|s| parse_select(s, entity))
        .transpose()?
        .unwrap_or_default();
    let expand = present(expand)
        .map(parse_expand)
        .transpose()?
        .unwrap_or_default();
    for item in &expand {
        if entity.navigation(&item.navigation).is_none() {
            return Err(ParseError::UnknownNavigation {
                entity: entity.name.clone(),
                navigation: item.navigation.clone(),
            });
        }
    }
    let apply = present(apply)
        .map(|a| parse_apply(a, entity))
        .transpose()?;

    Ok(ParsedQuery {
        entity_type: entity.name.clone(),
        filter,
        order_by,
        select,
        expand,
        apply,
    })
}

/// [`parse`] over a [`QueryParams`]
pub fn parse_params(
    entity_type: &str,
    params: &QueryParams,
    registry: &SchemaRegistry,
) -> ParseResult<ParsedQuery> {
    parse(
        entity_type,
        params.filter.as_deref(),
        params.order_by.as_deref(),
        params.select.as_deref(),
        params.expand.as_deref(),
        params.apply.as_deref(),
        registry,
    )
}
