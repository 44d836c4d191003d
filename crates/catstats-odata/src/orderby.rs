//! `$orderby` - a single `field [asc|desc]` or `navigation/field [asc|desc]`

use catstats_core::{EntityBinding, SchemaRegistry, SortDirection};

use crate::error::{ParseError, ParseResult};
use crate::lexer::{tokenize, Token};

/// Validated sort clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Navigation the field lives under, for `navigation/field`
    pub navigation: Option<String>,
    /// Logical field name (on the navigation target when `navigation` is set)
    pub field: String,
    pub direction: SortDirection,
    /// Clause as written by the caller
    pub raw: String,
}

impl OrderBy {
    pub fn is_navigation(&self) -> bool {
        self.navigation.is_some()
    }
}

/// Path and direction of a sort clause, before schema validation
#[derive(Debug, Clone, PartialEq)]
pub struct SortClause {
    pub navigation: Option<String>,
    pub field: String,
    pub direction: SortDirection,
}

/// Split `path [asc|desc]` into its parts. Errors carry a reason.
pub fn parse_sort_clause(input: &str) -> Result<SortClause, String> {
    let tokens = tokenize(input)?;
    let (path, direction) = match tokens.as_slice() {
        [path @ .., Token::Ident(dir)] if SortDirection::parse(dir).is_some() && !path.is_empty() => {
            (path, SortDirection::parse(dir).unwrap_or_default())
        }
        path => (path, SortDirection::Asc),
    };

    match path {
        [Token::Ident(field)] => Ok(SortClause {
            navigation: None,
            field: field.clone(),
            direction,
        }),
        [Token::Ident(nav), Token::Slash, Token::Ident(field)] => Ok(SortClause {
            navigation: Some(nav.clone()),
            field: field.clone(),
            direction,
        }),
        [] => Err("empty sort clause".to_string()),
        _ => Err(format!("expected 'field [asc|desc]', got '{}'", input.trim())),
    }
}

/// Parse and validate `$orderby` for an entity
pub fn parse_orderby(
    input: &str,
    entity: &EntityBinding,
    registry: &SchemaRegistry,
) -> ParseResult<OrderBy> {
    let clause = parse_sort_clause(input).map_err(ParseError::InvalidOrderBySyntax)?;

    let target = match &clause.navigation {
        None => entity,
        Some(nav_name) => {
            let nav = entity
                .navigation(nav_name)
                .ok_or_else(|| ParseError::UnknownNavigation {
                    entity: entity.name.clone(),
                    navigation: nav_name.clone(),
                })?;
            registry.target_of(nav).ok_or_else(|| ParseError::UnknownNavigation {
                entity: entity.name.clone(),
                navigation: nav_name.clone(),
            })?
        }
    };

    let field = target
        .field(&clause.field)
        .ok_or_else(|| ParseError::unknown_field(&target.name, &clause.field))?;
    if !field.sortable {
        return Err(ParseError::NotSortable(clause.field));
    }

    Ok(OrderBy {
        navigation: clause.navigation,
        field: clause.field,
        direction: clause.direction,
        raw: input.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::CAT;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn parse(input: &str) -> ParseResult<OrderBy> {
        let registry = SchemaRegistry::builtin();
        let cat = registry.entity(CAT).unwrap();
        parse_orderby(input, cat, &registry)
    }

    #[rstest]
    #[case("name", SortDirection::Asc)]
    #[case("name asc", SortDirection::Asc)]
    #[case("name desc", SortDirection::Desc)]
    #[case("  age   DESC ", SortDirection::Desc)]
    fn test_plain_field(#[case] input: &str, #[case] direction: SortDirection) {
        let order = parse(input).unwrap();
        assert!(!order.is_navigation());
        assert_eq!(order.direction, direction);
    }

    #[test]
    fn test_navigation_field_keeps_raw_text() {
        let order = parse("stats/heartRate desc").unwrap();
        assert_eq!(
            order,
            OrderBy {
                navigation: Some("stats".into()),
                field: "heartRate".into(),
                direction: SortDirection::Desc,
                raw: "stats/heartRate desc".into(),
            }
        );
    }

    #[test]
    fn test_field_named_like_direction() {
        let clause = parse_sort_clause("desc").unwrap();
        assert_eq!(clause.field, "desc");
        assert_eq!(clause.direction, SortDirection::Asc);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse("colour"), Err(ParseError::UnknownField { .. })));
        assert!(matches!(parse("ownerId"), Err(ParseError::NotSortable(_))));
        assert!(matches!(
            parse("toys/name"),
            Err(ParseError::UnknownNavigation { .. })
        ));
        assert!(matches!(
            parse("stats/pulse"),
            Err(ParseError::UnknownField { .. })
        ));
        assert!(matches!(
            parse("name, age"),
            Err(ParseError::InvalidOrderBySyntax(_))
        ));
        assert!(matches!(
            parse("name sideways"),
            Err(ParseError::InvalidOrderBySyntax(_))
        ));
        assert!(matches!(parse(""), Err(ParseError::InvalidOrderBySyntax(_))));
    }
}
