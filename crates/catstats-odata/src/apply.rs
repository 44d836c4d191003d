//! `$apply=groupby((f1,f2),aggregate(f with op as alias,...))`

use catstats_core::{AggregateOp, EntityBinding};

use crate::error::{ParseError, ParseResult};
use crate::lexer::{is_balanced, split_top_level};

/// One requested aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub field: String,
    pub op: AggregateOp,
    pub alias: String,
}

/// Parsed and validated `$apply`
#[derive(Debug, Clone, PartialEq)]
pub struct Apply {
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

fn syntax(reason: impl Into<String>) -> ParseError {
    ParseError::InvalidApplySyntax(reason.into())
}

/// Strip `name(` ... `)` around a call, case-insensitively
fn call_body<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    let input = input.trim();
    let open = input.find('(')?;
    if !input[..open].trim().eq_ignore_ascii_case(name) || !input.ends_with(')') {
        return None;
    }
    Some(&input[open + 1..input.len() - 1])
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn parse_apply(input: &str, entity: &EntityBinding) -> ParseResult<Apply> {
    if !is_balanced(input) {
        return Err(syntax("unbalanced parentheses"));
    }
    let body = call_body(input, "groupby").ok_or_else(|| syntax("expected groupby(...)"))?;

    let parts = split_top_level(body, &[',']);
    let [keys, aggregate] = parts.as_slice() else {
        return Err(syntax("expected groupby((fields),aggregate(...))"));
    };

    let keys = keys
        .strip_prefix('(')
        .and_then(|k| k.strip_suffix(')'))
        .ok_or_else(|| syntax("group-by fields must be parenthesised"))?;
    let mut group_by = Vec::new();
    for name in keys.split(',').map(str::trim) {
        if name.is_empty() {
            return Err(syntax("empty group-by field"));
        }
        let field = entity
            .field(name)
            .ok_or_else(|| ParseError::unknown_field(&entity.name, name))?;
        if !field.groupable {
            return Err(ParseError::NotGroupable(name.to_string()));
        }
        if !group_by.iter().any(|g| g == name) {
            group_by.push(name.to_string());
        }
    }

    let aggregate_body =
        call_body(aggregate, "aggregate").ok_or_else(|| syntax("expected aggregate(...)"))?;
    let mut aggregates: Vec<Aggregate> = Vec::new();
    for spec in aggregate_body.split(',') {
        let words: Vec<&str> = spec.split_whitespace().collect();
        let [field, with, op, as_kw, alias] = words.as_slice() else {
            return Err(syntax(format!(
                "expected 'field with op as alias', got '{}'",
                spec.trim()
            )));
        };
        if !with.eq_ignore_ascii_case("with") || !as_kw.eq_ignore_ascii_case("as") {
            return Err(syntax(format!(
                "expected 'field with op as alias', got '{}'",
                spec.trim()
            )));
        }
        let binding = entity
            .field(field)
            .ok_or_else(|| ParseError::unknown_field(&entity.name, field))?;
        let op = AggregateOp::parse(op).ok_or_else(|| syntax(format!("unknown operator {}", op)))?;
        if op.requires_numeric() && !binding.field_type.is_numeric() {
            return Err(ParseError::NotAggregatable {
                field: field.to_string(),
                op: op.to_string(),
            });
        }
        if !is_identifier(alias) {
            return Err(syntax(format!("invalid alias {}", alias)));
        }
        if aggregates.iter().any(|a| a.alias == *alias) || group_by.iter().any(|g| g == alias) {
            return Err(syntax(format!("duplicate alias {}", alias)));
        }
        aggregates.push(Aggregate {
            field: field.to_string(),
            op,
            alias: alias.to_string(),
        });
    }

    Ok(Apply {
        group_by,
        aggregates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catstats_core::catalog::ITEM;
    use catstats_core::SchemaRegistry;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn parse(input: &str) -> ParseResult<Apply> {
        let registry = SchemaRegistry::builtin();
        parse_apply(input, registry.entity(ITEM).unwrap())
    }

    #[test]
    fn test_group_by_with_average() {
        let apply = parse("groupby((itemType),aggregate(price with average as avgPrice))").unwrap();
        assert_eq!(
            apply,
            Apply {
                group_by: vec!["itemType".into()],
                aggregates: vec![Aggregate {
                    field: "price".into(),
                    op: AggregateOp::Average,
                    alias: "avgPrice".into(),
                }],
            }
        );
    }

    #[test]
    fn test_multiple_keys_and_aggregates() {
        let apply = parse(
            "groupby((itemType, inStock), aggregate(price with max as top, id with count as n))",
        )
        .unwrap();
        assert_eq!(apply.group_by, vec!["itemType", "inStock"]);
        assert_eq!(apply.aggregates.len(), 2);
        assert_eq!(apply.aggregates[1].op, AggregateOp::Count);
    }

    #[rstest]
    #[case("groupby(itemType)")]
    #[case("groupby((itemType))")]
    #[case("groupby((itemType),aggregate(price avg as a))")]
    #[case("groupby((itemType),aggregate(price with median as a))")]
    #[case("groupby((itemType),aggregate(price with sum as a, quantity with sum as a))")]
    #[case("groupby((itemType),aggregate(price with sum as 1a))")]
    #[case("groupby((itemType),aggregate(price with sum as itemType))")]
    #[case("filter(price gt 1)")]
    #[case("groupby((itemType),aggregate(price with sum as a)")]
    #[case("groupby((),aggregate(price with sum as a))")]
    fn test_invalid_syntax(#[case] input: &str) {
        assert!(matches!(parse(input), Err(ParseError::InvalidApplySyntax(_))));
    }

    #[test]
    fn test_field_capabilities() {
        assert_eq!(
            parse("groupby((price),aggregate(id with count as n))"),
            Err(ParseError::NotGroupable("price".into()))
        );
        assert!(matches!(
            parse("groupby((itemType),aggregate(name with sum as s))"),
            Err(ParseError::NotAggregatable { .. })
        ));
        assert!(matches!(
            parse("groupby((colour),aggregate(id with count as n))"),
            Err(ParseError::UnknownField { .. })
        ));
    }
}
