//! Raw query-string splitting into [`QueryParams`]

use catstats_core::QueryParams;
use tracing::debug;

use crate::error::{ParseError, ParseResult};
use crate::lexer::split_top_level;

fn parse_int(name: &str, value: &str) -> ParseResult<i64> {
    value.trim().parse().map_err(|_| ParseError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Split `$filter=...&$expand=stats(a=1&b=2)&$limit=10` into parameters.
///
/// `&` only separates parameters outside parentheses and quotes. Keys are
/// case-insensitive and the `$` prefix is optional; `top` is accepted as an
/// alias of `limit`.
pub fn parse_query_string(input: &str) -> ParseResult<QueryParams> {
    let input = input.trim().trim_start_matches('?');
    let mut params = QueryParams::new();

    for pair in split_top_level(input, &['&']) {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = key.trim().trim_start_matches('$').to_ascii_lowercase();

        match name.as_str() {
            "page" => params.page = parse_int(key, value)?,
            "limit" | "top" => params.limit = parse_int(key, value)?,
            "filter" => params.filter = non_empty(value),
            "orderby" => params.order_by = non_empty(value),
            "select" => params.select = non_empty(value),
            "expand" => params.expand = non_empty(value),
            "apply" => params.apply = non_empty(value),
            _ => debug!(parameter = %key, "Ignoring unknown query parameter"),
        }
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scenario_a_parameters() {
        let params = parse_query_string("$filter=itemType eq 'TYPE1'&$page=1&$limit=10").unwrap();
        assert_eq!(params.filter.as_deref(), Some("itemType eq 'TYPE1'"));
        assert_eq!(params.page, 1);
        assert_eq!(params.limit, 10);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn test_ampersand_inside_expand_options() {
        let params =
            parse_query_string("?$expand=stats($statType=MAX&$limit=3)&$orderby=name desc")
                .unwrap();
        assert_eq!(params.expand.as_deref(), Some("stats($statType=MAX&$limit=3)"));
        assert_eq!(params.order_by.as_deref(), Some("name desc"));
    }

    #[test]
    fn test_aliases_and_unknown_keys() {
        let params = parse_query_string("top=5&Select=name&format=json&&apply=").unwrap();
        assert_eq!(params.limit, 5);
        assert_eq!(params.select.as_deref(), Some("name"));
        assert_eq!(params.apply, None);
    }

    #[test]
    fn test_invalid_integer() {
        assert_eq!(
            parse_query_string("$limit=ten"),
            Err(ParseError::InvalidParameter {
                name: "$limit".into(),
                value: "ten".into()
            })
        );
    }
}
