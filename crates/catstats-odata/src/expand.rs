//! `$expand` and the option mini-language inside `navigation(...)`
//!
//! ```text
//! stats($filter=heartRate gt 100;$select=heartRate;$orderby=stats/heartRate desc;
//!       $startTime=2024-01-01T00:00:00Z;$endTime=2024-01-02;$statType=max;
//!       $samplingInterval=5m;$limit=10)
//! ```
//!
//! Options are separated by `;` or `&`, keys are case-insensitive and the
//! `$` prefix is optional. The parser is schema-free: field names are only
//! checked when the planner binds the options to the navigation target.
//! Missing options stay `None`; defaults are the planner's business.

use catstats_core::{SortDirection, StatType};
use tracing::warn;

use crate::error::{ParseError, ParseResult};
use crate::filter::{parse_comparison, RawComparison};
use crate::lexer::{is_balanced, split_top_level};
use crate::orderby::parse_sort_clause;
use crate::time::{parse_interval_secs, parse_timestamp};

/// Sort clause inside an expand
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandOrderBy {
    /// Field on the navigation target, without any `navigation/` prefix
    pub field: String,
    pub direction: SortDirection,
    /// Written as `<navigation>/field`; requests a flipped query
    pub is_metric_field: bool,
    pub raw: String,
}

/// Options of one expand segment. Every option is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandOptions {
    pub filter: Option<RawComparison>,
    pub select: Option<Vec<String>>,
    pub order_by: Option<ExpandOrderBy>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,
    pub stat_type: Option<StatType>,
    pub sampling_interval_secs: Option<u32>,
    /// `statType` value that was not recognised and therefore ignored
    pub rejected_stat_type: Option<String>,
}

impl ExpandOptions {
    pub fn has_time_range(&self) -> bool {
        self.start_time_ms.is_some() || self.end_time_ms.is_some()
    }
}

/// One `$expand` segment
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandItem {
    pub navigation: String,
    pub options: ExpandOptions,
}

fn is_navigation_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_count(key: &str, value: &str) -> ParseResult<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ParseError::expand_option(key, format!("'{}' is not a non-negative integer", value)))
}

/// Parse one segment: `navigation` or `navigation(opt=val;...)`
pub fn parse_expand_item(segment: &str) -> ParseResult<ExpandItem> {
    let segment = segment.trim();
    if !is_balanced(segment) {
        return Err(ParseError::InvalidExpandSyntax(format!(
            "unbalanced parentheses in '{}'",
            segment
        )));
    }

    let (navigation, body) = match segment.find('(') {
        None => (segment, None),
        Some(open) => {
            let Some(body) = segment[open + 1..].strip_suffix(')') else {
                return Err(ParseError::InvalidExpandSyntax(format!(
                    "trailing text after options in '{}'",
                    segment
                )));
            };
            (segment[..open].trim(), Some(body))
        }
    };

    if !is_navigation_name(navigation) {
        return Err(ParseError::InvalidExpandSyntax(format!(
            "invalid navigation name '{}'",
            navigation
        )));
    }

    let options = match body {
        Some(body) => parse_options(navigation, body)?,
        None => ExpandOptions::default(),
    };

    Ok(ExpandItem {
        navigation: navigation.to_string(),
        options,
    })
}

fn parse_options(navigation: &str, body: &str) -> ParseResult<ExpandOptions> {
    let mut options = ExpandOptions::default();

    for option in split_top_level(body, &[';', '&']) {
        if option.is_empty() {
            continue;
        }
        let (key, value) = option.split_once('=').ok_or_else(|| {
            ParseError::InvalidExpandSyntax(format!("option '{}' has no value", option))
        })?;
        let key = key.trim();
        let value = value.trim();
        let name = key.trim_start_matches('$').to_ascii_lowercase();

        match name.as_str() {
            "filter" => options.filter = Some(parse_comparison(value)?),
            "select" => {
                let fields: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect();
                options.select = Some(fields);
            }
            "orderby" => {
                let clause = parse_sort_clause(value)
                    .map_err(|reason| ParseError::expand_option(key, reason))?;
                let is_metric_field = match &clause.navigation {
                    None => false,
                    Some(nav) if nav == navigation => true,
                    Some(nav) => {
                        return Err(ParseError::expand_option(
                            key,
                            format!("'{}' does not belong to navigation {}", nav, navigation),
                        ))
                    }
                };
                options.order_by = Some(ExpandOrderBy {
                    field: clause.field,
                    direction: clause.direction,
                    is_metric_field,
                    raw: value.to_string(),
                });
            }
            "limit" => options.limit = Some(parse_count(key, value)?),
            "page" => options.page = Some(parse_count(key, value)?),
            "starttime" => options.start_time_ms = Some(parse_timestamp(value)?),
            "endtime" => options.end_time_ms = Some(parse_timestamp(value)?),
            "stattype" => match StatType::parse(value) {
                Some(stat) => {
                    options.stat_type = Some(stat);
                    options.rejected_stat_type = None;
                }
                None => {
                    warn!(navigation = %navigation, stat_type = %value, "Ignoring unknown statType");
                    options.rejected_stat_type = Some(value.to_string());
                }
            },
            "samplinginterval" => {
                let secs = parse_interval_secs(value).ok_or_else(|| {
                    ParseError::expand_option(key, format!("'{}' is not a positive interval", value))
                })?;
                options.sampling_interval_secs = Some(secs);
            }
            _ => warn!(navigation = %navigation, option = %key, "Ignoring unknown expand option"),
        }
    }

    if let (Some(start), Some(end)) = (options.start_time_ms, options.end_time_ms) {
        if start > end {
            return Err(ParseError::expand_option(
                "startTime",
                "start time is after end time",
            ));
        }
    }

    Ok(options)
}

/// Parse a full `$expand` value into its segments
pub fn parse_expand(input: &str) -> ParseResult<Vec<ExpandItem>> {
    if !is_balanced(input) {
        return Err(ParseError::InvalidExpandSyntax(format!(
            "unbalanced parentheses in '{}'",
            input
        )));
    }

    let mut items: Vec<ExpandItem> = Vec::new();
    for segment in split_top_level(input, &[',']) {
        if segment.is_empty() {
            return Err(ParseError::InvalidExpandSyntax("empty segment".to_string()));
        }
        let item = parse_expand_item(segment)?;
        if items.iter().any(|i| i.navigation == item.navigation) {
            return Err(ParseError::InvalidExpandSyntax(format!(
                "navigation {} expanded more than once",
                item.navigation
            )));
        }
        items.push(item);
    }
    Ok(items)
}
