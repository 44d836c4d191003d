//! Timestamp and interval literals used by expand options

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{ParseError, ParseResult};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a timestamp into epoch milliseconds.
///
/// Formats are tried in order and the first match wins: RFC 3339, naive
/// date-times (read as UTC), a bare date (midnight UTC), then raw epoch
/// milliseconds.
pub fn parse_timestamp(input: &str) -> ParseResult<i64> {
    let s = input.trim().trim_matches('\'');

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(ms) = s.parse::<i64>() {
            return Ok(ms);
        }
    }

    Err(ParseError::InvalidTimestamp(input.to_string()))
}

/// Parse a sampling interval into seconds: `90`, `90s`, `5m` or `1h`
pub fn parse_interval_secs(input: &str) -> Option<u32> {
    let s = input.trim().to_ascii_lowercase();
    let (digits, multiplier) = match s.chars().last()? {
        's' => (&s[..s.len() - 1], 1),
        'm' => (&s[..s.len() - 1], 60),
        'h' => (&s[..s.len() - 1], 3600),
        _ => (s.as_str(), 1),
    };
    let value: u32 = digits.trim().parse().ok()?;
    value.checked_mul(multiplier).filter(|secs| *secs > 0)
}
