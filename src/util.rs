//! # Utility Module
//!
//! Parsing helpers shared by the command line and the configuration layer.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognised time {0:?}; expected RFC 3339, YYYY-MM-DD HH:MM:SS or YYYY-MM-DD")]
pub struct TimeParseError(pub String);

/// Parse a time bound. Inputs without an offset are taken as UTC.
pub fn parse_time_bound(input: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| TimeParseError(input.to_string()))
}

/// `None` for blank input, otherwise the parsed bound.
pub fn parse_optional_time(input: Option<&str>) -> Result<Option<DateTime<Utc>>, TimeParseError> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_time_bound(text).map(Some),
    }
}

/// Split a comma separated list, trimming items and dropping empty ones.
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Event ids from a comma separated list. Items that are not integers are
/// skipped.
pub fn parse_id_list(input: &str) -> Vec<i64> {
    split_list(input)
        .iter()
        .filter_map(|item| item.parse().ok())
        .collect()
}
