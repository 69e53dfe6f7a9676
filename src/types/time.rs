//! Day and second counts since the Unix epoch, rendered in UTC

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

pub const DEFAULT_DATE_FORMAT: &str = "%d %b %Y";
pub const DEFAULT_TIME_FORMAT: &str = "%d %b %Y %H:%M:%S";
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Falls back to `default` when the hint is empty or not a valid pattern
fn pattern<'a>(hint: &'a str, default: &'a str) -> &'a str {
    if hint.is_empty() || StrftimeItems::new(hint).any(|item| matches!(item, Item::Error)) {
        default
    } else {
        hint
    }
}

pub fn date_from_days(days: i64) -> Option<NaiveDate> {
    TimeDelta::try_days(days).and_then(|delta| NaiveDate::default().checked_add_signed(delta))
}

pub fn days_from_date(date: NaiveDate) -> i64 {
    (date - NaiveDate::default()).num_days()
}

pub fn format_date(days: i64, hint: &str) -> String {
    match date_from_days(days) {
        Some(date) => date.format(pattern(hint, DEFAULT_DATE_FORMAT)).to_string(),
        None => days.to_string(),
    }
}

pub fn format_time(secs: i64, hint: &str) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(t) => t.format(pattern(hint, DEFAULT_TIME_FORMAT)).to_string(),
        None => secs.to_string(),
    }
}

/// Parse a date; empty input means today
pub fn parse_date(hint: &str, input: &str) -> Result<i64, String> {
    if input.is_empty() {
        return Ok(days_from_date(Utc::now().date_naive()));
    }
    NaiveDate::parse_from_str(input.trim(), pattern(hint, DEFAULT_DATE_FORMAT))
        .map(days_from_date)
        .map_err(|e| format!("cannot parse date '{input}': {e}"))
}

/// Parse a timestamp; empty input means now
pub fn parse_time(hint: &str, input: &str) -> Result<i64, String> {
    if input.is_empty() {
        return Ok(Utc::now().timestamp());
    }
    NaiveDateTime::parse_from_str(input.trim(), pattern(hint, DEFAULT_TIME_FORMAT))
        .map(|t| t.and_utc().timestamp())
        .map_err(|e| format!("cannot parse time '{input}': {e}"))
}
