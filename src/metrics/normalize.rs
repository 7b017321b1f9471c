use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::types::DateValue;

type TextParser = fn(&str) -> Option<NaiveDate>;

/// Tried in order; the first parser that yields a date wins.
const TEXT_PARSERS: &[TextParser] = &[parse_plain_date, parse_iso_utc_or_naive, parse_iso_with_offset];

/// Naive ISO-8601 shapes the CRM and the database emit. `%.f` also matches
/// when the fractional part is missing.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Reduce any supported date representation to a calendar date.
///
/// Returns `None` for missing or unparseable input; callers exclude such
/// records from the date-windowed bucket they are computing.
pub fn normalize(value: Option<&DateValue>) -> Option<NaiveDate> {
    match value? {
        // Date in the value's own offset, not converted to UTC.
        DateValue::DateTime(dt) => Some(dt.date_naive()),
        DateValue::Date(d) => Some(*d),
        DateValue::Text(s) => normalize_text(s),
    }
}

pub fn normalize_text(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    TEXT_PARSERS.iter().find_map(|parse| parse(s))
}

fn parse_plain_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// ISO-8601 with a trailing `Z` (read as `+00:00`), or without any offset.
fn parse_iso_utc_or_naive(s: &str) -> Option<NaiveDate> {
    if let Some(rest) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        let with_offset = format!("{rest}+00:00");
        if let Ok(dt) = DateTime::parse_from_rfc3339(&with_offset) {
            return Some(dt.date_naive());
        }
        return parse_naive_datetime(rest);
    }
    parse_naive_datetime(s)
}

fn parse_iso_with_offset(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    OFFSET_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date_naive())
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDate> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
}
