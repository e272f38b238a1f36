//! Cell-level cleaning: numeric sanitization, flexible date parsing,
//! wind directions and free text.
//!
//! Every function here is total: bad input yields `None`, never an error.

use crate::utils::is_missing_marker;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static COMPARISON_GLYPHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[<>≤≥]").expect("Invalid regex: comparison glyphs"));

static NON_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9.\-]").expect("Invalid regex: non-numeric characters"));

/// Datetime layouts tried in order. Month-first precedes day-first, so an
/// ambiguous `03/04/2024` is read as March 4th.
const DATETIME_FORMATS: [&str; 12] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: [&str; 13] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
];

/// 16-point compass rose, clockwise from north.
const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Clean a numeric cell.
///
/// Strips inequality glyphs (`< > ≤ ≥`), then any character that is not a
/// digit, dot or minus, and parses the rest. A value that already parses
/// after removing the glyphs (scientific notation such as `1.2e-3`) is kept
/// as is. Empty, missing-marker and unparsable cells give `None`.
///
/// ```rust,ignore
/// assert_eq!(clean_numeric_value("<5.2"), Some(5.2));
/// assert_eq!(clean_numeric_value("≥10 µg/m³"), Some(10.0));
/// assert_eq!(clean_numeric_value("n.d."), None);
/// ```
pub fn clean_numeric_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if is_missing_marker(trimmed) {
        return None;
    }

    let without_glyphs = COMPARISON_GLYPHS.replace_all(trimmed, "");
    let without_glyphs = without_glyphs.trim();
    if let Ok(value) = without_glyphs.parse::<f64>()
        && value.is_finite()
    {
        return Some(value);
    }

    let digits = NON_NUMERIC.replace_all(without_glyphs, "");
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date or datetime in any of the accepted layouts. Naive values are
/// taken as UTC; date-only values map to midnight.
pub fn parse_flexible_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if is_missing_marker(trimmed) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse a wind direction given in degrees or as a compass point.
/// Degrees outside `[0, 360]` are rejected.
pub fn parse_wind_direction(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let upper = trimmed.to_uppercase();
    if let Some(index) = COMPASS_POINTS.iter().position(|p| *p == upper) {
        return Some(index as f64 * 22.5);
    }
    clean_numeric_value(trimmed).filter(|deg| (0.0..=360.0).contains(deg))
}

/// Trim a text cell and strip one layer of surrounding quotes.
pub fn clean_text(raw: &str) -> Option<String> {
    let mut cleaned = raw.trim();
    for quote in ['"', '\''] {
        if cleaned.len() >= 2 && cleaned.starts_with(quote) && cleaned.ends_with(quote) {
            cleaned = cleaned[1..cleaned.len() - 1].trim();
        }
    }
    if is_missing_marker(cleaned) {
        None
    } else {
        Some(cleaned.to_string())
    }
}
