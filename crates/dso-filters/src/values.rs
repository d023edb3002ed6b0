//! Parsing raw parameter values into typed comparison values.
//!
//! Every parser returns the client-facing message on failure; the filter set
//! attaches the parameter name.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Number, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TIME_FORMAT: &str = "%H:%M:%S";

/// A parsed date or date-time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexDateTime {
    /// Normalized `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`.
    pub value: String,
    /// The input was a bare date.
    pub date_only: bool,
}

/// Parses an integer.
pub fn integer(raw: &str) -> Result<Value, String> {
    raw.trim()
        .parse::<i64>()
        .map(Value::from)
        .map_err(|_| "Enter a whole number.".to_string())
}

/// Parses a finite decimal number.
pub fn number(raw: &str) -> Result<Value, String> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| "Enter a number.".to_string())
}

/// Parses `true`/`false` (also `1`/`0`), case-insensitively.
pub fn boolean(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err("Enter a valid boolean (true or false).".to_string()),
    }
}

/// Parses a `YYYY-MM-DD` date.
pub fn date(raw: &str) -> Result<Value, String> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
        .map_err(|_| "Enter a valid date.".to_string())
}

/// Parses `HH:MM[:SS]` into `HH:MM:SS`.
pub fn time(raw: &str) -> Result<Value, String> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map(|t| Value::String(t.format(TIME_FORMAT).to_string()))
        .map_err(|_| "Enter a valid time.".to_string())
}

/// Parses a bare date or a date-time.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS[.f]]` (also with a space
/// separator) and RFC 3339 timestamps, whose offset is dropped.
pub fn flex_datetime(raw: &str) -> Result<FlexDateTime, String> {
    let raw = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        return Ok(FlexDateTime {
            value: day.format(DATE_FORMAT).to_string(),
            date_only: true,
        });
    }

    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()));

    naive
        .map(|dt| FlexDateTime {
            value: dt.format(DATETIME_FORMAT).to_string(),
            date_only: false,
        })
        .ok_or_else(|| "Enter a valid date/time.".to_string())
}

/// Splits a comma-separated value into its non-empty trimmed parts.
#[must_use]
pub fn csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers() {
        assert_eq!(integer(" 42 "), Ok(json!(42)));
        assert!(integer("4.2").is_err());
        assert_eq!(number("4.5"), Ok(json!(4.5)));
        assert!(number("NaN").is_err());
    }

    #[test]
    fn booleans() {
        assert_eq!(boolean("TRUE"), Ok(true));
        assert_eq!(boolean("0"), Ok(false));
        assert!(boolean("ja").is_err());
    }

    #[test]
    fn dates_and_times() {
        assert_eq!(date("2021-01-03"), Ok(json!("2021-01-03")));
        assert!(date("2021-13-03").is_err());
        assert_eq!(time("08:30"), Ok(json!("08:30:00")));
        assert!(time("25:00").is_err());
    }

    #[test]
    fn flex_datetime_flags_bare_dates() {
        let day = flex_datetime("2021-01-03").unwrap();
        assert!(day.date_only);
        assert_eq!(day.value, "2021-01-03");

        let moment = flex_datetime("2021-01-03 12:13:14.5").unwrap();
        assert!(!moment.date_only);
        assert_eq!(moment.value, "2021-01-03T12:13:14");

        let zoned = flex_datetime("2021-01-03T12:13:14+01:00").unwrap();
        assert_eq!(zoned.value, "2021-01-03T12:13:14");

        assert!(flex_datetime("yesterday").is_err());
    }

    #[test]
    fn csv_drops_blanks() {
        assert_eq!(csv("ma, di,,wo "), vec!["ma", "di", "wo"]);
        assert!(csv("").is_empty());
    }
}
