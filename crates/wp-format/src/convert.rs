//! Defensive conversions for data that comes back from the backend or from a
//! previous session's snapshot. None of these fail: malformed input collapses
//! to "now" or zero.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Object keys treated as dates when reviving a snapshot or a backend payload.
pub const DATE_FIELDS: &[&str] = &["timestamp", "createdAt", "updatedAt", "lastActive"];

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Strict parse: RFC 3339, naive ISO date-times (taken as UTC), plain dates,
/// or epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|value| value.and_utc());
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis);
    }

    None
}

pub fn parse_timestamp_or_now(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(Utc::now)
}

/// Like [`parse_timestamp_or_now`] but for loosely typed JSON (strings or
/// epoch-millisecond numbers).
pub fn timestamp_value_or_now(value: &Value) -> DateTime<Utc> {
    match value {
        Value::String(raw) => parse_timestamp_or_now(raw),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

/// Missing or null stays `None`; anything else present is coerced.
pub fn optional_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Null => None,
        other => Some(timestamp_value_or_now(other)),
    }
}

pub fn parse_number_or_zero(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|number| number.is_finite()).unwrap_or(0.0)
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Walks a JSON tree and rewrites every [`DATE_FIELDS`] entry into canonical
/// RFC 3339. Unparseable dates become the current time.
pub fn revive_dates(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let is_scalar = matches!(entry, Value::String(_) | Value::Number(_) | Value::Bool(_));
                if is_scalar && DATE_FIELDS.contains(&key.as_str()) {
                    *entry = Value::String(format_timestamp(&timestamp_value_or_now(entry)));
                } else {
                    revive_dates(entry);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(revive_dates),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn assert_recent(value: DateTime<Utc>) {
        let delta = Utc::now() - value;
        assert!(delta >= Duration::zero() && delta < Duration::seconds(5), "{value} is not now");
    }

    #[test]
    fn parses_iso_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2026-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-02T10:04:05+07:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-02 03:04:05"), Some(expected));
        assert_eq!(
            parse_timestamp("2026-01-02"),
            Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn epoch_millis_strings_and_numbers() {
        let expected = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(parse_timestamp("1700000000123"), Some(expected));
        assert_eq!(timestamp_value_or_now(&json!(1_700_000_000_123_i64)), expected);
    }

    #[test]
    fn malformed_timestamps_become_now() {
        assert_recent(parse_timestamp_or_now("yesterday-ish"));
        assert_recent(parse_timestamp_or_now(""));
        assert_recent(timestamp_value_or_now(&json!({"nested": true})));
        assert_recent(timestamp_value_or_now(&Value::Null));
    }

    #[test]
    fn optional_timestamp_keeps_missing_as_none() {
        assert_eq!(optional_timestamp(&Value::Null), None);
        assert!(optional_timestamp(&json!("garbage")).is_some());
    }

    #[test]
    fn numbers_coerce_to_zero_when_unparseable() {
        assert_eq!(parse_number_or_zero(&json!(0.25)), 0.25);
        assert_eq!(parse_number_or_zero(&json!(" 1.5 ")), 1.5);
        assert_eq!(parse_number_or_zero(&json!("abc")), 0.0);
        assert_eq!(parse_number_or_zero(&json!("NaN")), 0.0);
        assert_eq!(parse_number_or_zero(&Value::Null), 0.0);
        assert_eq!(parse_number_or_zero(&json!([1])), 0.0);
    }

    #[test]
    fn revive_normalizes_nested_date_fields() {
        let mut value = json!({
            "createdAt": "2026-01-02 03:04:05",
            "name": "2026-01-02 03:04:05",
            "transactions": [
                { "timestamp": 1_700_000_000_123_i64, "total": 10 },
                { "timestamp": "broken", "updatedAt": null }
            ]
        });

        revive_dates(&mut value);

        assert_eq!(value["createdAt"], json!("2026-01-02T03:04:05Z"));
        assert_eq!(value["name"], json!("2026-01-02 03:04:05"));
        assert_eq!(value["transactions"][0]["timestamp"], json!("2023-11-14T22:13:20.123Z"));
        assert_eq!(value["transactions"][1]["updatedAt"], Value::Null);
        let revived = value["transactions"][1]["timestamp"].as_str().unwrap();
        assert_recent(parse_timestamp(revived).unwrap());
    }
}
