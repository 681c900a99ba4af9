//! Shared parsing utilities for incident feeds.
//!
//! Timestamp parsing and recency filtering used across the normalizers.
//! Feeds disagree wildly on date formats: RFC 3339 with or without offsets,
//! bare ISO date-times, and epoch values in seconds or milliseconds.

use chrono::{DateTime, NaiveDateTime, TimeZone as _, Utc};

use crate::RECENCY_WINDOW_DAYS;

/// Parses a timestamp from a raw JSON value.
///
/// Accepts RFC 3339 strings, naive ISO 8601 date-times (assumed UTC), and
/// numeric epoch values (milliseconds when the magnitude is implausible as
/// seconds). Returns `None` for anything else.
#[must_use]
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_timestamp_str(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(parse_epoch),
        _ => None,
    }
}

/// Parses a timestamp string (RFC 3339 or naive ISO 8601).
#[must_use]
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

/// Interprets an integer as epoch seconds or milliseconds.
fn parse_epoch(raw: i64) -> Option<DateTime<Utc>> {
    // Values past the year ~5000 in seconds are taken as milliseconds.
    if raw.abs() > 100_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// Extracts the first parseable timestamp among the given keys of a JSON
/// object.
#[must_use]
pub fn first_timestamp(props: &serde_json::Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .filter_map(|key| props.get(key))
        .find_map(parse_timestamp)
}

/// Returns `true` when the timestamp falls inside the recency window
/// relative to `now`. Records without any timestamp are kept, so callers
/// only invoke this when a timestamp exists.
#[must_use]
pub fn within_recency_window(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(timestamp) <= chrono::Duration::days(RECENCY_WINDOW_DAYS)
}

/// Returns `true` if any of the needles appears in the haystack. Callers
/// lowercase the haystack once; needles are written lowercase.
#[must_use]
pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Extracts a string field, trimmed, `None` when missing or empty.
#[must_use]
pub fn string_field<'a>(props: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    props
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Extracts the first non-empty string among the given keys.
#[must_use]
pub fn first_string_field<'a>(props: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| string_field(props, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_timestamp_str("2025-06-01T10:30:00+10:00").unwrap();
        assert_eq!(dt.to_string(), "2025-06-01 00:30:00 UTC");
    }

    #[test]
    fn parses_naive_iso_with_fractional() {
        let dt = parse_timestamp_str("2025-06-01T10:30:00.250").unwrap();
        assert_eq!(dt.to_string(), "2025-06-01 10:30:00.250 UTC");
    }

    #[test]
    fn parses_epoch_seconds_and_millis() {
        let secs = parse_timestamp(&serde_json::json!(1_748_775_000)).unwrap();
        let millis = parse_timestamp(&serde_json::json!(1_748_775_000_000i64)).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp_str("not-a-date").is_none());
        assert!(parse_timestamp(&serde_json::json!(true)).is_none());
    }

    #[test]
    fn recency_window_boundary() {
        let now = Utc::now();
        assert!(within_recency_window(now - chrono::Duration::days(6), now));
        assert!(!within_recency_window(now - chrono::Duration::days(8), now));
    }

    #[test]
    fn first_timestamp_takes_first_parseable_key() {
        let props = serde_json::json!({
            "updated": "garbage",
            "published": "2025-06-01T00:00:00Z",
        });
        let dt = first_timestamp(&props, &["updated", "published"]).unwrap();
        assert_eq!(dt.to_string(), "2025-06-01 00:00:00 UTC");
    }

    #[test]
    fn string_fields_trim_and_skip_empty() {
        let props = serde_json::json!({"a": "  ", "b": " x "});
        assert!(string_field(&props, "a").is_none());
        assert_eq!(first_string_field(&props, &["a", "b"]), Some("x"));
    }
}
