//! Timestamp normalization
//!
//! Export files carry dates in several shapes: extended-JSON `$date` wrappers,
//! ISO-8601 strings with or without fractional seconds, strings with explicit
//! offsets and raw epoch milliseconds. Everything funnels into one canonical
//! `DateTime<Utc>` or `None`. Nothing here panics or returns an error.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Strict UTC patterns, tried in order before the general offset parse.
const UTC_PATTERNS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%SZ"];

/// Anything that may carry a point in time.
pub trait TimestampSource {
    fn to_timestamp(&self) -> Option<DateTime<Utc>>;
}

/// Normalize a date-bearing value into a UTC instant.
pub fn normalize<T: TimestampSource + ?Sized>(value: &T) -> Option<DateTime<Utc>> {
    value.to_timestamp()
}

impl TimestampSource for DateTime<Utc> {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        Some(*self)
    }
}

impl TimestampSource for DateTime<FixedOffset> {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.with_timezone(&Utc))
    }
}

/// Naive values are taken to be UTC, which is what the source store uses.
impl TimestampSource for NaiveDateTime {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        Some(Utc.from_utc_datetime(self))
    }
}

impl TimestampSource for i64 {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        from_epoch_millis(*self)
    }
}

impl TimestampSource for str {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_str(self)
    }
}

impl TimestampSource for Value {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::String(s) => parse_str(s),
            Value::Number(n) => n.as_i64().and_then(from_epoch_millis),
            Value::Object(map) => {
                if let Some(inner) = map.get("$date") {
                    inner.to_timestamp()
                } else if let Some(Value::String(raw)) = map.get("$numberLong") {
                    raw.trim().parse::<i64>().ok().and_then(from_epoch_millis)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl<T: TimestampSource + ?Sized> TimestampSource for &T {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        (**self).to_timestamp()
    }
}

impl<T: TimestampSource> TimestampSource for Option<T> {
    fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        self.as_ref().and_then(|v| v.to_timestamp())
    }
}

fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    // Zero is the falsy sentinel some exports use for "no date".
    if millis == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.ends_with('Z') {
        for pattern in UTC_PATTERNS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, pattern) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canonical() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_supported_shapes_agree() {
        assert_eq!(normalize("2024-01-15T10:30:00.000Z"), Some(canonical()));
        assert_eq!(normalize("2024-01-15T10:30:00Z"), Some(canonical()));
        assert_eq!(
            normalize(&json!({"$date": "2024-01-15T10:30:00.000Z"})),
            Some(canonical())
        );
        assert_eq!(normalize(&1705314600000_i64), Some(canonical()));
        assert_eq!(normalize(&json!(1705314600000_i64)), Some(canonical()));
        assert_eq!(normalize(&canonical()), Some(canonical()));
        assert_eq!(normalize(&canonical().naive_utc()), Some(canonical()));
    }

    #[test]
    fn test_offsets_and_wrapped_numbers() {
        assert_eq!(normalize("2024-01-15T07:30:00-03:00"), Some(canonical()));
        assert_eq!(
            normalize(&json!({"$date": {"$numberLong": "1705314600000"}})),
            Some(canonical())
        );
        assert_eq!(
            normalize("2024-01-15T10:30:00.250Z").map(|d| d.timestamp_subsec_millis()),
            Some(250)
        );
    }

    #[test]
    fn test_malformed_is_none() {
        assert_eq!(normalize("not a date"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("2024-13-45T99:99:99Z"), None);
        assert_eq!(normalize("2024-01-15T10:30:00"), None);
        assert_eq!(normalize(&json!(null)), None);
        assert_eq!(normalize(&json!(false)), None);
        assert_eq!(normalize(&json!(0)), None);
        assert_eq!(normalize(&json!({"$oid": "abc"})), None);
        assert_eq!(normalize(&json!([1, 2])), None);
        assert_eq!(normalize(&Option::<&Value>::None), None);
    }
}
