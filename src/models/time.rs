//! Date and time decoders for the upstream event JSON.
//!
//! The producer emits the same logical instant in several syntactic forms
//! depending on which serializer touched the field. Each decoder tries the
//! accepted grammars in a fixed order and fails loudly when none match.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// An absolute instant, accepted as either epoch seconds (with optional
/// fractional nanoseconds) or one of the string grammars below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventInstant(pub DateTime<Utc>);

/// A zone-less date-time, additionally accepted as a `[y, m, d, H, M(, S)]`
/// integer array interpreted as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventDateTime(pub NaiveDateTime);

const STRING_FORMATS: &[&str] = &[
    // RFC3339 is handled separately (covers both with and without fraction).
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

fn parse_instant_str(s: &str) -> Result<DateTime<Utc>, String> {
    parse_naive_str(s).map(|naive| naive.and_utc())
}

fn parse_naive_str(s: &str) -> Result<NaiveDateTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).naive_utc());
    }
    for format in STRING_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive);
        }
    }
    Err(format!("unrecognized date-time format: {s}"))
}

fn instant_from_epoch(value: f64) -> Result<DateTime<Utc>, String> {
    let secs = value.trunc() as i64;
    let nanos = ((value - value.trunc()) * 1e9).round() as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| format!("epoch seconds out of range: {value}"))
}

fn naive_from_array(parts: &[i64]) -> Result<NaiveDateTime, String> {
    if parts.len() < 5 || parts.len() > 6 {
        return Err(format!(
            "date-time array must have 5 or 6 elements, got {}",
            parts.len()
        ));
    }
    let second = parts.get(5).copied().unwrap_or(0);
    let date = NaiveDate::from_ymd_opt(parts[0] as i32, parts[1] as u32, parts[2] as u32)
        .ok_or_else(|| format!("invalid calendar date: {parts:?}"))?;
    date.and_hms_opt(parts[3] as u32, parts[4] as u32, second as u32)
        .ok_or_else(|| format!("invalid time of day: {parts:?}"))
}

impl<'de> Deserialize<'de> for EventInstant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Epoch(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)
            .map_err(|_| de::Error::custom("timestamp must be a number or a string"))?
        {
            Raw::Epoch(value) => instant_from_epoch(value),
            Raw::Text(value) => parse_instant_str(&value),
        }
        .map(EventInstant)
        .map_err(de::Error::custom)
    }
}

impl Serialize for EventInstant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for EventDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Parts(Vec<i64>),
            Text(String),
        }

        match Raw::deserialize(deserializer)
            .map_err(|_| de::Error::custom("date-time must be an integer array or a string"))?
        {
            Raw::Parts(parts) => naive_from_array(&parts),
            Raw::Text(value) => parse_naive_str(&value),
        }
        .map(EventDateTime)
        .map_err(de::Error::custom)
    }
}

impl Serialize for EventDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.wire_format())
    }
}

impl EventDateTime {
    /// Canonical wire form used in outbound payloads (`2026-03-01T20:11:37`).
    pub fn wire_format(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S").to_string()
    }

    /// Human-readable form used in email bodies.
    pub fn human_format(&self) -> String {
        self.0.format("%A, %B %-d, %Y at %-I:%M %p").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(json: &str) -> EventInstant {
        serde_json::from_str(json).expect(json)
    }

    fn date_time(json: &str) -> EventDateTime {
        serde_json::from_str(json).expect(json)
    }

    #[test]
    fn instant_accepts_epoch_seconds() {
        let t = instant("1700000000");
        assert_eq!(t.0.timestamp(), 1_700_000_000);
        assert_eq!(t.0.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn instant_accepts_fractional_epoch_seconds() {
        let t = instant("1700000000.123456789");
        assert_eq!(t.0.timestamp(), 1_700_000_000);
        // f64 cannot hold full nanosecond precision at this magnitude.
        let nanos = t.0.timestamp_subsec_nanos();
        assert!((123_000_000..124_000_000).contains(&nanos), "nanos: {nanos}");
    }

    #[test]
    fn instant_accepts_string_grammars() {
        let reference = instant("\"2026-03-01T20:11:37Z\"");
        for raw in [
            "\"2026-03-01T20:11:37.559Z\"",
            "\"2026-03-01T20:11:37.559\"",
            "\"2026-03-01T20:11:37\"",
            "\"2026-03-01 20:11:37\"",
        ] {
            let t = instant(raw);
            assert_eq!(t.0.timestamp(), reference.0.timestamp(), "input: {raw}");
        }
    }

    #[test]
    fn instant_rejects_garbage() {
        assert!(serde_json::from_str::<EventInstant>("\"yesterday\"").is_err());
        assert!(serde_json::from_str::<EventInstant>("{}").is_err());
        assert!(serde_json::from_str::<EventInstant>("null").is_err());
    }

    #[test]
    fn date_time_accepts_five_element_array() {
        let t = date_time("[2026,3,1,20,11]");
        assert_eq!(t.wire_format(), "2026-03-01T20:11:00");
    }

    #[test]
    fn date_time_accepts_six_element_array() {
        let t = date_time("[2026,3,1,20,11,37]");
        assert_eq!(t.wire_format(), "2026-03-01T20:11:37");
    }

    #[test]
    fn date_time_accepts_string_grammars() {
        for raw in [
            "\"2026-03-01T20:11:37Z\"",
            "\"2026-03-01T20:11:37\"",
            "\"2026-03-01 20:11:37\"",
        ] {
            let t = date_time(raw);
            assert_eq!(t.wire_format(), "2026-03-01T20:11:37", "input: {raw}");
        }
    }

    #[test]
    fn date_time_rejects_short_arrays_and_garbage() {
        assert!(serde_json::from_str::<EventDateTime>("[2026,3,1,20]").is_err());
        assert!(serde_json::from_str::<EventDateTime>("[2026,3,1,20,11,37,0]").is_err());
        assert!(serde_json::from_str::<EventDateTime>("[2026,13,1,20,11]").is_err());
        assert!(serde_json::from_str::<EventDateTime>("\"soon\"").is_err());
        assert!(serde_json::from_str::<EventDateTime>("true").is_err());
    }

    #[test]
    fn date_time_round_trips_through_wire_format() {
        let t = date_time("[2026,3,1,20,11,37]");
        let encoded = serde_json::to_string(&t).unwrap();
        let decoded: EventDateTime = serde_json::from_str(&encoded).unwrap();
        assert_eq!(t, decoded);
    }
}
