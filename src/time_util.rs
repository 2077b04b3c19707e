// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Nanosecond helpers and the calendar-time boundary.
//!
//! Everything on the wire is an `i64` nanosecond count since the Unix epoch;
//! calendar conversions only happen at the edges (sidecar metadata, export,
//! split file names).

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const NANOS_PER_MICRO: i64 = 1_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
pub const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// Current wall-clock time as Unix nanoseconds.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_ns() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as i64,
        Err(_) => 0,
    }
}

#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn ns_to_seconds(ns: i64) -> f64 {
    ns as f64 / NANOS_PER_SECOND as f64
}

/// An inclusive `[start_ns, end_ns]` wall-time window.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TimeRange {
    pub start_ns: i64,
    pub end_ns: i64,
}

impl TimeRange {
    #[must_use]
    pub fn new(start_ns: i64, end_ns: i64) -> Self {
        Self { start_ns, end_ns }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start_ns == 0 && self.end_ns == 0
    }

    #[must_use]
    pub fn contains(&self, timestamp_ns: i64) -> bool {
        timestamp_ns >= self.start_ns && timestamp_ns <= self.end_ns
    }

    #[must_use]
    pub fn duration_ns(&self) -> i64 {
        self.end_ns - self.start_ns
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        ns_to_seconds(self.duration_ns())
    }
}

/// Formats Unix nanoseconds as RFC 3339 / ISO 8601 UTC.
#[must_use]
pub fn format_iso8601(ns: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ns))
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ns.to_string())
}

/// Parses an RFC 3339 / ISO 8601 timestamp to Unix nanoseconds.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn parse_iso8601(text: &str) -> Option<i64> {
    OffsetDateTime::parse(text, &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp_nanos() as i64)
}

/// Formats Unix nanoseconds as `YYYYmmdd_HHMMSS` (UTC), used in split file
/// names.
#[must_use]
pub fn format_compact(ns: i64) -> String {
    let fmt = time::macros::format_description!("[year][month][day]_[hour][minute][second]");

    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ns))
        .ok()
        .and_then(|dt| dt.format(&fmt).ok())
        .unwrap_or_else(|| ns.to_string())
}

/// Parses duration strings like `90s`, `500ms`, `1h30m` or `2d` into
/// nanoseconds. Multiple `<number><unit>` groups are summed.
#[must_use]
pub fn parse_duration(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    let mut chars = text.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                number.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let value: i64 = number.parse().ok()?;
        let scale = match unit.as_str() {
            "ns" => 1,
            "us" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_MINUTE,
            "h" => NANOS_PER_HOUR,
            "d" => NANOS_PER_DAY,
            _ => return None,
        };

        total = total.checked_add(value.checked_mul(scale)?)?;
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_strings() {
        assert_eq!(Some(NANOS_PER_SECOND / 2), parse_duration("500ms"));
        assert_eq!(Some(90 * NANOS_PER_MINUTE), parse_duration("1h30m"));
        assert_eq!(Some(2 * NANOS_PER_DAY), parse_duration("2d"));
        assert_eq!(Some(42), parse_duration("42ns"));
        assert_eq!(None, parse_duration("1parsec"));
        assert_eq!(None, parse_duration(""));
    }

    #[test]
    fn iso8601_roundtrip() {
        let ns = 1_736_937_000_123_000_000;
        let text = format_iso8601(ns);
        assert_eq!(Some(ns), parse_iso8601(&text));
    }

    #[test]
    fn compact_stamp() {
        // 2021-01-01T00:00:00Z
        assert_eq!("20210101_000000", format_compact(1_609_459_200_000_000_000));
    }

    #[test]
    fn time_range_contains_is_inclusive() {
        let range = TimeRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
        assert_eq!(10, range.duration_ns());
    }
}
