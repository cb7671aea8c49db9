// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Date handling shared by the compiler, the stores and pull.
//!
//! Dates are exchanged as ISO-8601 text and stored locally as epoch seconds
//! (REAL) so SQLite can compare and `strftime` them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Seconds since the Unix epoch, with millisecond precision.
pub fn to_epoch_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

pub fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64).single()
}

/// Canonical wire form: `2014-07-09T00:00:00.000Z`.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let expected = Utc.with_ymd_and_hms(2012, 5, 29, 9, 13, 28).unwrap();
        assert_eq!(parse_datetime("2012-05-29T09:13:28"), Some(expected));
        assert_eq!(parse_datetime("2012-05-29T09:13:28Z"), Some(expected));
        assert_eq!(parse_datetime("2012-05-29T11:13:28+02:00"), Some(expected));
        assert_eq!(
            parse_datetime("2012-05-29"),
            Some(Utc.with_ymd_and_hms(2012, 5, 29, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("not a date"), None);
    }

    #[test]
    fn test_epoch_round_trip() {
        let dt = Utc.with_ymd_and_hms(2014, 7, 9, 0, 0, 0).unwrap();
        let secs = to_epoch_seconds(&dt);
        assert_eq!(secs, 1_404_864_000.0);
        assert_eq!(from_epoch_seconds(secs), Some(dt));
        assert_eq!(format_datetime(&dt), "2014-07-09T00:00:00.000Z");
    }
}
