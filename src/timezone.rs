//! Timezone conversions shared by ingestion and validation.
//!
//! Naive source timestamps are wall-clock readings in Asia/Kolkata. The warehouse stores
//! naive values whose fields are the UTC wall-clock reading of the same instant.

use crate::constants::RENDER_FORMAT;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;

/// A timestamp as found in a source value, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceTimestamp {
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

/// Attach Asia/Kolkata to a naive reading and return the UTC wall-clock, zone stripped.
pub fn local_to_naive_utc(naive: NaiveDateTime) -> Result<NaiveDateTime, String> {
    Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc).naive_utc())
        .ok_or_else(|| format!("{naive} has no unique Asia/Kolkata reading"))
}

/// Re-express a zoned instant in Asia/Kolkata, then as naive UTC.
pub fn zoned_to_naive_utc<Tz: TimeZone>(dt: &DateTime<Tz>) -> NaiveDateTime {
    dt.with_timezone(&Kolkata).with_timezone(&Utc).naive_utc()
}

pub fn to_naive_utc(ts: SourceTimestamp) -> Result<NaiveDateTime, String> {
    match ts {
        SourceTimestamp::Naive(naive) => local_to_naive_utc(naive),
        SourceTimestamp::Zoned(zoned) => Ok(zoned_to_naive_utc(&zoned)),
    }
}

/// Render a naive-UTC value as Asia/Kolkata local time, e.g. `24-Nov-2025 10:00:00.123 AM`.
pub fn render_local(naive_utc: NaiveDateTime) -> String {
    Utc.from_utc_datetime(&naive_utc)
        .with_timezone(&Kolkata)
        .format(RENDER_FORMAT)
        .to_string()
}

/// Render a source reading as the source store does: Kolkata local time with the zone
/// abbreviation appended, e.g. `24-Nov-2025 10:00:00.123 AM IST`.
pub fn render_source(ts: SourceTimestamp) -> Result<String, String> {
    let local = match ts {
        SourceTimestamp::Naive(naive) => Kolkata
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| format!("{naive} has no unique Asia/Kolkata reading"))?,
        SourceTimestamp::Zoned(zoned) => zoned.with_timezone(&Kolkata),
    };
    Ok(format!("{} {}", local.format(RENDER_FORMAT), local.format("%Z")))
}

/// Drop the trailing zone abbreviation from a source rendering.
///
/// `24-Nov-2025 10:00:00.123 AM IST` becomes `24-Nov-2025 10:00:00.123 AM`. A rendering that
/// already ends in the AM/PM marker is returned trimmed but otherwise untouched.
pub fn strip_zone_suffix(rendered: &str) -> &str {
    let trimmed = rendered.trim_end();
    match trimmed.rsplit_once(' ') {
        Some((head, last)) if !is_meridiem(last) => head.trim_end(),
        _ => trimmed,
    }
}

fn is_meridiem(token: &str) -> bool {
    token.eq_ignore_ascii_case("AM") || token.eq_ignore_ascii_case("PM")
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    // Postgres timestamptz text, e.g. `2025-11-24 04:30:00+00`
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a textual timestamp. Offsets (including a trailing `Z`) produce a zoned value;
/// everything else is naive. A bare date reads as midnight.
pub fn parse_timestamp(text: &str) -> Option<SourceTimestamp> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(SourceTimestamp::Zoned(dt));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(SourceTimestamp::Zoned(dt));
        }
    }
    if let Some(naive) = s.strip_suffix('Z').or_else(|| s.strip_suffix(" UTC")) {
        return parse_naive(naive).map(|n| SourceTimestamp::Zoned(Utc.from_utc_datetime(&n).into()));
    }
    parse_naive(s).map(SourceTimestamp::Naive)
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    for fmt in NAIVE_FORMATS {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(n);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn naive_reading_is_shifted_back_five_thirty() {
        let out = local_to_naive_utc(naive("2025-11-24 10:00:00.000")).unwrap();
        assert_eq!(out, naive("2025-11-24 04:30:00.000"));
    }

    #[test]
    fn shift_crosses_midnight() {
        let out = local_to_naive_utc(naive("2025-11-24 02:15:00.500")).unwrap();
        assert_eq!(out, naive("2025-11-23 20:45:00.500"));
    }

    #[test]
    fn utc_instant_keeps_its_clock_reading() {
        let utc = Utc.from_utc_datetime(&naive("2025-11-24 04:30:00.000"));
        assert_eq!(zoned_to_naive_utc(&utc), naive("2025-11-24 04:30:00.000"));
    }

    #[test]
    fn foreign_offset_is_converted_by_instant() {
        let ny = DateTime::parse_from_rfc3339("2025-11-23T23:30:00-05:00").unwrap();
        assert_eq!(zoned_to_naive_utc(&ny), naive("2025-11-24 04:30:00.000"));
    }

    #[test]
    fn render_local_matches_source_pattern() {
        assert_eq!(
            render_local(naive("2025-11-24 04:30:00.123")),
            "24-Nov-2025 10:00:00.123 AM"
        );
        assert_eq!(
            render_local(naive("2025-11-24 10:45:07.009")),
            "24-Nov-2025 04:15:07.009 PM"
        );
    }

    #[test]
    fn strip_zone_suffix_removes_abbreviation() {
        assert_eq!(
            strip_zone_suffix("24-Nov-2025 10:00:00.123 AM IST"),
            "24-Nov-2025 10:00:00.123 AM"
        );
        assert_eq!(
            strip_zone_suffix("24-Nov-2025 10:00:00.123 PM +0530"),
            "24-Nov-2025 10:00:00.123 PM"
        );
    }

    #[test]
    fn strip_zone_suffix_keeps_meridiem() {
        assert_eq!(
            strip_zone_suffix("24-Nov-2025 10:00:00.123 AM "),
            "24-Nov-2025 10:00:00.123 AM"
        );
        assert_eq!(
            strip_zone_suffix("24-Nov-2025 10:00:00.123 PM"),
            "24-Nov-2025 10:00:00.123 PM"
        );
    }

    #[test]
    fn round_trip_source_and_warehouse_renderings_agree() {
        let source = "24-Nov-2025 10:00:00.123 AM IST";
        let stored = local_to_naive_utc(naive("2025-11-24 10:00:00.123")).unwrap();
        assert_eq!(stored, naive("2025-11-24 04:30:00.123"));
        assert_eq!(render_local(stored), strip_zone_suffix(source));
    }

    #[test]
    fn render_source_appends_zone_abbreviation() {
        let naive_reading = SourceTimestamp::Naive(naive("2025-11-24 10:00:00.123"));
        assert_eq!(
            render_source(naive_reading).unwrap(),
            "24-Nov-2025 10:00:00.123 AM IST"
        );
        let utc = DateTime::parse_from_rfc3339("2025-11-24T04:30:00.123Z").unwrap();
        assert_eq!(
            render_source(SourceTimestamp::Zoned(utc)).unwrap(),
            "24-Nov-2025 10:00:00.123 AM IST"
        );
    }

    #[test]
    fn parses_naive_and_zoned_text() {
        assert_eq!(
            parse_timestamp("2025-11-24 10:00:00.250"),
            Some(SourceTimestamp::Naive(naive("2025-11-24 10:00:00.250")))
        );
        assert_eq!(
            parse_timestamp("2025-11-24"),
            Some(SourceTimestamp::Naive(naive("2025-11-24 00:00:00.000")))
        );
        match parse_timestamp("2025-11-24T10:00:00+05:30") {
            Some(SourceTimestamp::Zoned(dt)) => {
                assert_eq!(zoned_to_naive_utc(&dt), naive("2025-11-24 04:30:00.000"))
            }
            other => panic!("expected zoned, got {other:?}"),
        }
        match parse_timestamp("2025-11-24 04:30:00Z") {
            Some(SourceTimestamp::Zoned(dt)) => {
                assert_eq!(zoned_to_naive_utc(&dt), naive("2025-11-24 04:30:00.000"))
            }
            other => panic!("expected zoned, got {other:?}"),
        }
    }

    #[test]
    fn parses_postgres_hour_only_offsets() {
        for (text, utc) in [
            ("2025-11-24 04:30:00+00", "2025-11-24 04:30:00.000"),
            ("2025-11-24 09:30:00.125+05", "2025-11-24 04:30:00.125"),
            ("2025-11-24T04:30:00+00", "2025-11-24 04:30:00.000"),
        ] {
            match parse_timestamp(text) {
                Some(SourceTimestamp::Zoned(dt)) => assert_eq!(zoned_to_naive_utc(&dt), naive(utc)),
                other => panic!("{text}: expected zoned, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2025-13-40 10:00:00"), None);
    }
}
