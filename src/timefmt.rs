//! Timestamp parsing and formatting at the edges of the system.
//!
//! Internally every instant is [`Ms`]. Callers hand us one of:
//! - RFC 3339 with an explicit offset (`2025-01-01T10:00:00Z`),
//! - a browser `datetime-local` value with no offset (`2025-01-01T10:00`),
//!   read in the configured local offset,
//! - a bare integer, taken as Unix milliseconds.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::Ms;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parse a caller-supplied instant. Anything outside the supported year
/// range is rejected here, so no later arithmetic on it can overflow.
pub fn parse_timestamp(raw: &str, local_offset: FixedOffset) -> Result<Ms, String> {
    let ms = parse_instant(raw, local_offset)?;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ms) {
        return Err(format!("timestamp out of range: {}", raw.trim()));
    }
    Ok(ms)
}

fn parse_instant(raw: &str, local_offset: FixedOffset) -> Result<Ms, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("empty timestamp".into());
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return local_offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| format!("ambiguous local time: {s}"));
        }
    }
    Err(format!("invalid start time format: {s}"))
}

/// Parse `+HH:MM` / `-HH:MM` / `Z`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(utc());
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(format!("bad UTC offset: {s}")),
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let h: i32 = h.parse().map_err(|_| format!("bad UTC offset: {s}"))?;
    let m: i32 = m.parse().map_err(|_| format!("bad UTC offset: {s}"))?;
    if !(0..=23).contains(&h) || !(0..=59).contains(&m) {
        return Err(format!("UTC offset out of range: {s}"));
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60)).ok_or_else(|| format!("bad UTC offset: {s}"))
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}

/// RFC 3339 in UTC with millisecond precision.
pub fn format_ms(ms: Ms) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-01-01T10:00:00Z
    const TEN_AM: Ms = 1_735_725_600_000;

    #[test]
    fn parses_rfc3339() {
        assert_eq!(parse_timestamp("2025-01-01T10:00:00Z", utc()), Ok(TEN_AM));
        assert_eq!(
            parse_timestamp("2025-01-01T15:30:00+05:30", utc()),
            Ok(TEN_AM)
        );
    }

    #[test]
    fn parses_datetime_local_in_offset() {
        assert_eq!(parse_timestamp("2025-01-01T10:00", utc()), Ok(TEN_AM));
        let ist = parse_utc_offset("+05:30").unwrap();
        assert_eq!(parse_timestamp("2025-01-01T15:30", ist), Ok(TEN_AM));
        assert_eq!(parse_timestamp("2025-01-01 10:00:00", utc()), Ok(TEN_AM));
    }

    #[test]
    fn parses_unix_millis() {
        assert_eq!(parse_timestamp("1735725600000", utc()), Ok(TEN_AM));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("", utc()).is_err());
        assert!(parse_timestamp("tomorrow", utc()).is_err());
        assert!(parse_timestamp("2025-13-01T10:00", utc()).is_err());
    }

    #[test]
    fn rejects_out_of_range_instants() {
        assert!(parse_timestamp("9223372036854775807", utc()).is_err());
        assert!(parse_timestamp("-9223372036854775808", utc()).is_err());
        assert!(parse_timestamp("0", utc()).is_err());
        assert!(parse_timestamp("1999-12-31T23:59:59Z", utc()).is_err());
        assert!(parse_timestamp("2200-01-01T00:00:01Z", utc()).is_err());
        assert!(parse_timestamp("2000-01-01T00:00:00Z", utc()).is_ok());
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("-08:00").unwrap().local_minus_utc(), -8 * 3600);
        assert_eq!(parse_utc_offset("+5").unwrap().local_minus_utc(), 5 * 3600);
        assert!(parse_utc_offset("05:00").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn formats_utc_millis() {
        assert_eq!(format_ms(TEN_AM), "2025-01-01T10:00:00.000Z");
    }
}
