use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

/// How seconds are rounded into whole minutes when rendering `H:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Truncate,
    Nearest,
    /// Any started minute counts as a full one. Used for date totals.
    Classic,
}

impl From<i32> for Rounding {
    fn from(value: i32) -> Self {
        match value {
            1 => Self::Nearest,
            2 => Self::Classic,
            _ => Self::Truncate,
        }
    }
}

/// Parse a human duration string into seconds.
///
/// Accepts clock forms (`1:30:00`, `25:10`), unit forms (`1 h 30 min`,
/// `2h`, `45 min`, `90 sec`) and bare numbers, which mean minutes.
/// Unparseable input yields 0; durations never come out negative.
pub fn parse_duration(input: &str) -> i64 {
    let value = input.trim();
    if value.is_empty() {
        return 0;
    }
    let seconds = if value.contains(':') {
        parse_clock(value)
    } else {
        parse_units(value)
    };
    seconds.max(0)
}

fn parse_clock(value: &str) -> i64 {
    let mut parts = Vec::with_capacity(3);
    for part in value.split(':') {
        match part.trim().parse::<i64>() {
            Ok(n) if n >= 0 => parts.push(n),
            _ => return 0,
        }
    }
    match parts.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [m, s] => m * 60 + s,
        _ => 0,
    }
}

fn parse_units(value: &str) -> i64 {
    let lower = value.to_lowercase();
    let mut total = 0f64;
    let mut pending: Option<f64> = None;

    let mut chars = lower.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' || c == ',' {
            let mut num = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() || c == '.' || c == ',' {
                    num.push(if c == ',' { '.' } else { c });
                    chars.next();
                } else {
                    break;
                }
            }
            // Two numbers in a row without a unit is not a duration.
            if pending.is_some() {
                return 0;
            }
            match num.parse::<f64>() {
                Ok(n) => pending = Some(n),
                Err(_) => return 0,
            }
        } else if c.is_alphabetic() {
            let mut unit = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphabetic() {
                    unit.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let multiplier = match unit.as_str() {
                "h" | "hr" | "hrs" | "hour" | "hours" => 3600.0,
                "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
                "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
                _ => return 0,
            };
            match pending.take() {
                Some(n) => total += n * multiplier,
                None => return 0,
            }
        } else {
            return 0;
        }
    }

    // A trailing bare number means minutes.
    if let Some(n) = pending {
        total += n * 60.0;
    }
    total.round() as i64
}

/// `H:MM:SS` from a non-negative second count. Callers hand in
/// `now - start` for running entries; the sign trick never reaches here.
pub fn format_hhmmss(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{h}:{m:02}:{s:02}")
}

/// `H:MM` with the requested rounding.
pub fn format_hhmm(seconds: i64, rounding: Rounding) -> String {
    let seconds = seconds.max(0);
    let minutes = match rounding {
        Rounding::Truncate => seconds / 60,
        Rounding::Nearest => (seconds + 30) / 60,
        Rounding::Classic => (seconds + 59) / 60,
    };
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

/// Grouping key for the UI: the entry's start day in the local
/// timezone, rendered `YYYY-MM-DD`.
pub fn date_header(start_unix: i64) -> String {
    date_header_at(start_unix, local_offset())
}

pub(crate) fn date_header_at(start_unix: i64, offset: UtcOffset) -> String {
    let when = OffsetDateTime::from_unix_timestamp(start_unix)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset);
    format!(
        "{:04}-{:02}-{:02}",
        when.year(),
        u8::from(when.month()),
        when.day()
    )
}

/// Local offset, falling back to UTC when the platform refuses to
/// disclose it (multi-threaded lookup on some unixes).
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

pub fn parse_iso8601(value: &str) -> Result<i64, time::error::Parse> {
    Ok(OffsetDateTime::parse(value, &Rfc3339)?.unix_timestamp())
}

pub fn format_iso8601(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clock_durations() {
        assert_eq!(parse_duration("1:30:00"), 5400);
        assert_eq!(parse_duration("0:00:03"), 3);
        assert_eq!(parse_duration("25:10"), 25 * 60 + 10);
        assert_eq!(parse_duration(" 2:05 "), 125);
    }

    #[test]
    fn parses_unit_durations() {
        assert_eq!(parse_duration("1 h 30 min"), 5400);
        assert_eq!(parse_duration("2h"), 7200);
        assert_eq!(parse_duration("45 min"), 2700);
        assert_eq!(parse_duration("90 sec"), 90);
        assert_eq!(parse_duration("1.5h"), 5400);
    }

    #[test]
    fn bare_numbers_are_minutes() {
        assert_eq!(parse_duration("15"), 900);
        assert_eq!(parse_duration("0"), 0);
    }

    #[test]
    fn garbage_is_zero() {
        assert_eq!(parse_duration(""), 0);
        assert_eq!(parse_duration("bananas"), 0);
        assert_eq!(parse_duration("1:xx"), 0);
        assert_eq!(parse_duration("-5"), 0);
        assert_eq!(parse_duration("3 4"), 0);
    }

    #[test]
    fn formats_hhmmss() {
        assert_eq!(format_hhmmss(0), "0:00:00");
        assert_eq!(format_hhmmss(3), "0:00:03");
        assert_eq!(format_hhmmss(5400), "1:30:00");
        assert_eq!(format_hhmmss(-7), "0:00:00");
    }

    #[test]
    fn formats_hhmm_roundings() {
        assert_eq!(format_hhmm(5429, Rounding::Truncate), "1:30");
        assert_eq!(format_hhmm(5429, Rounding::Nearest), "1:30");
        assert_eq!(format_hhmm(5431, Rounding::Nearest), "1:31");
        assert_eq!(format_hhmm(5401, Rounding::Classic), "1:31");
        assert_eq!(format_hhmm(5400, Rounding::Classic), "1:30");
    }

    #[test]
    fn hhmmss_round_trips_over_a_day() {
        for n in (0..86_400).step_by(7) {
            assert_eq!(parse_duration(&format_hhmmss(n)), n);
        }
        for n in [0, 1, 59, 60, 3599, 3600, 86_399] {
            assert_eq!(parse_duration(&format_hhmmss(n)), n);
        }
    }

    #[test]
    fn date_header_uses_the_given_offset() {
        // 2024-03-01T23:30:00Z
        let ts = 1_709_335_800;
        assert_eq!(date_header_at(ts, UtcOffset::UTC), "2024-03-01");
        let plus_two = UtcOffset::from_hms(2, 0, 0).unwrap();
        assert_eq!(date_header_at(ts, plus_two), "2024-03-02");
    }

    #[test]
    fn iso8601_round_trips() {
        let ts = 1_709_335_800;
        assert_eq!(parse_iso8601(&format_iso8601(ts)).unwrap(), ts);
        assert!(parse_iso8601("not a time").is_err());
    }
}
