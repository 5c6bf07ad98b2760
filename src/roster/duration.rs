//! Cadence strings (`30m`, `24h`, `1d`, `2w`) to seconds.

use std::sync::OnceLock;

use regex::Regex;

use super::RosterError;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Digits only: a leading sign or a fractional part never matches.
        Regex::new(r"(?i)^(\d+)([mhdw])$").expect("static duration regex is valid")
    })
}

/// Parse a cadence string into seconds.
///
/// Accepts `<n><unit>` with unit one of `m`, `h`, `d`, `w` (case-insensitive),
/// optionally surrounded by whitespace. Zero magnitudes are rejected, as are
/// durations too long to add to a Unix timestamp (`i64::MAX` seconds).
pub fn parse_duration(text: &str) -> Result<u64, RosterError> {
    let trimmed = text.trim();
    let invalid = || RosterError::InvalidFormat(text.to_string());

    let caps = duration_pattern().captures(trimmed).ok_or_else(invalid)?;
    let magnitude: u64 = caps[1].parse().map_err(|_| invalid())?;
    if magnitude == 0 {
        return Err(invalid());
    }

    let multiplier = match caps[2].to_ascii_lowercase().as_str() {
        "m" => MINUTE,
        "h" => HOUR,
        "d" => DAY,
        "w" => WEEK,
        _ => return Err(invalid()),
    };

    magnitude
        .checked_mul(multiplier)
        .filter(|seconds| i64::try_from(*seconds).is_ok())
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_units() {
        assert_eq!(parse_duration("30m").unwrap(), 1800);
        assert_eq!(parse_duration("24h").unwrap(), 86400);
        assert_eq!(parse_duration("1d").unwrap(), 86400);
        assert_eq!(parse_duration("1w").unwrap(), 604800);
    }

    #[test]
    fn test_parse_is_case_insensitive_and_trims() {
        assert_eq!(parse_duration("  2H ").unwrap(), 7200);
        assert_eq!(parse_duration("15M").unwrap(), 900);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "   ", "abc", "-5m", "5x", "5", "m", "1.5h", "5 m", "0m", "+3h"] {
            assert!(
                matches!(parse_duration(bad), Err(RosterError::InvalidFormat(_))),
                "expected InvalidFormat for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(parse_duration("99999999999999999999w").is_err());
        assert!(parse_duration("30000000000000000w").is_err());
    }

    #[test]
    fn test_parse_rejects_durations_past_timestamp_range() {
        // Fits in u64 seconds but not in an i64 timestamp offset.
        assert!(matches!(
            parse_duration("20000000000000w"),
            Err(RosterError::InvalidFormat(_))
        ));
        assert!(parse_duration("15250284452472w").is_err());
        assert_eq!(
            parse_duration("15250284452471w").unwrap(),
            15_250_284_452_471 * WEEK
        );
    }
}
