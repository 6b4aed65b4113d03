//! Duration strings for period fields.
//!
//! The tracker stores periods as whole minutes and counts a working day as
//! 8 hours and a working week as 5 days. Input accepts `w`, `d`, `h` and `m`
//! units (long names too), in any order, with or without spaces: `2h 30m`,
//! `1w2d`, `3 days`. A bare number is minutes.

use thiserror::Error;

/// Minutes in an hour.
pub const MINUTES_PER_HOUR: u64 = 60;
/// Working hours in a day.
pub const HOURS_PER_DAY: u64 = 8;
/// Working days in a week.
pub const DAYS_PER_WEEK: u64 = 5;

const MINUTES_PER_DAY: u64 = MINUTES_PER_HOUR * HOURS_PER_DAY;
const MINUTES_PER_WEEK: u64 = MINUTES_PER_DAY * DAYS_PER_WEEK;

/// A period string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period '{input}': {reason}")]
pub struct PeriodError {
    /// The rejected input.
    pub input: String,
    /// What was wrong with it.
    pub reason: String,
}

impl PeriodError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

fn unit_minutes(unit: &str) -> Option<u64> {
    match unit.to_ascii_lowercase().as_str() {
        "w" | "wk" | "week" | "weeks" => Some(MINUTES_PER_WEEK),
        "d" | "day" | "days" => Some(MINUTES_PER_DAY),
        "h" | "hr" | "hour" | "hours" => Some(MINUTES_PER_HOUR),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(1),
        _ => None,
    }
}

/// Parse a period string into minutes.
///
/// # Errors
///
/// Returns [`PeriodError`] for empty input, unknown units, a number without a
/// unit (other than a lone number), or a total that overflows.
pub fn parse(input: &str) -> Result<u64, PeriodError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PeriodError::new(input, "empty period"));
    }
    if let Ok(minutes) = trimmed.parse::<u64>() {
        return Ok(minutes);
    }

    let mut total: u64 = 0;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(PeriodError::new(input, "expected a number before each unit"));
        }
        let amount: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| PeriodError::new(input, "number too large"))?;
        rest = rest[digits_end..].trim_start();

        let unit_end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        if unit_end == 0 {
            return Err(PeriodError::new(
                input,
                "each number needs a unit (w, d, h or m)",
            ));
        }
        let unit = &rest[..unit_end];
        let scale = unit_minutes(unit)
            .ok_or_else(|| PeriodError::new(input, format!("unknown unit '{unit}'")))?;
        total = amount
            .checked_mul(scale)
            .and_then(|m| total.checked_add(m))
            .ok_or_else(|| PeriodError::new(input, "period too large"))?;
        rest = rest[unit_end..].trim_start_matches(|c: char| c.is_whitespace() || c == ',');
    }
    Ok(total)
}

/// Format minutes as a normalized period string, largest unit first.
#[must_use]
pub fn format(minutes: u64) -> String {
    if minutes == 0 {
        return "0m".to_string();
    }
    let parts = [
        (minutes / MINUTES_PER_WEEK, 'w'),
        (minutes % MINUTES_PER_WEEK / MINUTES_PER_DAY, 'd'),
        (minutes % MINUTES_PER_DAY / MINUTES_PER_HOUR, 'h'),
        (minutes % MINUTES_PER_HOUR, 'm'),
    ];
    parts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n}{unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case::hours_and_minutes("2h 30m", 150)]
    #[case::compact("2h30m", 150)]
    #[case::day("1d", 480)]
    #[case::week("1w", 2400)]
    #[case::long_units("3 days 4 hours", 3 * 480 + 4 * 60)]
    #[case::uppercase("1H", 60)]
    #[case::bare_number("90", 90)]
    #[case::comma("1d, 2h", 600)]
    fn test_parse(#[case] input: &str, #[case] minutes: u64) {
        assert_eq!(parse(input).unwrap(), minutes);
    }

    #[rstest]
    #[case::empty("")]
    #[case::no_unit("2h 30")]
    #[case::bad_unit("3 fortnights")]
    #[case::no_number("h")]
    #[case::negative("-1h")]
    #[case::overflow("99999999999999999999w")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(parse(input).is_err(), "{input} should be rejected");
    }

    #[rstest]
    #[case(0, "0m")]
    #[case(150, "2h 30m")]
    #[case(2400 + 480 + 61, "1w 1d 1h 1m")]
    #[case(480, "1d")]
    fn test_format(#[case] minutes: u64, #[case] expected: &str) {
        assert_eq!(format(minutes), expected);
    }

    proptest! {
        #[test]
        fn prop_format_then_parse_is_identity(minutes in 0u64..10_000_000) {
            prop_assert_eq!(parse(&format(minutes)).unwrap(), minutes);
        }

        #[test]
        fn prop_parse_accepts_any_unit_mix(w in 0u64..20, d in 0u64..20, h in 0u64..50, m in 0u64..200) {
            let input = format!("{w}w {d}d {h}h {m}m");
            let expected = w * MINUTES_PER_WEEK + d * MINUTES_PER_DAY + h * MINUTES_PER_HOUR + m;
            prop_assert_eq!(parse(&input).unwrap(), expected);
        }
    }
}
