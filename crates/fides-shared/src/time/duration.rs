//! This module contains a common [`Duration`] struct which is able to parse
//! human-readable duration formats, like `365d`, `30s` or `1y 2h 20m`.
//!
//! It implements [`Deref`], which enables us to use all associated functions
//! of [`std::time::Duration`] without re-implementing the public functions on
//! our own type.
//!
//! All crates should opt for [`Duration`] instead of the plain
//! [`std::time::Duration`] when dealing with configurable durations, like
//! certificate validities or session lifetimes.
use std::{
    fmt::{Display, Write},
    num::ParseIntError,
    ops::Deref,
    str::FromStr,
};

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use strum::IntoEnumIterator;

#[derive(Debug, PartialEq, Snafu)]
pub enum DurationParseError {
    #[snafu(display("empty input"))]
    EmptyInput,

    #[snafu(display("unexpected character {chr:?}"))]
    UnexpectedCharacter { chr: char },

    #[snafu(display("fragment with value {value} has no unit"))]
    NoUnit { value: u64 },

    #[snafu(display("invalid unit {unit:?}"))]
    ParseUnit { unit: String },

    #[snafu(display("unit {unit} was specified more than once"))]
    DuplicateUnit { unit: DurationUnit },

    #[snafu(display("failed to parse fragment value as integer"))]
    ParseInt { source: ParseIntError },

    #[snafu(display("duration overflow"))]
    Overflow,
}

/// A [`Duration`] which is capable of parsing human-readable duration formats,
/// like `365d` or `1y 2h 20m`. It additionally provides serde support, which
/// makes it suited for configuration files and CLI arguments.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(std::time::Duration);

/// Units supported by the [`Duration`] parser, ordered from the largest to
/// the smallest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum DurationUnit {
    #[strum(serialize = "y")]
    Years,

    #[strum(serialize = "w")]
    Weeks,

    #[strum(serialize = "d")]
    Days,

    #[strum(serialize = "h")]
    Hours,

    #[strum(serialize = "m")]
    Minutes,

    #[strum(serialize = "s")]
    Seconds,

    #[strum(serialize = "ms")]
    Milliseconds,
}

impl FromStr for DurationUnit {
    type Err = DurationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let unit = match input {
            "y" | "year" | "years" => Self::Years,
            "w" | "week" | "weeks" => Self::Weeks,
            "d" | "day" | "days" => Self::Days,
            "h" | "hour" | "hours" => Self::Hours,
            "m" | "min" | "mins" | "minute" | "minutes" => Self::Minutes,
            "s" | "sec" | "secs" | "second" | "seconds" => Self::Seconds,
            "ms" => Self::Milliseconds,
            _ => {
                return ParseUnitSnafu { unit: input }.fail();
            }
        };

        Ok(unit)
    }
}

impl DurationUnit {
    /// The number of milliseconds one unit spans. A year is 365 days.
    const fn millis(&self) -> u128 {
        match self {
            Self::Years => 365 * 24 * 3_600_000,
            Self::Weeks => 7 * 24 * 3_600_000,
            Self::Days => 24 * 3_600_000,
            Self::Hours => 3_600_000,
            Self::Minutes => 60_000,
            Self::Seconds => 1_000,
            Self::Milliseconds => 1,
        }
    }
}

impl FromStr for Duration {
    type Err = DurationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        ensure!(!input.is_empty(), EmptyInputSnafu);

        let mut chars = input.char_indices().peekable();
        let mut seen_units = Vec::new();
        let mut millis: u128 = 0;

        while let Some((start, chr)) = chars.next() {
            if chr.is_whitespace() {
                continue;
            }
            ensure!(chr.is_ascii_digit(), UnexpectedCharacterSnafu { chr });

            let mut end = start + 1;
            while let Some((idx, _)) = chars.next_if(|(_, c)| c.is_ascii_digit()) {
                end = idx + 1;
            }
            let value: u64 = input[start..end].parse().context(ParseIntSnafu)?;

            while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

            let unit_start = chars.peek().map_or(input.len(), |(idx, _)| *idx);
            let mut unit_end = unit_start;
            while let Some((idx, _)) = chars.next_if(|(_, c)| c.is_ascii_alphabetic()) {
                unit_end = idx + 1;
            }
            ensure!(unit_end > unit_start, NoUnitSnafu { value });

            let unit: DurationUnit = input[unit_start..unit_end].parse()?;
            ensure!(!seen_units.contains(&unit), DuplicateUnitSnafu { unit });
            seen_units.push(unit);

            millis = u128::from(value)
                .checked_mul(unit.millis())
                .and_then(|fragment| millis.checked_add(fragment))
                .context(OverflowSnafu)?;
        }

        let millis = u64::try_from(millis).ok().context(OverflowSnafu)?;
        Ok(Self(std::time::Duration::from_millis(millis)))
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut remaining = self.0.as_millis();
        if remaining == 0 {
            return f.write_str("0s");
        }

        let mut out = String::new();
        for unit in DurationUnit::iter() {
            let amount = remaining / unit.millis();
            if amount > 0 {
                write!(out, "{amount}{unit}")?;
                remaining %= unit.millis();
            }
        }

        f.write_str(&out)
    }
}

impl Deref for Duration {
    type Target = std::time::Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Self(value)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        value.0
    }
}

impl Duration {
    /// Creates a new [`Duration`] from the specified number of whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    /// Creates a new [`Duration`] from the specified number of milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(std::time::Duration::from_millis(millis))
    }

    /// Creates a new [`Duration`] from the specified number of minutes. Panics
    /// (at compile time when used in a const context) if the value overflows.
    pub const fn from_minutes_unchecked(minutes: u64) -> Self {
        Self::from_secs(minutes * 60)
    }

    /// Creates a new [`Duration`] from the specified number of hours.
    pub const fn from_hours_unchecked(hours: u64) -> Self {
        Self::from_minutes_unchecked(hours * 60)
    }

    /// Creates a new [`Duration`] from the specified number of days.
    pub const fn from_days_unchecked(days: u64) -> Self {
        Self::from_hours_unchecked(days * 24)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("365d", 31_536_000)]
    #[case("30s", 30)]
    #[case("1y 2h 20m 42s", 31_544_442)]
    #[case("15d2m2s", 1_296_122)]
    #[case("1 hour", 3600)]
    #[case("2w", 1_209_600)]
    fn parse_as_secs(#[case] input: &str, #[case] output: u64) {
        let dur: Duration = input.parse().expect("valid duration");
        assert_eq!(dur.as_secs(), output);
    }

    #[rstest]
    #[case("", DurationParseError::EmptyInput)]
    #[case("d", DurationParseError::UnexpectedCharacter { chr: 'd' })]
    #[case("15", DurationParseError::NoUnit { value: 15 })]
    #[case("15x", DurationParseError::ParseUnit { unit: "x".to_owned() })]
    #[case("1d 2d", DurationParseError::DuplicateUnit { unit: DurationUnit::Days })]
    fn parse_invalid(#[case] input: &str, #[case] expected: DurationParseError) {
        let err = input.parse::<Duration>().expect_err("invalid duration");
        assert_eq!(err, expected);
    }

    #[rstest]
    #[case(Duration::from_days_unchecked(365), "1y")]
    #[case(Duration::from_secs(90), "1m30s")]
    #[case(Duration::from_millis(1_500), "1s500ms")]
    #[case(Duration::from_secs(0), "0s")]
    fn display(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(duration.to_string(), expected);
        assert_eq!(expected.parse::<Duration>().expect("valid duration"), duration);
    }

    #[test]
    fn const_constructors() {
        assert_eq!(Duration::from_minutes_unchecked(2).as_secs(), 120);
        assert_eq!(Duration::from_hours_unchecked(1).as_secs(), 3600);
        assert_eq!(Duration::from_days_unchecked(1).as_secs(), 86_400);
    }
}
