//! Go-style duration strings (`1h23m4s`, `40s`, `500ms`).
//!
//! The store file and the configuration both use this notation. Formatting
//! always rounds to whole seconds; parsing accepts the full unit set
//! (`ns`, `us`/`µs`, `ms`, `s`, `m`, `h`) with optional decimal fractions.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Errors produced while parsing a duration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    /// The input was empty or whitespace-only.
    #[error("empty duration")]
    Empty,
    /// The input did not follow the `<number><unit>...` shape.
    #[error("invalid duration {0:?}")]
    Invalid(String),
    /// A number was not followed by a unit.
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    /// A unit was not one of the recognized suffixes.
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { input: String, unit: String },
    /// Negative durations cannot be represented.
    #[error("negative duration {0:?}")]
    Negative(String),
    /// The value does not fit in a `Duration`.
    #[error("duration {0:?} is too large")]
    Overflow(String),
}

/// Rounds a duration to the nearest whole second, halves away from zero.
pub fn round_to_second(duration: Duration) -> Duration {
    let secs = duration.as_secs();
    if duration.subsec_nanos() >= 500_000_000 {
        Duration::from_secs(secs.saturating_add(1))
    } else {
        Duration::from_secs(secs)
    }
}

/// Formats a duration as `XhYmZs`, rounded to the nearest second.
///
/// Leading zero components are omitted, inner ones are kept:
/// `0s`, `40s`, `1m30s`, `2h0m5s`.
pub fn format_duration(duration: Duration) -> String {
    let total = round_to_second(duration).as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Parses a Go-style duration string.
///
/// A bare `0` is accepted; every other number needs a unit. Components may be
/// chained (`1h30m`) and carry fractions (`1.5h`). Negative values are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if trimmed.starts_with('-') {
        return Err(DurationParseError::Negative(input.to_string()));
    }
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if body == "0" {
        return Ok(Duration::ZERO);
    }
    if body.is_empty() {
        return Err(DurationParseError::Invalid(input.to_string()));
    }

    let overflow = || DurationParseError::Overflow(input.to_string());
    let is_number_char = |c: char| c.is_ascii_digit() || c == '.';

    let mut rest = body;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number_char(c)).unwrap_or(rest.len());
        let number = &rest[..number_end];
        rest = &rest[number_end..];

        let unit_end = rest.find(is_number_char).unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        if number.is_empty() || number == "." {
            return Err(DurationParseError::Invalid(input.to_string()));
        }
        if unit.is_empty() {
            return Err(DurationParseError::MissingUnit(input.to_string()));
        }

        let scale = unit_scale(unit).ok_or_else(|| DurationParseError::UnknownUnit {
            input: input.to_string(),
            unit: unit.to_string(),
        })?;

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if fraction.contains('.') {
            return Err(DurationParseError::Invalid(input.to_string()));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut component = whole.checked_mul(scale).ok_or_else(overflow)?;

        // Digits past nanosecond precision of the largest unit cannot matter.
        let fraction = &fraction[..fraction.len().min(18)];
        if !fraction.is_empty() {
            let numerator: u128 = fraction
                .parse()
                .map_err(|_| DurationParseError::Invalid(input.to_string()))?;
            let exponent = u32::try_from(fraction.len()).map_err(|_| overflow())?;
            let denominator = 10u128.pow(exponent);
            let part = numerator.checked_mul(scale).ok_or_else(overflow)? / denominator;
            component = component.checked_add(part).ok_or_else(overflow)?;
        }

        total = total.checked_add(component).ok_or_else(overflow)?;
    }

    let secs = u64::try_from(total / NANOS_PER_SECOND).map_err(|_| overflow())?;
    let nanos = u32::try_from(total % NANOS_PER_SECOND).map_err(|_| overflow())?;
    Ok(Duration::new(secs, nanos))
}

fn unit_scale(unit: &str) -> Option<u128> {
    let scale = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SECOND,
        "m" => 60 * NANOS_PER_SECOND,
        "h" => 3600 * NANOS_PER_SECOND,
        _ => return None,
    };
    Some(scale)
}
