//! Expression evaluation seam
//!
//! Every condition, count, duration and argument string in an action is run
//! through an [`Evaluator`] against the live scope. The evaluator only ever
//! returns text; these helpers coerce that text into the type a directive
//! needs.

use crate::error::{ExpressionError, ExpressionResult};
use crate::runner::Scope;
use async_trait::async_trait;
use std::time::Duration;

/// Evaluates expression strings against the current scope
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, scope: &Scope, expression: &str) -> ExpressionResult<String>;
}

/// Parse a boolean the way condition results are written
///
/// Accepts `1, t, T, TRUE, true, True` and `0, f, F, FALSE, false, False`.
pub fn parse_bool(value: &str) -> ExpressionResult<bool> {
    match value.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(ExpressionError::Coercion {
            value: other.to_string(),
            expected: "a boolean",
        }),
    }
}

/// Parse a signed integer
pub fn parse_int(value: &str) -> ExpressionResult<i64> {
    value.trim().parse().map_err(|_| ExpressionError::Coercion {
        value: value.trim().to_string(),
        expected: "an integer",
    })
}

/// Parse a duration such as `90s`, `1m30s`, `250ms` or `1h`
///
/// A bare integer is a count of nanoseconds.
pub fn parse_duration(value: &str) -> ExpressionResult<Duration> {
    let value = value.trim();
    let invalid = || ExpressionError::Coercion {
        value: value.to_string(),
        expected: "a duration",
    };

    if value.is_empty() {
        return Err(invalid());
    }
    if let Ok(nanos) = value.parse::<u64>() {
        return Ok(Duration::from_nanos(nanos));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ns" => amount / 1e9,
            "us" | "µs" => amount / 1e6,
            "ms" => amount / 1e3,
            "s" => amount,
            "m" => amount * 60.0,
            "h" => amount * 3600.0,
            _ => return Err(invalid()),
        };
        total += Duration::from_secs_f64(seconds);
        rest = &rest[unit_len..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        for truthy in ["1", "t", "T", "TRUE", "true", "True", " true\n"] {
            assert!(parse_bool(truthy).unwrap(), "{truthy}");
        }
        for falsy in ["0", "f", "F", "FALSE", "false", "False"] {
            assert!(!parse_bool(falsy).unwrap(), "{falsy}");
        }
        assert!(matches!(
            parse_bool("yes"),
            Err(ExpressionError::Coercion { .. })
        ));
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" 3 ").unwrap(), 3);
        assert_eq!(parse_int("-1").unwrap(), -1);
        assert!(parse_int("three").is_err());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_parse_duration_bare_nanos() {
        assert_eq!(
            parse_duration("3000000000").unwrap(),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("s5").is_err());
    }
}
