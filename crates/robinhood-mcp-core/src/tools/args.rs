//! Argument validation for tool invocations.
//!
//! Everything here runs before any network access. A value that reaches a
//! [`ReadOperation`](crate::api::ReadOperation) has already been normalized.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Plausible ticker: a letter followed by up to nine letters, digits, dots or
/// dashes (covers class shares like `BRK.B` and `BF-B`).
static TICKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9.\-]{0,9}$").expect("ticker pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required argument '{0}'")]
    Missing(&'static str),

    #[error("Argument '{0}' must be a string")]
    NotAString(&'static str),

    #[error("Argument '{0}' must not be empty")]
    Empty(&'static str),

    #[error("Invalid ticker symbol '{0}'")]
    InvalidSymbol(String),

    #[error("Invalid interval '{0}'. Must be one of: 5minute, 10minute, hour, day, week")]
    InvalidInterval(String),

    #[error("Invalid span '{0}'. Must be one of: day, week, month, 3month, year, 5year")]
    InvalidSpan(String),
}

/// An uppercased, pattern-checked ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(String);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = ArgumentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(ArgumentError::Empty("symbol"));
        }
        if !TICKER_PATTERN.is_match(&normalized) {
            return Err(ArgumentError::InvalidSymbol(raw.trim().to_string()));
        }
        Ok(Symbol(normalized))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bar width for historical prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interval {
    FiveMinute,
    TenMinute,
    Hour,
    #[default]
    Day,
    Week,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::FiveMinute => "5minute",
            Interval::TenMinute => "10minute",
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
        }
    }
}

impl FromStr for Interval {
    type Err = ArgumentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "5minute" => Ok(Interval::FiveMinute),
            "10minute" => Ok(Interval::TenMinute),
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            "week" => Ok(Interval::Week),
            other => Err(ArgumentError::InvalidInterval(other.to_string())),
        }
    }
}

/// Time range covered by historical prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Span {
    Day,
    Week,
    #[default]
    Month,
    ThreeMonth,
    Year,
    FiveYear,
}

impl Span {
    pub fn as_str(&self) -> &'static str {
        match self {
            Span::Day => "day",
            Span::Week => "week",
            Span::Month => "month",
            Span::ThreeMonth => "3month",
            Span::Year => "year",
            Span::FiveYear => "5year",
        }
    }
}

impl FromStr for Span {
    type Err = ArgumentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "day" => Ok(Span::Day),
            "week" => Ok(Span::Week),
            "month" => Ok(Span::Month),
            "3month" => Ok(Span::ThreeMonth),
            "year" => Ok(Span::Year),
            "5year" => Ok(Span::FiveYear),
            other => Err(ArgumentError::InvalidSpan(other.to_string())),
        }
    }
}

/// Read an optional string argument. `null` counts as absent.
pub fn optional_str<'a>(
    args: &'a Map<String, Value>,
    name: &'static str,
) -> Result<Option<&'a str>, ArgumentError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ArgumentError::NotAString(name)),
    }
}

/// Read a required, non-blank string argument (trimmed).
pub fn required_str<'a>(
    args: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, ArgumentError> {
    let value = optional_str(args, name)?.ok_or(ArgumentError::Missing(name))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ArgumentError::Empty(name));
    }
    Ok(trimmed)
}

/// Parse an optional enumerated argument, falling back to its default.
pub fn parse_or_default<T>(
    args: &Map<String, Value>,
    name: &'static str,
) -> Result<T, ArgumentError>
where
    T: FromStr<Err = ArgumentError> + Default,
{
    match optional_str(args, name)? {
        Some(raw) => raw.parse(),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test arguments must be an object"),
        }
    }

    #[test]
    fn test_symbol_is_trimmed_and_uppercased() {
        assert_eq!("aapl".parse::<Symbol>().unwrap().as_str(), "AAPL");
        assert_eq!("  tsla ".parse::<Symbol>().unwrap().as_str(), "TSLA");
        assert_eq!("brk.b".parse::<Symbol>().unwrap().as_str(), "BRK.B");
        assert_eq!("bf-b".parse::<Symbol>().unwrap().as_str(), "BF-B");
    }

    #[test]
    fn test_symbol_rejects_implausible_tickers() {
        assert_eq!("".parse::<Symbol>(), Err(ArgumentError::Empty("symbol")));
        assert_eq!("   ".parse::<Symbol>(), Err(ArgumentError::Empty("symbol")));
        assert!(matches!("1ABC".parse::<Symbol>(), Err(ArgumentError::InvalidSymbol(_))));
        assert!(matches!("AAPL; DROP".parse::<Symbol>(), Err(ArgumentError::InvalidSymbol(_))));
        assert!(matches!("ABCDEFGHIJK".parse::<Symbol>(), Err(ArgumentError::InvalidSymbol(_))));
        assert!(matches!("../etc".parse::<Symbol>(), Err(ArgumentError::InvalidSymbol(_))));
    }

    #[test]
    fn test_interval_and_span_allowed_sets() {
        for raw in ["5minute", "10minute", "hour", "day", "week"] {
            assert_eq!(raw.parse::<Interval>().unwrap().as_str(), raw);
        }
        for raw in ["day", "week", "month", "3month", "year", "5year"] {
            assert_eq!(raw.parse::<Span>().unwrap().as_str(), raw);
        }
        assert_eq!(
            "minute".parse::<Interval>(),
            Err(ArgumentError::InvalidInterval("minute".to_string()))
        );
        assert_eq!("decade".parse::<Span>(), Err(ArgumentError::InvalidSpan("decade".to_string())));
    }

    #[test]
    fn test_defaults_apply_when_absent_or_null() {
        let empty = args(json!({}));
        assert_eq!(parse_or_default::<Interval>(&empty, "interval").unwrap(), Interval::Day);
        assert_eq!(parse_or_default::<Span>(&empty, "span").unwrap(), Span::Month);

        let nulls = args(json!({"interval": null}));
        assert_eq!(parse_or_default::<Interval>(&nulls, "interval").unwrap(), Interval::Day);
    }

    #[test]
    fn test_required_str() {
        let a = args(json!({"query": "  apple ", "blank": "  ", "num": 5}));
        assert_eq!(required_str(&a, "query").unwrap(), "apple");
        assert_eq!(required_str(&a, "blank"), Err(ArgumentError::Empty("blank")));
        assert_eq!(required_str(&a, "num"), Err(ArgumentError::NotAString("num")));
        assert_eq!(required_str(&a, "missing"), Err(ArgumentError::Missing("missing")));
    }
}
