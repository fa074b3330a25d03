//! Line parser and validator
//!
//! Accepts `<epoch-seconds> <metric-name> <value>` separated by single
//! spaces. Rules run in order and the first failure wins, so the reason
//! always points at the leftmost bad token.

use super::types::ParsedReading;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyLine,
    MalformedLine,
    InvalidTimestamp,
    InvalidMetricName,
    InvalidValue,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyLine => "EmptyLine",
            RejectReason::MalformedLine => "MalformedLine",
            RejectReason::InvalidTimestamp => "InvalidTimestamp",
            RejectReason::InvalidMetricName => "InvalidMetricName",
            RejectReason::InvalidValue => "InvalidValue",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line that failed validation, with the input kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub input: String,
    pub reason: RejectReason,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.reason, self.input)
    }
}

impl std::error::Error for ParseError {}

pub fn parse_line(line: &str) -> Result<ParsedReading, ParseError> {
    let reject = |reason| ParseError {
        input: line.to_string(),
        reason,
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(reject(RejectReason::EmptyLine));
    }

    let tokens: Vec<&str> = trimmed.split(' ').collect();
    let [ts_token, name_token, value_token] = tokens.as_slice() else {
        return Err(reject(RejectReason::MalformedLine));
    };

    if !is_digits(ts_token) {
        return Err(reject(RejectReason::InvalidTimestamp));
    }
    // Digit-only but too large for an instant is still a bad timestamp
    let timestamp: i64 = ts_token
        .parse()
        .map_err(|_| reject(RejectReason::InvalidTimestamp))?;
    let reading_time: DateTime<Utc> = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| reject(RejectReason::InvalidTimestamp))?;

    if !name_token.chars().next().is_some_and(char::is_alphabetic) {
        return Err(reject(RejectReason::InvalidMetricName));
    }

    if !is_signed_decimal(value_token) {
        return Err(reject(RejectReason::InvalidValue));
    }
    let metric_value: f64 = value_token
        .parse()
        .map_err(|_| reject(RejectReason::InvalidValue))?;
    // Digits past f64 range parse to infinity
    if !metric_value.is_finite() {
        return Err(reject(RejectReason::InvalidValue));
    }

    Ok(ParsedReading {
        timestamp,
        metric_name: name_token.to_string(),
        metric_value,
        reading_time,
        reading_date: reading_time.date_naive(),
    })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `-?[0-9]+(\.[0-9]+)?`
fn is_signed_decimal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    match unsigned.split_once('.') {
        Some((int_part, frac_part)) => is_digits(int_part) && is_digits(frac_part),
        None => is_digits(unsigned),
    }
}
