//! Query boundary: readings and daily Power over a date range

use crate::pipeline::db::reading_time_at;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{CURRENT, POWER, VOLTAGE};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a query bound, treating naive input as UTC
pub fn parse_iso_date(input: &str) -> Option<DateTime<Utc>> {
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Half-open day range `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl QueryRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Both bounds are truncated to their date. A `to` given as a bare date
    /// includes that whole day.
    pub fn parse(from: &str, to: &str) -> Option<Self> {
        let from_date = parse_iso_date(from)?.date_naive();
        let mut to_date = parse_iso_date(to)?.date_naive();

        if !to.contains('T') {
            to_date = to_date.checked_add_days(Days::new(1))?;
        }

        Some(Self::new(from_date, to_date))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingEntry {
    pub time: String,
    pub name: String,
    pub value: f64,
}

/// Voltage and Current readings plus daily Power rows in `range`
///
/// Power is pinned to midnight UTC of its day. Results are ordered by
/// time then name.
pub fn query_readings(conn: &Connection, range: &QueryRange) -> Result<Vec<ReadingEntry>, PipelineError> {
    let mut rows: Vec<(DateTime<Utc>, String, f64)> = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT reading_time, metric_name, metric_value
         FROM typed_readings
         WHERE reading_date >= ?1 AND reading_date < ?2
           AND metric_name IN (?3, ?4)",
    )?;
    let typed = stmt.query_map(params![range.from, range.to, VOLTAGE, CURRENT], |row| {
        Ok((reading_time_at(row, 0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
    })?;
    for row in typed {
        rows.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT day, metric_value
         FROM daily_power
         WHERE day >= ?1 AND day < ?2",
    )?;
    let power = stmt.query_map(params![range.from, range.to], |row| {
        Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, f64>(1)?))
    })?;
    for row in power {
        let (day, value) = row?;
        rows.push((day.and_time(chrono::NaiveTime::MIN).and_utc(), POWER.to_string(), value));
    }

    rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    log::debug!(
        "🔍 Query {}..{} returned {} entries",
        range.from,
        range.to,
        rows.len()
    );

    Ok(rows
        .into_iter()
        .map(|(time, name, value)| ReadingEntry {
            time: format_timestamp(time),
            name,
            value,
        })
        .collect())
}
