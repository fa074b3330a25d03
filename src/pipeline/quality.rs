//! Post-run data checks over the typed and aggregate tiers
//!
//! Problems are reported, not fixed. A failing check never rolls back a
//! run; it shows up in the run summary and in the log.

use super::error::PipelineError;
use super::types::{CURRENT, VOLTAGE};
use rusqlite::{params, Connection};
use serde::Serialize;

/// Stored values that are NULL or ±infinity. NaN is stored by SQLite as NULL.
const NON_FINITE: &str = "metric_value IS NULL OR metric_value IN (9e999, -9e999)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityIssue {
    pub check: &'static str,
    pub detail: String,
}

impl QualityIssue {
    fn new(check: &'static str, detail: String) -> Self {
        Self { check, detail }
    }
}

/// Run every check and collect what failed
pub fn verify_tiers(conn: &Connection) -> Result<Vec<QualityIssue>, PipelineError> {
    let mut issues = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT merge_key, COUNT(*)
         FROM typed_readings
         GROUP BY merge_key
         HAVING COUNT(*) > 1",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (merge_key, count) = row?;
        issues.push(QualityIssue::new(
            "unique_merge_key",
            format!("merge key {} has {} typed rows", merge_key, count),
        ));
    }

    let mut stmt = conn.prepare(
        "SELECT p.day
         FROM daily_power p
         WHERE NOT EXISTS (
                 SELECT 1 FROM typed_readings t
                 WHERE t.reading_date = p.day AND t.metric_name = ?1)
            OR NOT EXISTS (
                 SELECT 1 FROM typed_readings t
                 WHERE t.reading_date = p.day AND t.metric_name = ?2)
         ORDER BY p.day",
    )?;
    let rows = stmt.query_map(params![VOLTAGE, CURRENT], |row| row.get::<_, String>(0))?;
    for row in rows {
        issues.push(QualityIssue::new(
            "power_has_components",
            format!("Power for {} without both Voltage and Current", row?),
        ));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT merge_key FROM typed_readings WHERE {} ORDER BY merge_key",
        NON_FINITE
    ))?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    for row in rows {
        issues.push(QualityIssue::new(
            "finite_typed_value",
            format!("typed row {} has a NULL or non-finite value", row?),
        ));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT day FROM daily_power WHERE {} ORDER BY day",
        NON_FINITE
    ))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for row in rows {
        issues.push(QualityIssue::new(
            "finite_power_value",
            format!("Power for {} is NULL or non-finite", row?),
        ));
    }

    Ok(issues)
}
