//! Daily Power aggregator: typed readings → daily_power
//!
//! Change-scoped: only days with a typed row processed after the aggregate
//! watermark are recomputed, and each of those is recomputed from every
//! typed row of that day, so late and out-of-order readings land correctly.
//!
//! Power(day) = mean(Voltage of day) × mean(Current of day). A day missing
//! either metric gets no row; an existing row for it is left alone.

use super::db::upsert_daily_aggregates;
use super::error::PipelineError;
use super::stage::{IncrementalStage, StageOutcome};
use super::types::{DailyAggregate, Watermark, AGGREGATE_STAGE, CURRENT, POWER, VOLTAGE};
use chrono::NaiveDate;
use rusqlite::{params, Connection};

/// A day with typed rows newer than the aggregate watermark
#[derive(Debug, Clone, PartialEq)]
pub struct AffectedDay {
    pub day: NaiveDate,
    /// Highest `processed_at` among that day's new rows
    pub last_processed_at: Watermark,
}

#[derive(Debug, Default)]
pub struct DailyPowerStage;

impl DailyPowerStage {
    pub fn new() -> Self {
        Self
    }
}

/// mean(voltages) × mean(currents), or None if either side is empty
pub fn calculate_power(voltages: &[f64], currents: &[f64]) -> Option<f64> {
    let avg_voltage = mean(voltages)?;
    let avg_current = mean(currents)?;
    Some(avg_voltage * avg_current)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Current Voltage and Current values recorded for `day`
fn load_day_components(conn: &Connection, day: NaiveDate) -> Result<(Vec<f64>, Vec<f64>), PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT metric_name, metric_value
         FROM typed_readings
         WHERE reading_date = ?1 AND metric_name IN (?2, ?3)",
    )?;
    let rows = stmt.query_map(params![day, VOLTAGE, CURRENT], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut voltages = Vec::new();
    let mut currents = Vec::new();
    for row in rows {
        let (name, value) = row?;
        if name == VOLTAGE {
            voltages.push(value);
        } else {
            currents.push(value);
        }
    }

    Ok((voltages, currents))
}

impl IncrementalStage for DailyPowerStage {
    type Input = AffectedDay;
    type Output = DailyAggregate;

    fn name(&self) -> &str {
        AGGREGATE_STAGE
    }

    fn select(&self, conn: &Connection, since: Watermark) -> Result<Vec<AffectedDay>, PipelineError> {
        let mut stmt = conn.prepare(
            "SELECT reading_date, MAX(processed_at)
             FROM typed_readings
             WHERE processed_at > ?1
             GROUP BY reading_date
             ORDER BY reading_date ASC",
        )?;
        let rows = stmt.query_map(params![since.as_micros()], |row| {
            Ok(AffectedDay {
                day: row.get(0)?,
                last_processed_at: Watermark::from_micros(row.get(1)?),
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn watermark_of(&self, input: &AffectedDay) -> Watermark {
        input.last_processed_at
    }

    fn transform(
        &self,
        conn: &Connection,
        run_at: Watermark,
        input: AffectedDay,
    ) -> Result<StageOutcome<DailyAggregate>, PipelineError> {
        let (voltages, currents) = load_day_components(conn, input.day)?;

        match calculate_power(&voltages, &currents) {
            Some(power) => Ok(StageOutcome::Emit(DailyAggregate {
                day: input.day,
                metric_name: POWER.to_string(),
                metric_value: power,
                calculated_at: run_at,
            })),
            None => {
                log::debug!(
                    "⏳ {}: incomplete ({} Voltage, {} Current), no Power yet",
                    input.day,
                    voltages.len(),
                    currents.len()
                );
                Ok(StageOutcome::Pending)
            }
        }
    }

    fn upsert(&self, conn: &Connection, outputs: &[DailyAggregate]) -> Result<usize, PipelineError> {
        upsert_daily_aggregates(conn, outputs)
    }
}
