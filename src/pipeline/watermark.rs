//! Per-stage watermark tracking
//!
//! Watermarks live in `stage_watermarks` and are only ever written inside
//! the same transaction as the stage output they describe. The tracker also
//! remembers the highest value it has seen per stage, so a store that was
//! rewound behind this process's back is caught instead of silently
//! replayed or skipped.

use super::error::PipelineError;
use super::types::Watermark;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct WatermarkTracker {
    observed: HashMap<String, Watermark>,
}

impl WatermarkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current watermark of `stage`, or [`Watermark::MIN`] when unset
    pub fn read(&mut self, conn: &Connection, stage: &str) -> Result<Watermark, PipelineError> {
        let persisted: Option<i64> = conn
            .query_row(
                "SELECT value FROM stage_watermarks WHERE stage_name = ?1",
                params![stage],
                |row| row.get(0),
            )
            .optional()?;
        let current = persisted.map(Watermark::from_micros).unwrap_or(Watermark::MIN);

        if let Some(seen) = self.observed.get(stage) {
            if current < *seen {
                log::error!(
                    "❌ Watermark for {} regressed: store has {}, already observed {}",
                    stage,
                    current,
                    seen
                );
                return Err(PipelineError::invariant(format!(
                    "watermark for stage '{}' is {} but {} was already observed",
                    stage, current, seen
                )));
            }
        }

        self.observed.insert(stage.to_string(), current);
        Ok(current)
    }

    /// Move `stage` forward to `new_value`
    ///
    /// Must be called inside the transaction that wrote the stage output,
    /// after the upsert. Equal values are a no-op; lower values are an
    /// invariant violation.
    pub fn advance(
        &mut self,
        conn: &Connection,
        stage: &str,
        new_value: Watermark,
        updated_at: Watermark,
    ) -> Result<(), PipelineError> {
        let current = self.read(conn, stage)?;
        if new_value < current {
            return Err(PipelineError::invariant(format!(
                "refusing to move watermark for stage '{}' back from {} to {}",
                stage, current, new_value
            )));
        }
        if new_value == current {
            return Ok(());
        }

        conn.execute(
            "INSERT INTO stage_watermarks (stage_name, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(stage_name) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![stage, new_value.as_micros(), updated_at.as_micros()],
        )?;

        log::debug!("📍 Watermark {} advanced {} → {}", stage, current, new_value);
        Ok(())
    }

    /// Record `value` as observed once the surrounding transaction commits
    pub(crate) fn confirm(&mut self, stage: &str, value: Watermark) {
        let entry = self.observed.entry(stage.to_string()).or_insert(value);
        if value > *entry {
            *entry = value;
        }
    }
}
