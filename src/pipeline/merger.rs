//! Typed store merger: raw ledger → typed readings
//!
//! Selects raw rows past the typed watermark, parses each line and upserts
//! the survivors keyed by raw id. Rejected lines are logged and skipped;
//! they are never retried because the raw row they came from never changes.

use super::db::{get_typed_reading, next_instant, select_raw_since, upsert_typed_readings};
use super::error::PipelineError;
use super::parser::parse_line;
use super::stage::{IncrementalStage, StageOutcome};
use super::types::{RawRecord, Rejection, TypedReading, Watermark, TYPED_STAGE};
use rusqlite::Connection;

pub struct TypedMergeStage {
    batch_size: usize,
}

impl TypedMergeStage {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl IncrementalStage for TypedMergeStage {
    type Input = RawRecord;
    type Output = TypedReading;

    fn name(&self) -> &str {
        TYPED_STAGE
    }

    fn select(&self, conn: &Connection, since: Watermark) -> Result<Vec<RawRecord>, PipelineError> {
        select_raw_since(conn, since, self.batch_size)
    }

    fn watermark_of(&self, input: &RawRecord) -> Watermark {
        input.ingested_at
    }

    /// `processed_at` must be unique per pass so the aggregate stage's
    /// strict filter never skips a pass that shares a clock tick.
    fn run_instant(&self, conn: &Connection) -> Result<Watermark, PipelineError> {
        next_instant(conn, "typed_readings", "processed_at")
    }

    fn transform(
        &self,
        conn: &Connection,
        run_at: Watermark,
        raw: RawRecord,
    ) -> Result<StageOutcome<TypedReading>, PipelineError> {
        let parsed = match parse_line(&raw.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(StageOutcome::Reject(Rejection {
                    source_id: raw.id,
                    input: raw.text,
                    reason: e.reason.to_string(),
                }))
            }
        };

        // Same raw row must always derive the same identity
        if let Some(existing) = get_typed_reading(conn, raw.id)? {
            if existing.metric_name != parsed.metric_name
                || existing.reading_time != parsed.reading_time
            {
                log::error!(
                    "❌ Merge key {} collision: stored ({}, {}) vs parsed ({}, {})",
                    raw.id,
                    existing.metric_name,
                    existing.reading_time,
                    parsed.metric_name,
                    parsed.reading_time
                );
                return Err(PipelineError::invariant(format!(
                    "merge key {} already holds {} at {}, raw line now yields {} at {}",
                    raw.id,
                    existing.metric_name,
                    existing.reading_time,
                    parsed.metric_name,
                    parsed.reading_time
                )));
            }
        }

        Ok(StageOutcome::Emit(TypedReading::from_parsed(raw.id, parsed, run_at)))
    }

    fn upsert(&self, conn: &Connection, outputs: &[TypedReading]) -> Result<usize, PipelineError> {
        upsert_typed_readings(conn, outputs)
    }
}
