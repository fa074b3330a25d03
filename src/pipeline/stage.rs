//! Generic incremental stage: select since watermark, transform, upsert,
//! advance watermark
//!
//! A stage pass is one IMMEDIATE transaction. SQLite takes the write lock
//! up front, so two passes of the same stage (in this process or another)
//! can never select the same window concurrently. The watermark row is
//! written in that same transaction, after the upsert; an error anywhere
//! drops the transaction and leaves both output and watermark untouched.

use super::error::PipelineError;
use super::types::{Rejection, StageReport, Watermark};
use super::watermark::WatermarkTracker;
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

/// What a stage made of one input
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<O> {
    Emit(O),
    /// Input error: recorded and skipped, never retried
    Reject(Rejection),
    /// Nothing to write for this input yet
    Pending,
}

/// An idempotent incremental materialization step
///
/// Implementations only describe the data; [`run_stage`] owns the
/// transaction and the watermark.
pub trait IncrementalStage {
    type Input;
    type Output;

    /// Key of this stage's row in `stage_watermarks`
    fn name(&self) -> &str;

    /// Inputs strictly newer than `since`
    fn select(&self, conn: &Connection, since: Watermark) -> Result<Vec<Self::Input>, PipelineError>;

    /// Position of `input` on the upstream clock
    fn watermark_of(&self, input: &Self::Input) -> Watermark;

    fn transform(
        &self,
        conn: &Connection,
        run_at: Watermark,
        input: Self::Input,
    ) -> Result<StageOutcome<Self::Output>, PipelineError>;

    /// Insert-or-replace by merge key; returns rows written
    fn upsert(&self, conn: &Connection, outputs: &[Self::Output]) -> Result<usize, PipelineError>;

    /// Timestamp stamped on this pass's output
    fn run_instant(&self, _conn: &Connection) -> Result<Watermark, PipelineError> {
        Ok(Watermark::from_datetime(Utc::now()))
    }
}

/// Run one pass of `stage` as a single serializable unit of work
pub fn run_stage<S: IncrementalStage>(
    conn: &mut Connection,
    tracker: &mut WatermarkTracker,
    stage: &S,
) -> Result<StageReport, PipelineError> {
    let name = stage.name().to_string();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let since = tracker.read(&tx, &name)?;
    let inputs = stage.select(&tx, since)?;

    if inputs.is_empty() {
        tx.commit()?;
        log::debug!("💤 Stage {}: nothing newer than {}", name, since);
        return Ok(StageReport::empty(&name, since));
    }

    let selected = inputs.len();
    let high_water = inputs
        .iter()
        .map(|input| stage.watermark_of(input))
        .max()
        .unwrap_or(since)
        .max(since);
    let run_at = stage.run_instant(&tx)?;

    let mut outputs = Vec::with_capacity(selected);
    let mut rejections = Vec::new();
    let mut pending = 0;

    for input in inputs {
        match stage.transform(&tx, run_at, input)? {
            StageOutcome::Emit(output) => outputs.push(output),
            StageOutcome::Reject(rejection) => {
                log::warn!(
                    "⚠️  Stage {}: skipping input {} ({}): {:?}",
                    name,
                    rejection.source_id,
                    rejection.reason,
                    rejection.input
                );
                rejections.push(rejection);
            }
            StageOutcome::Pending => pending += 1,
        }
    }

    let upserted = stage.upsert(&tx, &outputs)?;

    // Output first, then watermark, then one commit for both
    tracker.advance(&tx, &name, high_water, run_at)?;
    tx.commit()?;
    tracker.confirm(&name, high_water);

    log::info!(
        "✅ Stage {}: {} selected, {} upserted, {} rejected, {} pending | watermark {} → {}",
        name,
        selected,
        upserted,
        rejections.len(),
        pending,
        since,
        high_water
    );

    Ok(StageReport {
        stage: name,
        selected,
        upserted,
        rejected: rejections.len(),
        pending,
        watermark_before: since,
        watermark_after: high_water,
        rejections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::{append_raw_lines, open_in_memory, select_raw_since};
    use crate::pipeline::types::RawRecord;
    use rusqlite::params;

    /// Copies raw lines into a scratch table, rejecting lines that start
    /// with '!' and optionally failing the upsert.
    struct EchoStage {
        fail_upsert: bool,
    }

    impl IncrementalStage for EchoStage {
        type Input = RawRecord;
        type Output = (i64, String);

        fn name(&self) -> &str {
            "echo"
        }

        fn select(&self, conn: &Connection, since: Watermark) -> Result<Vec<RawRecord>, PipelineError> {
            select_raw_since(conn, since, 100)
        }

        fn watermark_of(&self, input: &RawRecord) -> Watermark {
            input.ingested_at
        }

        fn transform(
            &self,
            _conn: &Connection,
            _run_at: Watermark,
            input: RawRecord,
        ) -> Result<StageOutcome<(i64, String)>, PipelineError> {
            if input.text.starts_with('!') {
                return Ok(StageOutcome::Reject(Rejection {
                    source_id: input.id,
                    input: input.text,
                    reason: "bang".to_string(),
                }));
            }
            if input.text.is_empty() {
                return Ok(StageOutcome::Pending);
            }
            Ok(StageOutcome::Emit((input.id, input.text)))
        }

        fn upsert(&self, conn: &Connection, outputs: &[(i64, String)]) -> Result<usize, PipelineError> {
            for (id, text) in outputs {
                conn.execute(
                    "INSERT INTO echo (id, text) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET text = excluded.text",
                    params![id, text],
                )?;
            }
            if self.fail_upsert {
                return Err(PipelineError::invariant("injected upsert failure"));
            }
            Ok(outputs.len())
        }
    }

    fn setup(lines: &[&str]) -> Connection {
        let mut conn = open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE echo (id INTEGER PRIMARY KEY, text TEXT NOT NULL)")
            .unwrap();
        let tx = conn.transaction().unwrap();
        append_raw_lines(&tx, lines).unwrap();
        tx.commit().unwrap();
        conn
    }

    fn echo_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM echo", [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_run_stage_counts_and_advances() {
        let mut conn = setup(&["a", "!b", "c"]);
        let mut tracker = WatermarkTracker::new();

        let report = run_stage(&mut conn, &mut tracker, &EchoStage { fail_upsert: false }).unwrap();

        assert_eq!(report.selected, 3);
        assert_eq!(report.upserted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.rejections[0].reason, "bang");
        assert_eq!(report.watermark_before, Watermark::MIN);
        assert!(report.watermark_after > Watermark::MIN);
        assert_eq!(echo_count(&conn), 2);
        assert_eq!(tracker.read(&conn, "echo").unwrap(), report.watermark_after);
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let mut conn = setup(&["a", "b"]);
        let mut tracker = WatermarkTracker::new();
        let stage = EchoStage { fail_upsert: false };

        let first = run_stage(&mut conn, &mut tracker, &stage).unwrap();
        let second = run_stage(&mut conn, &mut tracker, &stage).unwrap();

        assert_eq!(second.selected, 0);
        assert_eq!(second.watermark_before, first.watermark_after);
        assert_eq!(second.watermark_after, first.watermark_after);
    }

    #[test]
    fn test_failed_upsert_rolls_back_output_and_watermark() {
        let mut conn = setup(&["a", "b"]);
        let mut tracker = WatermarkTracker::new();

        let err = run_stage(&mut conn, &mut tracker, &EchoStage { fail_upsert: true }).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));

        // Nothing from the failed pass survives
        assert_eq!(echo_count(&conn), 0);
        assert_eq!(tracker.read(&conn, "echo").unwrap(), Watermark::MIN);

        // The redo picks up the same window
        let report = run_stage(&mut conn, &mut tracker, &EchoStage { fail_upsert: false }).unwrap();
        assert_eq!(report.selected, 2);
        assert_eq!(echo_count(&conn), 2);
    }
}
