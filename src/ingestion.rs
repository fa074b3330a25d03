//! Ingestion boundary: validate a batch of raw lines and append it
//!
//! A batch is all or nothing. Every line is checked with the same parser
//! the typed stage uses; one bad line rejects the whole batch and the
//! caller gets every failing line back with its 1-based position.

use crate::pipeline::db::append_raw_lines;
use crate::pipeline::error::PipelineError;
use crate::pipeline::parser::{parse_line, RejectReason};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineFailure {
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted {
        count: usize,
        first_id: i64,
        last_id: i64,
    },
    Rejected {
        failures: Vec<LineFailure>,
    },
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }
}

/// Check every line of `body`, returning the lines to store or the failures
///
/// Blank lines between readings are skipped. A body with nothing but
/// whitespace is a single `EmptyLine` failure on line 1.
pub fn validate_batch(body: &str) -> Result<Vec<&str>, Vec<LineFailure>> {
    let mut accepted = Vec::new();
    let mut failures = Vec::new();

    for (index, line) in body.split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(_) => accepted.push(line),
            Err(e) => failures.push(LineFailure {
                line_number: index + 1,
                line: line.to_string(),
                reason: e.reason.to_string(),
            }),
        }
    }

    if accepted.is_empty() && failures.is_empty() {
        failures.push(LineFailure {
            line_number: 1,
            line: body.to_string(),
            reason: RejectReason::EmptyLine.to_string(),
        });
    }

    if failures.is_empty() {
        Ok(accepted)
    } else {
        Err(failures)
    }
}

/// Validate `body` and append the accepted lines in one transaction
pub fn ingest_batch(conn: &mut Connection, body: &str) -> Result<IngestOutcome, PipelineError> {
    let lines = match validate_batch(body) {
        Ok(lines) => lines,
        Err(failures) => {
            for failure in &failures {
                log::warn!(
                    "⚠️  Rejected line {}: {} ({:?})",
                    failure.line_number,
                    failure.reason,
                    failure.line
                );
            }
            log::warn!("❌ Ingest batch rejected: {} bad line(s)", failures.len());
            return Ok(IngestOutcome::Rejected { failures });
        }
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let ids = append_raw_lines(&tx, &lines)?;
    tx.commit()?;

    let (first_id, last_id) = match (ids.first(), ids.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(PipelineError::invariant("accepted batch produced no rows")),
    };

    log::info!("📥 Ingested {} line(s) (ids {}..={})", ids.len(), first_id, last_id);

    Ok(IngestOutcome::Accepted {
        count: ids.len(),
        first_id,
        last_id,
    })
}
