//! Core data structures for the three tiers and the run reports

use super::quality::QualityIssue;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stage names as persisted in `stage_watermarks`
pub const TYPED_STAGE: &str = "typed_readings";
pub const AGGREGATE_STAGE: &str = "daily_power";

pub const VOLTAGE: &str = "Voltage";
pub const CURRENT: &str = "Current";
pub const POWER: &str = "Power";

/// Persisted high-water mark of a stage, in microseconds since the epoch
///
/// Unset stages read as [`Watermark::MIN`], which selects everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(i64);

impl Watermark {
    pub const MIN: Watermark = Watermark(i64::MIN);

    pub fn from_micros(micros: i64) -> Self {
        Watermark(micros)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Watermark(dt.timestamp_micros())
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn is_min(&self) -> bool {
        *self == Self::MIN
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_min() {
            return write!(f, "MIN");
        }
        match DateTime::from_timestamp_micros(self.0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.6fZ")),
            None => write!(f, "{}µs", self.0),
        }
    }
}

/// One accepted line in the raw ledger. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: i64,
    pub text: String,
    pub ingested_at: Watermark,
}

/// Parsed and validated content of one raw line
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReading {
    pub timestamp: i64,
    pub metric_name: String,
    pub metric_value: f64,
    pub reading_time: DateTime<Utc>,
    pub reading_date: NaiveDate,
}

/// Row of the typed tier, keyed by the raw id it was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct TypedReading {
    pub merge_key: i64,
    pub metric_name: String,
    pub metric_value: f64,
    pub reading_time: DateTime<Utc>,
    pub reading_date: NaiveDate,
    pub processed_at: Watermark,
}

impl TypedReading {
    pub fn from_parsed(merge_key: i64, parsed: ParsedReading, processed_at: Watermark) -> Self {
        Self {
            merge_key,
            metric_name: parsed.metric_name,
            metric_value: parsed.metric_value,
            reading_time: parsed.reading_time,
            reading_date: parsed.reading_date,
            processed_at,
        }
    }
}

/// Daily Power row; only exists for days with both Voltage and Current
#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregate {
    pub day: NaiveDate,
    pub metric_name: String,
    pub metric_value: f64,
    pub calculated_at: Watermark,
}

/// Diagnostic for an input that a stage refused to carry forward
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// Identity of the rejected input (the raw id for the typed stage)
    pub source_id: i64,
    pub input: String,
    pub reason: String,
}

/// Result of a single stage pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub selected: usize,
    pub upserted: usize,
    pub rejected: usize,
    /// Inputs that produced nothing yet (e.g. a day still missing Current)
    pub pending: usize,
    pub watermark_before: Watermark,
    pub watermark_after: Watermark,
    pub rejections: Vec<Rejection>,
}

impl StageReport {
    pub fn empty(stage: &str, watermark: Watermark) -> Self {
        Self {
            stage: stage.to_string(),
            selected: 0,
            upserted: 0,
            rejected: 0,
            pending: 0,
            watermark_before: watermark,
            watermark_after: watermark,
            rejections: Vec::new(),
        }
    }

    /// Fold a later pass of the same stage into this one
    pub fn absorb(&mut self, next: StageReport) {
        self.selected += next.selected;
        self.upserted += next.upserted;
        self.rejected += next.rejected;
        self.pending += next.pending;
        self.watermark_after = self.watermark_after.max(next.watermark_after);
        self.rejections.extend(next.rejections);
    }
}

/// Structured result of one `run_pipeline` invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when another run held the engine and this call did nothing
    pub skipped: bool,
    pub typed: Option<StageReport>,
    pub aggregate: Option<StageReport>,
    /// Post-run checks that failed; empty when the tiers are consistent
    pub quality_issues: Vec<QualityIssue>,
}

impl RunSummary {
    pub fn skipped(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            finished_at: at,
            skipped: true,
            typed: None,
            aggregate: None,
            quality_issues: Vec::new(),
        }
    }
}
