//! # Incremental sensor pipeline
//!
//! Each stage keeps a watermark in `stage_watermarks` and only looks at rows
//! stamped strictly after it. A stage pass is one transaction: select,
//! transform, upsert and advance the watermark, then commit. A pass that
//! fails leaves no trace and the next run repeats it.
//!
//! - `typed_readings` parses raw lines and upserts them keyed by raw id
//! - `daily_power` recomputes `avg(Voltage) * avg(Current)` for every day
//!   touched since its watermark, skipping days that lack either metric
//!
//! After both stages a run checks the tiers for consistency and reports
//! anything off in its summary.

pub mod aggregator;
pub mod backoff;
pub mod db;
pub mod engine;
pub mod error;
pub mod merger;
pub mod parser;
pub mod quality;
pub mod scheduler;
pub mod stage;
pub mod types;
pub mod watermark;

pub use aggregator::{calculate_power, DailyPowerStage};
pub use backoff::ExponentialBackoff;
pub use engine::{PipelineEngine, PipelineRunner};
pub use error::PipelineError;
pub use merger::TypedMergeStage;
pub use parser::{parse_line, ParseError, RejectReason};
pub use quality::{verify_tiers, QualityIssue};
pub use scheduler::{pipeline_scheduler_task, run_with_retry};
pub use stage::{run_stage, IncrementalStage, StageOutcome};
pub use types::{RunSummary, StageReport, Watermark};
pub use watermark::WatermarkTracker;
