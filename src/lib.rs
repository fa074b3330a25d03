//! Sensorline - incremental sensor reading pipeline
//!
//! Raw text lines are appended to a raw ledger, parsed into typed readings,
//! and folded into a daily Power aggregate. Each stage keeps its own
//! watermark so a run only touches what changed since the previous one.
//!
//! ```text
//! raw_readings ──(typed stage)──▶ typed_readings ──(aggregate stage)──▶ daily_power
//!      ▲                                                                   │
//!   ingest()                                                            query()
//! ```

pub mod config;
pub mod ingestion;
pub mod pipeline;
pub mod query;
pub mod sqlite_pragma;

pub use config::PipelineConfig;
pub use ingestion::{IngestOutcome, LineFailure};
pub use pipeline::{PipelineEngine, PipelineError, PipelineRunner, RunSummary};
pub use query::{QueryRange, ReadingEntry};
