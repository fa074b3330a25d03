//! Pipeline engine: owns the store and sequences the stages
//!
//! One run = typed stage until the raw backlog is drained, then one
//! aggregate pass. Each pass commits on its own, so a failure in the
//! aggregate pass keeps the typed work (and its watermark) and the next
//! run picks the aggregation up from where it stopped.

use super::aggregator::DailyPowerStage;
use super::db::{self, check_database_health, open_database, open_in_memory};
use super::error::PipelineError;
use super::merger::TypedMergeStage;
use super::quality::verify_tiers;
use super::stage::run_stage;
use super::types::{RunSummary, StageReport};
use super::watermark::WatermarkTracker;
use crate::config::PipelineConfig;
use crate::ingestion::{ingest_batch, IngestOutcome};
use crate::query::{query_readings, QueryRange, ReadingEntry};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

struct EngineState {
    conn: Connection,
    tracker: WatermarkTracker,
}

pub struct PipelineEngine {
    /// Held for the whole of a run; only runs contend on it
    run_guard: Mutex<()>,
    state: Mutex<EngineState>,
    typed_stage: TypedMergeStage,
    aggregate_stage: DailyPowerStage,
}

impl PipelineEngine {
    /// Open the database at `config.db_path`, creating schema if needed
    pub fn open(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let conn = open_database(&config.db_path)?;
        log::info!("✅ Pipeline engine opened: {}", config.db_path);
        Ok(Self::with_connection(conn, config))
    }

    /// Engine over a private in-memory database
    pub fn in_memory(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self::with_connection(open_in_memory()?, config))
    }

    fn with_connection(conn: Connection, config: &PipelineConfig) -> Self {
        Self {
            run_guard: Mutex::new(()),
            state: Mutex::new(EngineState {
                conn,
                tracker: WatermarkTracker::new(),
            }),
            typed_stage: TypedMergeStage::new(config.batch_size),
            aggregate_stage: DailyPowerStage::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run every stage once. Safe to call repeatedly; a call that overlaps
    /// a run already in flight returns a skipped summary.
    pub fn run_pipeline(&self) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();

        let _run = match self.run_guard.try_lock() {
            Ok(run) => run,
            Err(TryLockError::WouldBlock) => {
                log::info!("⏭️  Pipeline run already in progress, skipping");
                return Ok(RunSummary::skipped(started_at));
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        // Ingest and query calls only delay the run
        let mut guard = self.lock();
        log::info!("🔄 Pipeline run started");
        let state = &mut *guard;

        let typed = self.drain_typed(state).inspect_err(|e| {
            log::error!("❌ Typed stage failed: {}", e);
        })?;
        let aggregate = run_stage(&mut state.conn, &mut state.tracker, &self.aggregate_stage)
            .inspect_err(|e| {
                log::error!("❌ Aggregate stage failed: {}", e);
            })?;

        let quality_issues = verify_tiers(&state.conn)?;
        if quality_issues.is_empty() {
            log::debug!("✅ Data quality checks passed");
        }
        for issue in &quality_issues {
            log::warn!("⚠️  Data quality check {} failed: {}", issue.check, issue.detail);
        }

        let finished_at = Utc::now();
        log::info!(
            "✅ Pipeline run complete: typed {}/{} (rejected {}), {} days recomputed ({} pending) | {}ms",
            typed.upserted,
            typed.selected,
            typed.rejected,
            aggregate.upserted,
            aggregate.pending,
            (finished_at - started_at).num_milliseconds()
        );

        Ok(RunSummary {
            started_at,
            finished_at,
            skipped: false,
            typed: Some(typed),
            aggregate: Some(aggregate),
            quality_issues,
        })
    }

    /// One typed-stage pass on its own
    pub fn run_typed_stage(&self) -> Result<StageReport, PipelineError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        run_stage(&mut state.conn, &mut state.tracker, &self.typed_stage)
    }

    /// One aggregate-stage pass on its own
    pub fn run_aggregate_stage(&self) -> Result<StageReport, PipelineError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        run_stage(&mut state.conn, &mut state.tracker, &self.aggregate_stage)
    }

    fn drain_typed(&self, state: &mut EngineState) -> Result<StageReport, PipelineError> {
        let batch_size = self.typed_stage.batch_size();
        let mut total = run_stage(&mut state.conn, &mut state.tracker, &self.typed_stage)?;
        let mut drained = total.selected < batch_size;

        while !drained {
            let pass = run_stage(&mut state.conn, &mut state.tracker, &self.typed_stage)?;
            drained = pass.selected < batch_size;
            total.absorb(pass);
        }

        Ok(total)
    }

    /// Validate and append a batch of raw lines (all or nothing)
    pub fn ingest(&self, body: &str) -> Result<IngestOutcome, PipelineError> {
        let mut guard = self.lock();
        ingest_batch(&mut guard.conn, body)
    }

    /// Typed readings and daily Power in `range`
    pub fn query(&self, range: &QueryRange) -> Result<Vec<ReadingEntry>, PipelineError> {
        let guard = self.lock();
        query_readings(&guard.conn, range)
    }

    pub fn health_check(&self) -> bool {
        let guard = self.lock();
        check_database_health(&guard.conn)
    }

    /// Read-only access to the underlying store
    pub fn inspect<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let guard = self.lock();
        f(&guard.conn)
    }

    pub fn raw_count(&self) -> Result<i64, PipelineError> {
        self.inspect(db::count_raw)
    }
}

/// Async entry point for schedulers
///
/// Method names differ from the engine's own so calls on an
/// `Arc<PipelineEngine>` never pick the async version by accident.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Run every stage once
    async fn run(&self) -> Result<RunSummary, PipelineError>;

    /// Whether the store is reachable and has its schema
    async fn check_health(&self) -> bool;
}

#[async_trait]
impl PipelineRunner for Arc<PipelineEngine> {
    /// SQLite work runs on the blocking pool
    async fn run(&self) -> Result<RunSummary, PipelineError> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.run_pipeline())
            .await
            .map_err(|e| PipelineError::invariant(format!("pipeline run panicked: {}", e)))?
    }

    async fn check_health(&self) -> bool {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.health_check())
            .await
            .unwrap_or(false)
    }
}
