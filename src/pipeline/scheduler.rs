//! Scheduled pipeline runs
//!
//! The scheduler decides when a run happens; the engine decides what it
//! does. Every attempt starts with a health check. Failed health checks
//! and transient store errors are retried with exponential backoff.
//! Anything else ends the scheduler so an operator sees it.

use super::backoff::ExponentialBackoff;
use super::engine::PipelineRunner;
use super::error::PipelineError;
use super::types::RunSummary;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

async fn checked_run(runner: &dyn PipelineRunner) -> Result<RunSummary, PipelineError> {
    if !runner.check_health().await {
        return Err(PipelineError::Unhealthy(
            "database unreachable or schema missing".to_string(),
        ));
    }
    runner.run().await
}

/// Health-check and run the pipeline once, retrying retryable failures
///
/// Returns the last error once the backoff gives up.
pub async fn run_with_retry(
    runner: &dyn PipelineRunner,
    backoff: &mut ExponentialBackoff,
) -> Result<RunSummary, PipelineError> {
    backoff.reset();

    loop {
        match checked_run(runner).await {
            Ok(summary) => return Ok(summary),
            Err(e) if e.is_retryable() => {
                log::warn!("⚠️  Pipeline run failed (retryable): {}", e);
                if backoff.sleep().await.is_err() {
                    log::error!(
                        "❌ Giving up after {} retries: {}",
                        backoff.attempts(),
                        e
                    );
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Scheduler task - run the pipeline every `run_interval`
///
/// The first run starts immediately. Runs until a run fails with a
/// non-retryable error or retries are exhausted, and returns that error.
pub async fn pipeline_scheduler_task(
    runner: Arc<dyn PipelineRunner>,
    run_interval: Duration,
    mut backoff: ExponentialBackoff,
) -> Result<(), PipelineError> {
    log::info!("⏰ Starting pipeline scheduler (interval: {}ms)", run_interval.as_millis());

    let mut timer = interval(run_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        match run_with_retry(runner.as_ref(), &mut backoff).await {
            Ok(summary) => match serde_json::to_string(&summary) {
                Ok(json) => log::info!("📊 Run summary: {}", json),
                Err(e) => log::warn!("⚠️  Could not serialize run summary: {}", e),
            },
            Err(e) => {
                log::error!("❌ Pipeline scheduler stopping: {}", e);
                return Err(e);
            }
        }
    }
}
