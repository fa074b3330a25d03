//! Pipeline Runtime
//!
//! Opens the sensor store and runs the incremental pipeline on a fixed
//! cadence until CTRL+C or a fatal pipeline error.
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables:
//!   SENSOR_DB_PATH - SQLite database path (default: data/sensor_data.db)
//!   PIPELINE_INTERVAL_MS - Run cadence (default: 3600000)
//!   PIPELINE_BATCH_SIZE - Raw rows per typed pass (default: 10000)
//!   RETRY_MAX_ATTEMPTS / RETRY_INITIAL_DELAY_MS / RETRY_MAX_DELAY_MS

use dotenv::dotenv;
use log::{error, info};
use sensorline::pipeline::{pipeline_scheduler_task, ExponentialBackoff, PipelineRunner};
use sensorline::{PipelineConfig, PipelineEngine};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Sensor Pipeline Runtime");

    let config = PipelineConfig::from_env();
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Run interval: {}ms", config.run_interval_ms);
    info!("   ├─ Batch size: {}", config.batch_size);
    info!(
        "   └─ Retry: {} attempts, {}ms..{}ms",
        config.retry_max_attempts, config.retry_initial_delay_ms, config.retry_max_delay_ms
    );

    let engine = Arc::new(PipelineEngine::open(&config)?);
    if !engine.health_check() {
        error!("❌ Database health check failed: {}", config.db_path);
        return Err("database health check failed".into());
    }

    let runner: Arc<dyn PipelineRunner> = Arc::new(engine);
    let backoff = ExponentialBackoff::from_config(&config);
    let scheduler = pipeline_scheduler_task(runner, config.run_interval(), backoff);

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        result = scheduler => {
            if let Err(e) = result {
                error!("❌ Pipeline runtime stopped on error: {}", e);
                return Err(e.into());
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
        }
    }

    info!("✅ Pipeline runtime stopped");
    Ok(())
}
