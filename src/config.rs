//! Pipeline configuration from environment variables

use std::env;
use std::time::Duration;

/// Configuration for the pipeline engine and its scheduler
///
/// Loaded from environment variables with sensible defaults. Passed
/// explicitly into [`crate::PipelineEngine::open`]; nothing reads the
/// environment after startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Scheduler cadence in milliseconds
    pub run_interval_ms: u64,

    /// Maximum raw rows selected per typed-stage pass
    pub batch_size: usize,

    /// Retries for transient store errors before a run is reported failed
    pub retry_max_attempts: u32,

    /// First backoff delay in milliseconds
    pub retry_initial_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: "data/sensor_data.db".to_string(),
            run_interval_ms: 3_600_000,
            batch_size: 10_000,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 120_000,
            retry_max_delay_ms: 600_000,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SENSOR_DB_PATH` (default: data/sensor_data.db)
    /// - `PIPELINE_INTERVAL_MS` (default: 3600000, hourly)
    /// - `PIPELINE_BATCH_SIZE` (default: 10000)
    /// - `RETRY_MAX_ATTEMPTS` (default: 3)
    /// - `RETRY_INITIAL_DELAY_MS` (default: 120000, 2 minutes)
    /// - `RETRY_MAX_DELAY_MS` (default: 600000, 10 minutes)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env::var("SENSOR_DB_PATH").unwrap_or(defaults.db_path),

            run_interval_ms: parse_var("PIPELINE_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.run_interval_ms),

            batch_size: parse_var("PIPELINE_BATCH_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),

            retry_max_attempts: parse_var("RETRY_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry_max_attempts),

            retry_initial_delay_ms: parse_var("RETRY_INITIAL_DELAY_MS")
                .unwrap_or(defaults.retry_initial_delay_ms),

            retry_max_delay_ms: parse_var("RETRY_MAX_DELAY_MS")
                .unwrap_or(defaults.retry_max_delay_ms),
        }
    }

    pub fn run_interval(&self) -> Duration {
        Duration::from_millis(self.run_interval_ms)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
