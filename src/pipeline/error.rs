//! Pipeline error taxonomy
//!
//! Input errors never reach this type: a bad raw line becomes a
//! [`super::types::Rejection`] and the run carries on. What is left is
//! either worth retrying (the store was busy) or fatal for the run.

use rusqlite::ErrorCode;

#[derive(Debug)]
pub enum PipelineError {
    /// Store temporarily unavailable (locked, busy, cannot open). Retryable.
    TransientStore(rusqlite::Error),
    /// Any other storage failure. Not retried.
    Store(rusqlite::Error),
    /// Persisted state contradicts what the pipeline guarantees. The run
    /// aborts and no watermark moves.
    InvariantViolation(String),
    /// Health check failed before a run started. Retryable.
    Unhealthy(String),
    Io(std::io::Error),
}

impl PipelineError {
    /// Whether the caller of a stage may retry the whole run
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientStore(_) | PipelineError::Unhealthy(_)
        )
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        PipelineError::InvariantViolation(msg.into())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        let transient = matches!(
            err.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy)
                | Some(ErrorCode::DatabaseLocked)
                | Some(ErrorCode::CannotOpen)
        );
        if transient {
            PipelineError::TransientStore(err)
        } else {
            PipelineError::Store(err)
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::TransientStore(e) => write!(f, "Transient store error: {}", e),
            PipelineError::Store(e) => write!(f, "Store error: {}", e),
            PipelineError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
            PipelineError::Unhealthy(msg) => write!(f, "Store unhealthy: {}", msg),
            PipelineError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::TransientStore(e) | PipelineError::Store(e) => Some(e),
            PipelineError::Io(e) => Some(e),
            PipelineError::InvariantViolation(_) | PipelineError::Unhealthy(_) => None,
        }
    }
}
