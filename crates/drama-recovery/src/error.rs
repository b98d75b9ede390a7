//! Recovery error types.

use thiserror::Error;

pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Failure of a single stage invocation, as reported by its handler.
///
/// The variant decides the job's fate: transient failures are rescheduled
/// until attempts are exhausted, permanent failures and unknown stages go
/// straight to the DLQ.
#[derive(Debug, Error)]
pub enum StageError {
    /// Network/timeout class failure; worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Bad payload or stage-side config; retrying will not help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Dispatcher configuration bug; fatal for this job only.
    #[error("no handler registered for stage: {0}")]
    Unknown(String),
}

impl StageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }
}

/// Errors of the recovery subsystem itself, as opposed to stage failures.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] drama_store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecoveryError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
