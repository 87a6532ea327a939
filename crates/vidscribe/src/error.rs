use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

/// Why an execution context stopped before the backend returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// A caller asked for the job to be stopped.
    Requested,
    /// The engine is shutting down.
    Shutdown,
    /// A newer task for the same job took over.
    Superseded,
    /// The overall per-job deadline elapsed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::Requested => write!(f, "cancelled by request"),
            CancelCause::Shutdown => write!(f, "cancelled: engine shutting down"),
            CancelCause::Superseded => write!(f, "cancelled: superseded by a newer attempt"),
            CancelCause::DeadlineExceeded => write!(f, "processing deadline exceeded"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidState {
        from: JobStatus,
        to: JobStatus,
        reason: String,
    },

    #[error("Job queue is full, retry later")]
    QueueFull,

    #[error("Transcription failed after {attempts} attempt(s): {message} (last output: {diagnostic})")]
    ExecutionFailed {
        attempts: u32,
        message: String,
        diagnostic: String,
    },

    #[error("Job {0}")]
    Cancelled(CancelCause),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[from] RepositoryError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Returns true if this error stems from context cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}

/// Errors surfaced by a job repository implementation.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by a transcription backend for a single attempt.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// Captured output of the failed call (stderr, response body, ...).
    pub diagnostic: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
