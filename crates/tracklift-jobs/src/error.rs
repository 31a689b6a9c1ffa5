//! Job error types.

use std::time::Duration;
use thiserror::Error;
use tracklift_resilience::CircuitBreakerError;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job execution failed (transient, retried per policy).
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Job was cancelled.
    #[error("Job was cancelled")]
    Cancelled,

    /// Handler-reported timeout.
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// An upstream dependency's circuit breaker rejected the call.
    #[error("Circuit breaker open for service '{service}'")]
    CircuitOpen {
        service: String,
        retry_after: Option<Duration>,
    },

    /// No handler registered for the job's type.
    #[error("No handler registered for job type '{0}'")]
    UnknownJobType(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Operation illegal for the job's current state.
    #[error("Invalid state for job {job_id}: expected {expected}, got {actual}")]
    InvalidState {
        job_id: String,
        expected: String,
        actual: String,
    },

    /// Persistence layer error.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Worker error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Scheduler error.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if a failed attempt with this error may be retried.
    ///
    /// Handler business-logic failures and upstream unavailability are
    /// transient; a missing handler or an undecodable payload cannot be
    /// fixed by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::ExecutionFailed(_)
                | JobError::Timeout(_)
                | JobError::CircuitOpen { .. }
                | JobError::Persistence(_)
                | JobError::Worker(_)
        )
    }

    /// Returns the upstream retry hint, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JobError::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<tracklift_core::TrackliftError> for JobError {
    fn from(err: tracklift_core::TrackliftError) -> Self {
        match err {
            tracklift_core::TrackliftError::CircuitBreakerOpen(service) => JobError::CircuitOpen {
                service,
                retry_after: None,
            },
            tracklift_core::TrackliftError::Persistence(msg) => JobError::Persistence(msg),
            other => JobError::Internal(other.to_string()),
        }
    }
}

impl<E: std::fmt::Display> From<CircuitBreakerError<E>> for JobError {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open {
                service,
                retry_after,
            } => JobError::CircuitOpen {
                service,
                retry_after,
            },
            CircuitBreakerError::Failure(e) => JobError::ExecutionFailed(e.to_string()),
        }
    }
}
