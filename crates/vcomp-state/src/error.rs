//! State store error types.

use thiserror::Error;
use vcomp_models::{InvalidTransition, JobId, JobState};

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    /// The compare-and-set precondition did not hold.
    #[error("Job {job_id} is {actual}, expected {expected}")]
    Conflict {
        job_id: JobId,
        expected: JobState,
        actual: JobState,
    },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Update contention on job {0}")]
    Contention(JobId),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }

    /// Current state reported by a failed precondition.
    pub fn actual_state(&self) -> Option<JobState> {
        match self {
            StateError::Conflict { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    /// Whether the store itself was unavailable, as opposed to the request
    /// being rejected.
    pub fn is_transient(&self) -> bool {
        matches!(self, StateError::Redis(_) | StateError::Contention(_))
    }
}
