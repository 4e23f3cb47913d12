//! Pipeline error types.

use thiserror::Error;
use vcomp_encoder::EncoderError;
use vcomp_models::{EventError, InvalidComposition, JobId, JobState};
use vcomp_queue::QueueError;
use vcomp_state::StateError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidComposition(#[from] InvalidComposition),

    #[error(transparent)]
    InvalidEvent(#[from] EventError),

    /// Event arrived for a job whose stage-1 submission is not recorded yet.
    #[error("Job {job_id} is not ready for this event (state {state})")]
    NotReady { job_id: JobId, state: JobState },

    #[error("Store error: {0}")]
    Store(#[from] StateError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl PipelineError {
    /// Whether the caller should retry the same request later.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::NotReady { .. } | PipelineError::Queue(_) => true,
            PipelineError::Store(e) => e.is_transient(),
            // Anything short of a refusal may succeed on resubmission
            PipelineError::Encoder(e) => !e.is_rejection(),
            _ => false,
        }
    }
}
