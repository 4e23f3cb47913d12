//! Worker error types.
//!
//! Every failure is either transient (leave the task unacked so it is
//! delivered again) or a content failure (fail the job, ack the task).

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The task's inputs cannot be rendered, now or on any retry.
    #[error("Content failure: {0}")]
    Content(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vcomp_storage::StorageError),

    #[error("State store error: {0}")]
    State(#[from] vcomp_state::StateError),

    #[error("Media error: {0}")]
    Media(#[from] vcomp_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vcomp_queue::QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] vcomp_pipeline::PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn content(msg: impl Into<String>) -> Self {
        Self::Content(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether redelivering the task may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Content(_) | WorkerError::ConfigError(_) => false,
            WorkerError::Media(e) => !e.is_deterministic(),
            WorkerError::Storage(e) => !e.is_not_found(),
            WorkerError::State(e) => !matches!(
                e,
                vcomp_state::StateError::InvalidTransition(_) | vcomp_state::StateError::Corrupt(_)
            ),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_media::MediaError;

    #[test]
    fn test_classification() {
        assert!(!WorkerError::content("bad overlay").is_transient());
        assert!(!WorkerError::from(MediaError::CorruptInput("moov atom not found".into())).is_transient());
        assert!(WorkerError::from(MediaError::Timeout(600)).is_transient());
        assert!(WorkerError::from(vcomp_storage::StorageError::UploadFailed("503".into())).is_transient());
        assert!(!WorkerError::from(vcomp_storage::StorageError::not_found("jobs/j1/stage1.mp4")).is_transient());
        assert!(WorkerError::transient("redis").is_transient());
    }
}
