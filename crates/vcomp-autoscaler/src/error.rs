//! Autoscaler error types.

use thiserror::Error;
use vcomp_queue::QueueError;

pub type AutoscalerResult<T> = Result<T, AutoscalerError>;

#[derive(Debug, Error)]
pub enum AutoscalerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Fleet API returned {status}: {message}")]
    FleetApi { status: u16, message: String },

    #[error("Fleet request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl AutoscalerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
