//! Stage-1 completion events sent by the external encoder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;

/// Terminal outcome reported by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Stage1Status {
    Completed {
        /// Storage key of the encoded base clip
        output_ref: String,
        /// Encoded duration in seconds
        duration: f64,
    },
    Failed {
        reason: String,
    },
}

/// Completion event, correlated to a job via the encoder's handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage1Event {
    pub external_handle: String,
    /// Our job id as sent on submission, when the encoder echoes it back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<JobId>,
    #[serde(flatten)]
    pub status: Stage1Status,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid event: {0}")]
    Invalid(&'static str),
}

impl Stage1Event {
    /// Parse and validate a raw event body.
    pub fn from_slice(body: &[u8]) -> Result<Self, EventError> {
        let event: Stage1Event = serde_json::from_slice(body)?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.external_handle.trim().is_empty() {
            return Err(EventError::Invalid("external_handle is empty"));
        }
        if let Stage1Status::Completed { output_ref, duration } = &self.status {
            if output_ref.trim().is_empty() {
                return Err(EventError::Invalid("output_ref is empty"));
            }
            if !duration.is_finite() || *duration <= 0.0 {
                return Err(EventError::Invalid("duration must be positive"));
            }
        }
        Ok(())
    }

    pub fn completed(external_handle: impl Into<String>, output_ref: impl Into<String>, duration: f64) -> Self {
        Self {
            external_handle: external_handle.into(),
            reference: None,
            status: Stage1Status::Completed {
                output_ref: output_ref.into(),
                duration,
            },
        }
    }

    pub fn failed(external_handle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            external_handle: external_handle.into(),
            reference: None,
            status: Stage1Status::Failed { reason: reason.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Stage1Status::Completed { .. })
    }
}
