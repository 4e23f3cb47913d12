//! Completion callback payload and delivery record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{ArtifactRef, Job, JobFailure, JobId, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

/// Body POSTed to the caller's callback URL.
///
/// Built only from the terminal job, so every send for a job carries the
/// same payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallbackPayload {
    pub job_id: JobId,
    pub status: CallbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl CallbackPayload {
    /// Payload for a terminal job; `None` while the job is still in flight.
    pub fn for_job(job: &Job) -> Option<Self> {
        match job.state {
            JobState::NotifiedSuccess => Some(Self {
                job_id: job.id.clone(),
                status: CallbackStatus::Completed,
                result_ref: job.final_result.as_ref().map(|r| r.artifact_ref.clone()),
                error: None,
            }),
            JobState::Failed => Some(Self {
                job_id: job.id.clone(),
                status: CallbackStatus::Failed,
                result_ref: None,
                error: job.failure.clone(),
            }),
            _ => None,
        }
    }
}

/// Delivery progress of a job's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Claimed by a notifier, not yet settled
    #[default]
    Pending,
    Delivered,
    /// Retries exhausted; status is available by polling only
    Abandoned,
}

impl DeliveryState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, DeliveryState::Pending)
    }
}

/// Tracks whether a job's final notification went out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallbackRecord {
    pub job_id: JobId,
    #[serde(default)]
    pub state: DeliveryState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// A pending claim older than this may be taken over
    pub lease_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallbackRecord {
    pub fn claimed(job_id: JobId, now: DateTime<Utc>, lease_expires_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            state: DeliveryState::Pending,
            attempts: 0,
            last_error: None,
            lease_expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == DeliveryState::Pending && now >= self.lease_expires_at
    }
}
