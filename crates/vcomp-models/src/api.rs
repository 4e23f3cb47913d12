//! Submission and status-polling DTOs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::composition::Composition;
use crate::job::{ArtifactRef, Job, JobFailure, JobId, JobState};

/// Render request from the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SubmitRequest {
    pub composition: Composition,

    #[validate(url)]
    pub callback_url: String,
}

/// Immediate response to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: String,
}

impl SubmitResponse {
    pub fn submitted(job_id: JobId) -> Self {
        Self {
            job_id,
            status: "submitted".to_string(),
        }
    }
}

/// `GET /jobs/{job_id}` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ArtifactRef>,
    /// Presigned URL for the result, when storage can issue one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusResponse {
    pub fn with_download_url(mut self, url: Option<String>) -> Self {
        self.download_url = url;
        self
    }
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.state.public_status().to_string(),
            state: job.state,
            progress: job.state.progress(),
            result_ref: job.final_result.as_ref().map(|r| r.artifact_ref.clone()),
            download_url: None,
            error: job.failure.clone(),
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_rejects_bad_callback_url() {
        let request: SubmitRequest = serde_json::from_str(
            r#"{"composition":{"segments":[{"source_ref":"a.mp4","duration":1}]},"callback_url":"not a url"}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());

        let request = SubmitRequest {
            callback_url: "https://caller.example.com/done".to_string(),
            ..request
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_status_of_new_job() {
        let job = Job::new(
            JobId::from_string("j"),
            serde_json::from_str(r#"{"segments":[]}"#).unwrap(),
            "https://caller.example.com/done",
            Utc::now(),
        );
        let status = JobStatusResponse::from(&job);
        assert_eq!(status.status, "submitted");
        assert_eq!(status.progress, Some(0));
        assert!(status.result_ref.is_none());
    }
}
