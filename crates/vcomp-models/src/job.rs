//! Job definitions and lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::composition::Composition;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object-storage key of a rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Created -> Stage1Submitted -> Stage1Complete -> Stage2Queued -> Stage2Complete -> NotifiedSuccess
///    \______________\_________________\________________\_______________\-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Created,
    Stage1Submitted,
    Stage1Complete,
    Stage2Queued,
    Stage2Complete,
    NotifiedSuccess,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Stage1Submitted => "stage1_submitted",
            JobState::Stage1Complete => "stage1_complete",
            JobState::Stage2Queued => "stage2_queued",
            JobState::Stage2Complete => "stage2_complete",
            JobState::NotifiedSuccess => "notified_success",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::NotifiedSuccess | JobState::Failed)
    }

    /// Position on the success path, used to detect "already at or past" states.
    fn rank(&self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Stage1Submitted => 1,
            JobState::Stage1Complete => 2,
            JobState::Stage2Queued => 3,
            JobState::Stage2Complete => 4,
            JobState::NotifiedSuccess => 5,
            JobState::Failed => u8::MAX,
        }
    }

    /// Whether this state is `other` or any later state (including Failed).
    pub fn is_at_or_past(&self, other: JobState) -> bool {
        self.rank() >= other.rank()
    }

    /// Allowed single-step transitions.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Created, JobState::Stage1Submitted)
            | (JobState::Stage1Submitted, JobState::Stage1Complete)
            | (JobState::Stage1Complete, JobState::Stage2Queued)
            | (JobState::Stage2Queued, JobState::Stage2Complete)
            | (JobState::Stage2Complete, JobState::NotifiedSuccess) => true,
            (current, JobState::Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Rough completion percentage for status polling.
    pub fn progress(&self) -> Option<u8> {
        match self {
            JobState::Created => Some(0),
            JobState::Stage1Submitted => Some(10),
            JobState::Stage1Complete => Some(45),
            JobState::Stage2Queued => Some(50),
            JobState::Stage2Complete => Some(95),
            JobState::NotifiedSuccess => Some(100),
            JobState::Failed => None,
        }
    }

    /// Coarse status string exposed to callers.
    pub fn public_status(&self) -> &'static str {
        match self {
            JobState::Created => "submitted",
            JobState::Stage1Submitted | JobState::Stage1Complete | JobState::Stage2Queued => {
                "processing"
            }
            JobState::Stage2Complete | JobState::NotifiedSuccess => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Stage1Submit,
    Stage1Render,
    Stage2Render,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Stage1Submit => "stage1_submit",
            FailureStage::Stage1Render => "stage1_render",
            FailureStage::Stage2Render => "stage2_render",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal failure details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub stage: FailureStage,
    pub reason: String,
}

impl JobFailure {
    pub fn new(stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Output of the stage-1 concatenation/encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Stage1Result {
    pub artifact_ref: ArtifactRef,
    /// Reported duration in seconds
    pub duration: f64,
}

/// Final composited video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinalResult {
    pub artifact_ref: ArtifactRef,
    pub duration: f64,
    pub rendered_at: DateTime<Utc>,
}

/// A state change together with the data it records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTransition {
    Stage1Submitted { external_handle: String },
    Stage1Complete { result: Stage1Result },
    Stage2Queued,
    Stage2Complete { result: FinalResult },
    NotifiedSuccess,
    Failed { failure: JobFailure },
}

impl JobTransition {
    pub fn failed(stage: FailureStage, reason: impl Into<String>) -> Self {
        JobTransition::Failed {
            failure: JobFailure::new(stage, reason),
        }
    }

    /// State the job is in after this transition.
    pub fn target_state(&self) -> JobState {
        match self {
            JobTransition::Stage1Submitted { .. } => JobState::Stage1Submitted,
            JobTransition::Stage1Complete { .. } => JobState::Stage1Complete,
            JobTransition::Stage2Queued => JobState::Stage2Queued,
            JobTransition::Stage2Complete { .. } => JobState::Stage2Complete,
            JobTransition::NotifiedSuccess => JobState::NotifiedSuccess,
            JobTransition::Failed { .. } => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// One render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    #[serde(default)]
    pub state: JobState,

    /// Normalized composition, immutable once dispatched
    pub composition: Composition,

    /// Where the final outcome is pushed
    pub callback_url: String,

    /// Handle assigned by the stage-1 encoder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_handle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage1_result: Option<Stage1Result>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<FinalResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Incremented on every applied transition
    #[serde(default)]
    pub version: u64,
}

impl Job {
    pub fn new(id: JobId, composition: Composition, callback_url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: JobState::Created,
            composition,
            callback_url: callback_url.into(),
            external_handle: None,
            stage1_result: None,
            final_result: None,
            failure: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Apply a transition, recording its payload.
    pub fn apply(&mut self, transition: JobTransition, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let next = transition.target_state();
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        match transition {
            JobTransition::Stage1Submitted { external_handle } => {
                self.external_handle = Some(external_handle);
            }
            JobTransition::Stage1Complete { result } => {
                self.stage1_result = Some(result);
            }
            JobTransition::Stage2Complete { result } => {
                // Overwritten, never appended
                self.final_result = Some(result);
            }
            JobTransition::Failed { failure } => {
                self.failure = Some(failure);
            }
            JobTransition::Stage2Queued | JobTransition::NotifiedSuccess => {}
        }

        self.state = next;
        self.updated_at = now;
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::Segment;

    fn job() -> Job {
        let composition = Composition {
            segments: vec![Segment {
                source_ref: "a.mp4".to_string(),
                duration: 4.0,
                order: 0,
            }],
            text_overlays: vec![],
            total_duration: 4.0,
        };
        Job::new(JobId::new(), composition, "https://caller.example.com/hook", Utc::now())
    }

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        let now = Utc::now();
        job.apply(JobTransition::Stage1Submitted { external_handle: "enc-1".into() }, now).unwrap();
        job.apply(
            JobTransition::Stage1Complete {
                result: Stage1Result {
                    artifact_ref: ArtifactRef::new("jobs/x/stage1.mp4"),
                    duration: 4.0,
                },
            },
            now,
        )
        .unwrap();
        job.apply(JobTransition::Stage2Queued, now).unwrap();
        job.apply(
            JobTransition::Stage2Complete {
                result: FinalResult {
                    artifact_ref: ArtifactRef::new("jobs/x/final.mp4"),
                    duration: 4.0,
                    rendered_at: now,
                },
            },
            now,
        )
        .unwrap();
        job.apply(JobTransition::NotifiedSuccess, now).unwrap();

        assert_eq!(job.state, JobState::NotifiedSuccess);
        assert_eq!(job.version, 5);
        assert_eq!(job.external_handle.as_deref(), Some("enc-1"));
        assert!(job.final_result.is_some());
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut job = job();
        let err = job.apply(JobTransition::Stage2Queued, Utc::now()).unwrap_err();
        assert_eq!(err.from, JobState::Created);
        assert_eq!(err.to, JobState::Stage2Queued);
        assert_eq!(job.version, 0);
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal_state() {
        for state in [
            JobState::Created,
            JobState::Stage1Submitted,
            JobState::Stage1Complete,
            JobState::Stage2Queued,
            JobState::Stage2Complete,
        ] {
            assert!(state.can_transition_to(JobState::Failed), "{}", state);
        }
        assert!(!JobState::Failed.can_transition_to(JobState::Failed));
        assert!(!JobState::NotifiedSuccess.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_at_or_past() {
        assert!(JobState::Stage2Queued.is_at_or_past(JobState::Stage2Queued));
        assert!(JobState::NotifiedSuccess.is_at_or_past(JobState::Stage2Queued));
        assert!(JobState::Failed.is_at_or_past(JobState::Stage2Queued));
        assert!(!JobState::Stage1Submitted.is_at_or_past(JobState::Stage2Queued));
    }

    #[test]
    fn test_transition_serialization_is_tagged() {
        let json = serde_json::to_value(JobTransition::failed(FailureStage::Stage1Render, "bad codec")).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["failure"]["stage"], "stage1_render");
    }
}
