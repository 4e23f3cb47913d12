//! Store seams.

use std::time::Duration;

use async_trait::async_trait;
use vcomp_models::{CallbackRecord, DeliveryState, Job, JobId, JobState, JobTransition};

use crate::error::StateResult;

/// Sole owner of job records.
///
/// Transitions for one job are totally ordered: `transition` applies only
/// when the stored state equals `expected`, atomically with respect to
/// every other transition of the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Fails if the id exists.
    async fn create(&self, job: Job) -> StateResult<Job>;

    async fn get(&self, job_id: &JobId) -> StateResult<Job>;

    /// Apply `transition` if the job is currently in `expected`.
    ///
    /// Returns the updated job, or [`StateError::Conflict`] carrying the
    /// actual state when the precondition fails.
    ///
    /// [`StateError::Conflict`]: crate::StateError::Conflict
    async fn transition(&self, job_id: &JobId, expected: JobState, transition: JobTransition) -> StateResult<Job>;

    /// Job id recorded for a stage-1 encoder handle.
    async fn find_by_external_handle(&self, handle: &str) -> StateResult<Option<JobId>>;
}

/// Outcome of claiming a job's callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Caller owns delivery until the lease expires
    Claimed(CallbackRecord),
    /// Delivered or abandoned already; do not send
    Settled(CallbackRecord),
    /// Another notifier holds a live lease
    InProgress(CallbackRecord),
}

/// Per-job record of the final notification.
#[async_trait]
pub trait CallbackLedger: Send + Sync {
    /// Claim delivery for `job_id`, creating the record if absent. A pending
    /// record whose lease expired is taken over.
    async fn claim_callback(&self, job_id: &JobId, lease: Duration) -> StateResult<ClaimOutcome>;

    /// Record the final delivery outcome.
    async fn settle_callback(
        &self,
        job_id: &JobId,
        state: DeliveryState,
        attempts: u32,
        last_error: Option<String>,
    ) -> StateResult<CallbackRecord>;

    async fn get_callback(&self, job_id: &JobId) -> StateResult<Option<CallbackRecord>>;
}
