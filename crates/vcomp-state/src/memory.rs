//! In-memory state store for tests and single-process runs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use vcomp_models::{
    CallbackRecord, DeliveryState, Job, JobId, JobState, JobTransition, SharedClock,
};

use crate::error::{StateError, StateResult};
use crate::store::{CallbackLedger, ClaimOutcome, JobStore};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    handles: HashMap<String, JobId>,
    callbacks: HashMap<JobId, CallbackRecord>,
}

/// Job store and callback ledger behind a single lock.
#[derive(Debug)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    clock: SharedClock,
}

impl MemoryJobStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    pub async fn job_count(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> StateResult<Job> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StateError::AlreadyExists(job.id));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> StateResult<Job> {
        self.inner
            .lock()
            .await
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(job_id.clone()))
    }

    async fn transition(&self, job_id: &JobId, expected: JobState, transition: JobTransition) -> StateResult<Job> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StateError::NotFound(job_id.clone()))?;
        if job.state != expected {
            return Err(StateError::Conflict {
                job_id: job_id.clone(),
                expected,
                actual: job.state,
            });
        }

        let handle = match &transition {
            JobTransition::Stage1Submitted { external_handle } => Some(external_handle.clone()),
            _ => None,
        };
        job.apply(transition, now)?;
        let updated = job.clone();

        if let Some(handle) = handle {
            inner.handles.insert(handle, job_id.clone());
        }
        debug!(job_id = %job_id, state = %updated.state, "Job transitioned");
        Ok(updated)
    }

    async fn find_by_external_handle(&self, handle: &str) -> StateResult<Option<JobId>> {
        Ok(self.inner.lock().await.handles.get(handle).cloned())
    }
}

#[async_trait]
impl CallbackLedger for MemoryJobStore {
    async fn claim_callback(&self, job_id: &JobId, lease: Duration) -> StateResult<ClaimOutcome> {
        let now = self.clock.now();
        let lease_expires_at = now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.callbacks.get_mut(job_id) {
            if existing.state.is_settled() {
                return Ok(ClaimOutcome::Settled(existing.clone()));
            }
            if !existing.lease_expired(now) {
                return Ok(ClaimOutcome::InProgress(existing.clone()));
            }
            existing.lease_expires_at = lease_expires_at;
            existing.updated_at = now;
            return Ok(ClaimOutcome::Claimed(existing.clone()));
        }

        let record = CallbackRecord::claimed(job_id.clone(), now, lease_expires_at);
        inner.callbacks.insert(job_id.clone(), record.clone());
        Ok(ClaimOutcome::Claimed(record))
    }

    async fn settle_callback(
        &self,
        job_id: &JobId,
        state: DeliveryState,
        attempts: u32,
        last_error: Option<String>,
    ) -> StateResult<CallbackRecord> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let record = inner
            .callbacks
            .entry(job_id.clone())
            .or_insert_with(|| CallbackRecord::claimed(job_id.clone(), now, now));
        record.state = state;
        record.attempts = attempts;
        record.last_error = last_error;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn get_callback(&self, job_id: &JobId) -> StateResult<Option<CallbackRecord>> {
        Ok(self.inner.lock().await.callbacks.get(job_id).cloned())
    }
}
