//! Stage-1 completion handling.
//!
//! Events arrive at least once and possibly out of order relative to our
//! own bookkeeping. Every step is keyed on the job's stored state, so a
//! repeated event either resumes an interrupted hand-off or does nothing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use vcomp_models::{
    ArtifactRef, FailureStage, Job, JobId, JobState, JobTransition, Stage1Event, Stage1Result, Stage1Status,
    WorkerTask,
};
use vcomp_queue::{Enqueued, QueueMessage, WorkQueue};
use vcomp_state::{JobStore, StateError};

use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::notifier::CallbackNotifier;

/// What a stage-1 event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// Compositing task queued and job moved to `Stage2Queued`
    Enqueued,
    /// Job failed at `stage1_render` and the caller was notified
    Failed,
    /// Job already past this event; nothing changed
    Duplicate,
    /// No job matches the event's handle
    UnknownJob,
}

impl ListenerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerOutcome::Enqueued => "enqueued",
            ListenerOutcome::Failed => "failed",
            ListenerOutcome::Duplicate => "duplicate",
            ListenerOutcome::UnknownJob => "unknown_job",
        }
    }
}

pub struct CompletionListener {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    notifier: Arc<CallbackNotifier>,
}

impl CompletionListener {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>, notifier: Arc<CallbackNotifier>) -> Self {
        Self { store, queue, notifier }
    }

    pub async fn handle(&self, event: &Stage1Event) -> PipelineResult<ListenerOutcome> {
        event.validate()?;

        let Some(job_id) = self.resolve(event).await? else {
            warn!(handle = %event.external_handle, "Stage-1 event for unknown job, ignoring");
            metrics::record_stage1_event(ListenerOutcome::UnknownJob.as_str());
            return Ok(ListenerOutcome::UnknownJob);
        };

        let outcome = match &event.status {
            Stage1Status::Completed { output_ref, duration } => {
                let result = Stage1Result {
                    artifact_ref: ArtifactRef::new(output_ref.as_str()),
                    duration: *duration,
                };
                self.on_completed(&job_id, result).await?
            }
            Stage1Status::Failed { reason } => self.on_failed(&job_id, reason).await?,
        };

        metrics::record_stage1_event(outcome.as_str());
        Ok(outcome)
    }

    /// Map the encoder handle to a job, falling back to the echoed job id
    /// when the event beats our own record of the handle.
    ///
    /// The fallback only applies while the job has no handle recorded; an
    /// event whose handle differs from the recorded one belongs to some
    /// other encoder run and is not ours to act on.
    async fn resolve(&self, event: &Stage1Event) -> PipelineResult<Option<JobId>> {
        if let Some(job_id) = self.store.find_by_external_handle(&event.external_handle).await? {
            return Ok(Some(job_id));
        }

        let Some(reference) = &event.reference else {
            return Ok(None);
        };
        let job = match self.store.get(reference).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match job.external_handle.as_deref() {
            None => Ok(Some(job.id)),
            Some(recorded) if recorded == event.external_handle => Ok(Some(job.id)),
            Some(recorded) => {
                warn!(
                    job_id = %job.id,
                    recorded,
                    handle = %event.external_handle,
                    "Stage-1 event handle does not match the job's encoder run"
                );
                Ok(None)
            }
        }
    }

    async fn on_completed(&self, job_id: &JobId, result: Stage1Result) -> PipelineResult<ListenerOutcome> {
        loop {
            let job = self.store.get(job_id).await?;
            match job.state {
                JobState::Created => {
                    return Err(PipelineError::NotReady {
                        job_id: job.id,
                        state: job.state,
                    })
                }
                JobState::Stage1Submitted => {
                    let transition = JobTransition::Stage1Complete { result: result.clone() };
                    match self.store.transition(job_id, JobState::Stage1Submitted, transition).await {
                        Ok(job) => {
                            info!(job_id = %job.id, duration = result.duration, "Stage 1 complete");
                            self.enqueue(&job).await?;
                            return Ok(ListenerOutcome::Enqueued);
                        }
                        Err(e) if e.is_conflict() => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                // An earlier delivery recorded the result but stopped before
                // the task was queued
                JobState::Stage1Complete => {
                    self.enqueue(&job).await?;
                    return Ok(ListenerOutcome::Enqueued);
                }
                _ => {
                    debug!(job_id = %job.id, state = %job.state, "Duplicate stage-1 completion");
                    return Ok(ListenerOutcome::Duplicate);
                }
            }
        }
    }

    async fn enqueue(&self, job: &Job) -> PipelineResult<()> {
        let task = WorkerTask::for_job(job)
            .ok_or_else(|| StateError::Corrupt(format!("job {} has no stage-1 result", job.id)))?;
        let overlays = task.overlays.len();

        let enqueued = self.queue.enqueue(&QueueMessage::Composite(task)).await?;
        metrics::record_task_enqueued(enqueued == Enqueued::Duplicate);

        match self
            .store
            .transition(&job.id, JobState::Stage1Complete, JobTransition::Stage2Queued)
            .await
        {
            Ok(_) => {}
            // A worker that picked the task up first moves the job itself
            Err(e) if e.actual_state().is_some_and(|s| s.is_at_or_past(JobState::Stage2Queued)) => {}
            Err(e) => return Err(e.into()),
        }

        info!(job_id = %job.id, overlays, ?enqueued, "Compositing task queued");
        Ok(())
    }

    async fn on_failed(&self, job_id: &JobId, reason: &str) -> PipelineResult<ListenerOutcome> {
        loop {
            let job = self.store.get(job_id).await?;
            match job.state {
                JobState::Created | JobState::Stage1Submitted => {
                    let transition = JobTransition::failed(FailureStage::Stage1Render, reason);
                    match self.store.transition(job_id, job.state, transition).await {
                        Ok(failed) => {
                            warn!(job_id = %failed.id, reason, "Stage 1 render failed");
                            self.notify(&failed).await;
                            return Ok(ListenerOutcome::Failed);
                        }
                        Err(e) if e.is_conflict() => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                // Finish a notification an earlier delivery may not have sent
                JobState::Failed => {
                    self.notify(&job).await;
                    return Ok(ListenerOutcome::Duplicate);
                }
                _ => {
                    debug!(job_id = %job.id, state = %job.state, "Ignoring stage-1 failure for job past stage 1");
                    return Ok(ListenerOutcome::Duplicate);
                }
            }
        }
    }

    async fn notify(&self, job: &Job) {
        if let Err(e) = self.notifier.notify(job).await {
            warn!(job_id = %job.id, "Failure callback not sent: {}", e);
        }
    }
}
