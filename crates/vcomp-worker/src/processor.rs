//! Compositing task processing.
//!
//! The job's stored state decides what a delivery still has to do, so a
//! redelivered task resumes rather than repeats: a finished render is only
//! finalized, a terminal job is only (re)notified. A render that does run
//! overwrites the job's single final artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vcomp_media::{Compositor, RenderedClip};
use vcomp_models::{FailureStage, FinalResult, Job, JobState, JobTransition, SharedClock, WorkerTask};
use vcomp_pipeline::CallbackNotifier;
use vcomp_state::JobStore;
use vcomp_storage::{final_key, ArtifactStore, VIDEO_CONTENT_TYPE};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// How a task was settled. Every outcome is acked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Rendered, uploaded and notified
    Completed,
    /// An earlier delivery already did the work
    AlreadyDone,
    /// The job was failed at `stage2_render`
    ContentFailure,
    /// No job record exists for the task
    Orphaned,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::AlreadyDone => "already_done",
            TaskOutcome::ContentFailure => "content_failure",
            TaskOutcome::Orphaned => "orphaned",
        }
    }
}

pub struct TaskProcessor {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    compositor: Arc<dyn Compositor>,
    notifier: Arc<CallbackNotifier>,
    clock: SharedClock,
    work_dir: PathBuf,
}

impl TaskProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        compositor: Arc<dyn Compositor>,
        notifier: Arc<CallbackNotifier>,
        clock: SharedClock,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            artifacts,
            compositor,
            notifier,
            clock,
            work_dir: work_dir.into(),
        }
    }

    pub async fn process(&self, task: &WorkerTask) -> WorkerResult<TaskOutcome> {
        let logger = JobLogger::new(&task.job_id, "composite");

        let mut job = match self.store.get(&task.job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                logger.log_warning("no job record for task");
                return Ok(TaskOutcome::Orphaned);
            }
            Err(e) => return Err(e.into()),
        };

        loop {
            match job.state {
                JobState::Stage2Queued => return self.render(job, task, &logger).await,
                // Task can arrive before the listener records the hand-off
                JobState::Stage1Complete => {
                    job = match self
                        .store
                        .transition(&job.id, JobState::Stage1Complete, JobTransition::Stage2Queued)
                        .await
                    {
                        Ok(job) => job,
                        Err(e) if e.is_conflict() => self.store.get(&job.id).await?,
                        Err(e) => return Err(e.into()),
                    };
                }
                JobState::Created | JobState::Stage1Submitted => {
                    return Err(WorkerError::transient(format!(
                        "job {} is {}, stage-1 result not recorded",
                        job.id, job.state
                    )));
                }
                JobState::Stage2Complete | JobState::NotifiedSuccess | JobState::Failed => {
                    logger.log_step("resume");
                    return self.resume(job).await;
                }
            }
        }
    }

    async fn render(&self, job: Job, task: &WorkerTask, logger: &JobLogger) -> WorkerResult<TaskOutcome> {
        logger.log_start(&format!(
            "{} overlays over {}",
            task.overlays.len(),
            task.base_clip.artifact_ref
        ));

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", job.id))
            .tempdir_in(&self.work_dir)?;
        let input = scratch.path().join("base.mp4");
        let output = scratch.path().join("final.mp4");

        let rendered = match self.download_and_composite(task, &input, &output, scratch.path(), logger).await {
            Ok(rendered) => rendered,
            Err(e) if !e.is_transient() => return self.fail(job, e.to_string(), logger).await,
            Err(e) => return Err(e),
        };

        let key = final_key(&job.id);
        self.artifacts
            .put_file(key.as_str(), &output, VIDEO_CONTENT_TYPE)
            .await?;
        logger.log_step("upload");

        let result = FinalResult {
            artifact_ref: key,
            duration: rendered.duration,
            rendered_at: self.clock.now(),
        };
        let job = match self
            .store
            .transition(&job.id, JobState::Stage2Queued, JobTransition::Stage2Complete { result })
            .await
        {
            Ok(job) => job,
            Err(e) if e.is_conflict() => {
                // Another delivery got there first; our upload replaced its
                // equivalent artifact
                let current = self.store.get(&job.id).await?;
                return self.resume(current).await;
            }
            Err(e) => return Err(e.into()),
        };

        self.finalize(job).await?;
        logger.log_completion(&format!("{:.2}s rendered, {} bytes", rendered.duration, rendered.size_bytes));
        Ok(TaskOutcome::Completed)
    }

    async fn download_and_composite(
        &self,
        task: &WorkerTask,
        input: &Path,
        output: &Path,
        scratch: &Path,
        logger: &JobLogger,
    ) -> WorkerResult<RenderedClip> {
        let base = task.base_clip.artifact_ref.as_str();
        match self.artifacts.get_file(base, input).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(WorkerError::content(format!("base clip {} does not exist", base)));
            }
            Err(e) => return Err(e.into()),
        }
        logger.log_step("download");

        let rendered = self.compositor.composite(input, output, scratch, &task.overlays).await?;
        logger.log_step("composite");
        Ok(rendered)
    }

    /// Finish a job whose render already happened, or whose outcome is final.
    async fn resume(&self, job: Job) -> WorkerResult<TaskOutcome> {
        match job.state {
            JobState::Stage2Complete => {
                self.finalize(job).await?;
                Ok(TaskOutcome::AlreadyDone)
            }
            JobState::NotifiedSuccess | JobState::Failed => {
                self.notifier.notify(&job).await?;
                Ok(TaskOutcome::AlreadyDone)
            }
            other => Err(WorkerError::transient(format!(
                "job {} unexpectedly moved to {}",
                job.id, other
            ))),
        }
    }

    async fn finalize(&self, job: Job) -> WorkerResult<()> {
        let job = match self
            .store
            .transition(&job.id, JobState::Stage2Complete, JobTransition::NotifiedSuccess)
            .await
        {
            Ok(job) => job,
            Err(e) if e.is_conflict() => self.store.get(&job.id).await?,
            Err(e) => return Err(e.into()),
        };

        self.notifier.notify(&job).await?;
        Ok(())
    }

    async fn fail(&self, job: Job, reason: String, logger: &JobLogger) -> WorkerResult<TaskOutcome> {
        logger.log_failure(&reason);

        let transition = JobTransition::failed(FailureStage::Stage2Render, reason);
        match self.store.transition(&job.id, JobState::Stage2Queued, transition).await {
            Ok(failed) => {
                self.notifier.notify(&failed).await?;
                Ok(TaskOutcome::ContentFailure)
            }
            Err(e) if e.is_conflict() => {
                let current = self.store.get(&job.id).await?;
                self.resume(current).await
            }
            Err(e) => Err(e.into()),
        }
    }
}
