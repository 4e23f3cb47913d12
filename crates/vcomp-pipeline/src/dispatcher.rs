//! Stage-1 dispatch.
//!
//! Submission is split in two so the caller never waits on the encoder:
//! [`Dispatcher::accept`] validates and persists the job in `Created`, and
//! [`Dispatcher::dispatch`] hands it to the encoder and records the handle.
//! Only a refused submission fails the job; while the encoder or the store
//! is unavailable the job stays `Created` and dispatch is retried.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use vcomp_encoder::{Stage1Encoder, Stage1Request};
use vcomp_models::{
    Canvas, CompositionValidator, FailureStage, Job, JobId, JobState, JobTransition, SharedClock, SubmitRequest,
    SubmitResponse,
};
use vcomp_state::JobStore;
use vcomp_storage::stage1_key;

use crate::control::Backoff;
use crate::error::PipelineResult;
use crate::metrics;
use crate::notifier::CallbackNotifier;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Output canvas shared by the stage-1 encode and overlay coordinates
    pub canvas: Canvas,
    /// Delay between dispatch attempts while the encoder is unavailable
    pub retry_backoff: Backoff,
    /// Attempts before a job is left `Created`
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            retry_backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(60)),
            max_attempts: 6,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let dim = |name: &str, default: u32| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &u32| *v > 0)
                .unwrap_or(default)
        };
        Self {
            canvas: Canvas::new(
                dim("CANVAS_WIDTH", defaults.canvas.width),
                dim("CANVAS_HEIGHT", defaults.canvas.height),
            ),
            max_attempts: dim("DISPATCH_MAX_ATTEMPTS", defaults.max_attempts),
            ..defaults
        }
    }
}

pub struct Dispatcher {
    validator: CompositionValidator,
    store: Arc<dyn JobStore>,
    encoder: Arc<dyn Stage1Encoder>,
    notifier: Arc<CallbackNotifier>,
    clock: SharedClock,
    retry_backoff: Backoff,
    max_attempts: u32,
    in_flight: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn JobStore>,
        encoder: Arc<dyn Stage1Encoder>,
        notifier: Arc<CallbackNotifier>,
        clock: SharedClock,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            validator: CompositionValidator::new(config.canvas),
            store,
            encoder,
            notifier,
            clock,
            retry_backoff: config.retry_backoff,
            max_attempts: config.max_attempts.max(1),
            in_flight: Mutex::new(JoinSet::new()),
            shutdown,
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.validator.canvas()
    }

    /// Validate the composition and persist a `Created` job.
    ///
    /// An invalid composition is rejected synchronously and nothing is
    /// stored.
    pub async fn accept(&self, request: SubmitRequest) -> PipelineResult<Job> {
        let composition = match self.validator.validate(request.composition) {
            Ok(composition) => composition,
            Err(e) => {
                metrics::record_rejection(e.code());
                return Err(e.into());
            }
        };

        let job = Job::new(JobId::new(), composition, request.callback_url, self.clock.now());
        let job = self.store.create(job).await?;

        metrics::record_submission();
        info!(
            job_id = %job.id,
            segments = job.composition.segments.len(),
            overlays = job.composition.text_overlays.len(),
            total_duration = job.composition.total_duration,
            "Job created"
        );
        Ok(job)
    }

    /// Submit a `Created` job to the stage-1 encoder once.
    ///
    /// A refused submission fails the job at `stage1_submit` and notifies
    /// the caller. Any other error leaves the job `Created` and is returned
    /// for the caller to retry.
    pub async fn dispatch(&self, job: &Job) -> PipelineResult<Job> {
        let request = Stage1Request::from_composition(&job.id, &job.composition, self.canvas(), stage1_key(&job.id));

        let handle = match self.encoder.submit(&request).await {
            Ok(handle) => handle,
            Err(e) if e.is_rejection() => {
                metrics::record_stage1_submission("rejected");
                warn!(job_id = %job.id, "Stage 1 submission rejected: {}", e);
                return self.fail_submission(job, e.to_string()).await;
            }
            Err(e) => {
                metrics::record_stage1_submission("unavailable");
                warn!(job_id = %job.id, "Stage 1 encoder unavailable: {}", e);
                return Err(e.into());
            }
        };

        metrics::record_stage1_submission("accepted");
        let job = self.record_handle(&job.id, handle).await?;
        info!(job_id = %job.id, handle = job.external_handle.as_deref().unwrap_or_default(), "Stage 1 submitted");
        Ok(job)
    }

    /// [`dispatch`](Self::dispatch), retried with backoff while the failure
    /// is transient. Stops early on shutdown or once the job has left
    /// `Created`; a job whose attempts run out stays `Created`.
    pub async fn dispatch_with_retry(&self, job: &Job) -> PipelineResult<Job> {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt = 0;

        loop {
            let err = match self.dispatch(job).await {
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => e,
                result => return result,
            };

            let delay = self.retry_backoff.delay(attempt);
            attempt += 1;
            warn!(job_id = %job.id, attempt, ?delay, "Stage 1 dispatch will be retried: {}", err);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => return Err(err),
            }

            if let Ok(current) = self.store.get(&job.id).await {
                if current.state != JobState::Created {
                    return Ok(current);
                }
            }
        }
    }

    /// Record the encoder's handle. The encoder already holds the work, so
    /// a transient store failure is retried rather than surfaced.
    async fn record_handle(&self, job_id: &JobId, handle: String) -> PipelineResult<Job> {
        let mut attempt = 0;
        loop {
            let transition = JobTransition::Stage1Submitted {
                external_handle: handle.clone(),
            };
            match self.store.transition(job_id, JobState::Created, transition).await {
                Ok(job) => return Ok(job),
                // An earlier attempt for this job got its handle recorded first
                Err(e) if e.is_conflict() => return Ok(self.store.get(job_id).await?),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    warn!(job_id = %job_id, %handle, attempt, "Recording stage-1 handle failed: {}", e);
                    tokio::time::sleep(self.retry_backoff.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn fail_submission(&self, job: &Job, reason: String) -> PipelineResult<Job> {
        let failed = match self
            .store
            .transition(
                &job.id,
                JobState::Created,
                JobTransition::failed(FailureStage::Stage1Submit, reason),
            )
            .await
        {
            Ok(failed) => failed,
            Err(e) if e.is_conflict() => return Ok(self.store.get(&job.id).await?),
            Err(e) => return Err(e.into()),
        };

        if let Err(notify_err) = self.notifier.notify(&failed).await {
            warn!(job_id = %failed.id, "Failure callback not sent: {}", notify_err);
        }
        Ok(failed)
    }

    /// Accept the request and dispatch stage 1 in the background.
    ///
    /// Returns as soon as the `Created` job is persisted.
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> PipelineResult<SubmitResponse> {
        let job = self.accept(request).await?;
        let response = SubmitResponse::submitted(job.id.clone());

        let dispatcher = Arc::clone(self);
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            while in_flight.try_join_next().is_some() {}
            in_flight.spawn(async move {
                if let Err(e) = dispatcher.dispatch_with_retry(&job).await {
                    error!(job_id = %job.id, "Stage 1 dispatch gave up, job left created: {}", e);
                }
            });
        }

        Ok(response)
    }

    /// Background dispatches not yet finished.
    pub fn in_flight(&self) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.try_join_next().is_some() {}
        in_flight.len()
    }

    /// Stop retrying and wait up to `timeout` for background dispatches to
    /// finish. Dispatches still running afterwards are aborted; their jobs
    /// stay `Created`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.send_replace(true);

        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner));
        if in_flight.is_empty() {
            return;
        }
        info!(pending = in_flight.len(), "Draining stage 1 dispatches");

        let drained = tokio::time::timeout(timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = in_flight.len(), "Stage 1 dispatches still running after {:?}", timeout);
            in_flight.shutdown().await;
        }
    }
}

/// Resolves once shutdown has been signalled.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}
