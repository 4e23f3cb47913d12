//! Completion callback delivery.
//!
//! Push is best effort and pull is authoritative: the job is already in its
//! terminal state when a notification is attempted, so an abandoned
//! callback still leaves the outcome visible through status polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use vcomp_models::{CallbackPayload, DeliveryState, Job};
use vcomp_state::{CallbackLedger, ClaimOutcome};

use crate::control::Backoff;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

/// Callback delivery settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Attempts before the callback is abandoned
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// How long a claim protects an in-progress delivery. Must exceed the
    /// worst-case retry schedule.
    pub lease: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 5,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
            lease: Duration::from_secs(120),
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            timeout: secs("CALLBACK_TIMEOUT_SECS", defaults.timeout),
            max_attempts: std::env::var("CALLBACK_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_attempts),
            backoff: Backoff::new(
                std::env::var("CALLBACK_BACKOFF_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.base),
                secs("CALLBACK_BACKOFF_MAX_SECS", defaults.backoff.max),
            ),
            lease: secs("CALLBACK_LEASE_SECS", defaults.lease),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The receiver refused the payload; retrying will not help.
    #[error("callback rejected with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("callback delivery failed: {0}")]
    Failed(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Failed(_))
    }
}

/// Sends one callback attempt.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), DeliveryError>;
}

/// POSTs the payload as JSON.
pub struct HttpCallbackTransport {
    http: Client,
}

impl HttpCallbackTransport {
    pub fn new(timeout: Duration) -> PipelineResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Notification(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(url)
            .header("idempotency-key", payload.job_id.as_str())
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Failed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return Err(DeliveryError::Failed(format!("{}: {}", status, body)));
        }

        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// What happened to a notify request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// Retries exhausted or receiver refused; outcome is pull-only
    Abandoned,
    /// A previous notifier already settled this job's callback
    Suppressed,
    /// Another notifier holds the claim
    InProgress,
    /// Job has no final outcome yet
    NotTerminal,
}

impl NotifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyOutcome::Delivered => "delivered",
            NotifyOutcome::Abandoned => "abandoned",
            NotifyOutcome::Suppressed => "suppressed",
            NotifyOutcome::InProgress => "in_progress",
            NotifyOutcome::NotTerminal => "not_terminal",
        }
    }
}

/// Delivers each terminal job's callback at most once per settled record.
pub struct CallbackNotifier {
    ledger: Arc<dyn CallbackLedger>,
    transport: Arc<dyn CallbackTransport>,
    config: NotifierConfig,
}

impl CallbackNotifier {
    pub fn new(ledger: Arc<dyn CallbackLedger>, transport: Arc<dyn CallbackTransport>, config: NotifierConfig) -> Self {
        Self {
            ledger,
            transport,
            config,
        }
    }

    /// Notify the job's callback URL of its terminal outcome.
    ///
    /// Safe to call repeatedly: once the record is settled further calls
    /// are suppressed without sending.
    pub async fn notify(&self, job: &Job) -> PipelineResult<NotifyOutcome> {
        let Some(payload) = CallbackPayload::for_job(job) else {
            debug!(job_id = %job.id, state = %job.state, "Job not terminal, skipping callback");
            return Ok(NotifyOutcome::NotTerminal);
        };

        let record = match self.ledger.claim_callback(&job.id, self.config.lease).await? {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::Settled(record) => {
                debug!(job_id = %job.id, state = ?record.state, "Callback already settled");
                metrics::record_callback(NotifyOutcome::Suppressed.as_str());
                return Ok(NotifyOutcome::Suppressed);
            }
            ClaimOutcome::InProgress(_) => {
                debug!(job_id = %job.id, "Callback delivery in progress elsewhere");
                return Ok(NotifyOutcome::InProgress);
            }
        };

        let mut attempts = record.attempts;
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts {
            attempts += 1;
            match self.transport.deliver(&job.callback_url, &payload).await {
                Ok(()) => {
                    self.ledger
                        .settle_callback(&job.id, DeliveryState::Delivered, attempts, None)
                        .await?;
                    info!(job_id = %job.id, status = ?payload.status, attempts, "Callback delivered");
                    metrics::record_callback(NotifyOutcome::Delivered.as_str());
                    return Ok(NotifyOutcome::Delivered);
                }
                Err(e) => {
                    warn!(job_id = %job.id, attempt = attempt + 1, "Callback attempt failed: {}", e);
                    let retryable = e.is_retryable();
                    last_error = Some(e.to_string());
                    if !retryable {
                        break;
                    }
                    if attempt + 1 < self.config.max_attempts {
                        tokio::time::sleep(self.config.backoff.delay(attempt)).await;
                    }
                }
            }
        }

        self.ledger
            .settle_callback(&job.id, DeliveryState::Abandoned, attempts, last_error.clone())
            .await?;
        warn!(
            job_id = %job.id,
            attempts,
            error = last_error.as_deref().unwrap_or_default(),
            "Callback abandoned, outcome available by polling"
        );
        metrics::record_callback(NotifyOutcome::Abandoned.as_str());
        Ok(NotifyOutcome::Abandoned)
    }
}
