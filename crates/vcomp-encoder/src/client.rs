//! Stage-1 encoder HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{EncoderError, EncoderResult};
use crate::types::{HealthResponse, Stage1Request, Stage1Response};

/// Configuration for the encoder client.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Base URL of the encoder service
    pub base_url: String,
    /// Bearer token, if the encoder requires one
    pub api_key: Option<String>,
    /// Request timeout. Submission is fire-and-forget, so this stays short.
    pub timeout: Duration,
    /// Max retries for transport failures
    pub max_retries: u32,
    /// Public URL of our stage-1 webhook, forwarded on every submission
    pub webhook_url: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            webhook_url: None,
        }
    }
}

impl EncoderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ENCODER_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            api_key: std::env::var("ENCODER_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(
                std::env::var("ENCODER_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_retries: std::env::var("ENCODER_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            webhook_url: std::env::var("ENCODER_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
        }
    }
}

/// Submits stage-1 work. Returns the encoder's handle for the job; the
/// result arrives later as a [`vcomp_models::Stage1Event`].
#[async_trait]
pub trait Stage1Encoder: Send + Sync {
    async fn submit(&self, request: &Stage1Request) -> EncoderResult<String>;
}

/// HTTP client for the encoder service.
pub struct HttpEncoder {
    http: Client,
    config: EncoderConfig,
}

impl HttpEncoder {
    pub fn new(config: EncoderConfig) -> EncoderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(EncoderError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> EncoderResult<Self> {
        Self::new(EncoderConfig::from_env())
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Check if the encoder is healthy.
    pub async fn health_check(&self) -> EncoderResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Encoder health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Encoder health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn post_job(&self, url: &str, request: &Stage1Request) -> EncoderResult<Stage1Response> {
        let mut builder = self.http.post(url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body)
                .map_err(|e| EncoderError::InvalidResponse(format!("{}: {}", e, body)));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return Err(EncoderError::ServiceUnavailable(format!(
                "Encoder returned {}: {}",
                status, body
            )));
        }

        Err(EncoderError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> EncoderResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EncoderResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Encoder request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| EncoderError::ServiceUnavailable("Unknown error".to_string())))
    }
}

#[async_trait]
impl Stage1Encoder for HttpEncoder {
    async fn submit(&self, request: &Stage1Request) -> EncoderResult<String> {
        let url = format!("{}/jobs", self.config.base_url);
        let request = request.clone().with_webhook(
            request.webhook_url.clone().or_else(|| self.config.webhook_url.clone()),
        );

        debug!(job_id = %request.reference, segments = request.segments.len(), "Submitting stage-1 job to {}", url);

        let response = self.with_retry(|| self.post_job(&url, &request)).await?;
        if response.handle.trim().is_empty() {
            return Err(EncoderError::InvalidResponse("empty job handle".to_string()));
        }

        info!(job_id = %request.reference, handle = %response.handle, "Stage-1 job accepted");
        Ok(response.handle)
    }
}
