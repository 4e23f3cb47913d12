//! Worker fleet control.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AutoscalerError, AutoscalerResult};

/// Snapshot of the worker fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    /// Workers running or starting
    pub current: u32,
    /// Workers holding a task
    #[serde(default)]
    pub busy: u32,
}

/// Whatever runs the worker processes (instance group, deployment, ...).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fleet: Send + Sync {
    async fn status(&self) -> AutoscalerResult<FleetStatus>;

    /// Request `desired` workers. Idempotent.
    async fn scale_to(&self, desired: u32) -> AutoscalerResult<()>;
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Base URL of the fleet manager API
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl FleetConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("AUTOSCALER_FLEET_URL").unwrap_or(defaults.base_url),
            api_token: std::env::var("AUTOSCALER_FLEET_TOKEN").ok().filter(|s| !s.is_empty()),
            timeout: std::env::var("AUTOSCALER_FLEET_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

#[derive(Serialize)]
struct ScaleRequest {
    desired: u32,
}

/// Fleet manager reached over HTTP: `GET /fleet`, `PUT /fleet`.
pub struct HttpFleet {
    client: Client,
    config: FleetConfig,
}

impl HttpFleet {
    pub fn new(config: FleetConfig) -> AutoscalerResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!("{}/fleet", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> AutoscalerResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(AutoscalerError::FleetApi {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Fleet for HttpFleet {
    async fn status(&self) -> AutoscalerResult<FleetStatus> {
        let response = self.authorize(self.client.get(self.url())).send().await?;
        let status = Self::check(response).await?.json().await?;
        debug!(?status, "Fleet status");
        Ok(status)
    }

    async fn scale_to(&self, desired: u32) -> AutoscalerResult<()> {
        let response = self
            .authorize(self.client.put(self.url()))
            .json(&ScaleRequest { desired })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
