//! Stage-1 encoder webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use vcomp_models::Stage1Event;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{verify_signature, SIGNATURE_HEADER};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub outcome: &'static str,
}

/// `POST /webhooks/stage1`: terminal status from the external encoder.
///
/// Any 2xx tells the encoder to stop retrying, so unknown and duplicate
/// events are acknowledged. Transient failures (including an event that
/// raced ahead of its submission record) answer 503 so it retries.
pub async fn stage1_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    if let Some(secret) = &state.config.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            metrics::record_signature_failure();
            warn!("Rejected stage-1 webhook with bad signature");
            return Err(ApiError::unauthorized("invalid webhook signature"));
        }
    }

    let event = Stage1Event::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let outcome = state.listener.handle(&event).await.map_err(|e| {
        warn!(handle = %event.external_handle, "Stage-1 event not processed: {}", e);
        ApiError::from(e)
    })?;

    info!(handle = %event.external_handle, outcome = outcome.as_str(), "Stage-1 event handled");
    Ok(Json(WebhookAck {
        outcome: outcome.as_str(),
    }))
}
