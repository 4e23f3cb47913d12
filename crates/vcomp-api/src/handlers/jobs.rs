//! Job submission and status polling.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{info, warn};
use validator::Validate;

use vcomp_models::{JobId, JobStatusResponse, SubmitRequest, SubmitResponse};

use crate::error::{ApiError, ApiResult};
use crate::security::validate_callback_url;
use crate::state::AppState;

/// `POST /jobs`: validate, persist and hand the job to stage 1.
///
/// Responds 202 once the job is stored in `Created`; the encoder call runs
/// in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    validate_callback_url(&request.callback_url, state.config.allow_private_callbacks).map_err(ApiError::Validation)?;

    let response = state.dispatcher.submit(request).await?;
    info!(job_id = %response.job_id, "Job submitted");

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `GET /jobs/{job_id}`: the authoritative view of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = state.store.get(&job_id).await?;

    let mut response = JobStatusResponse::from(&job);
    if let Some(result_ref) = &response.result_ref {
        match state
            .artifacts
            .presign_get(result_ref.as_str(), state.config.download_url_ttl)
            .await
        {
            Ok(url) => response = response.with_download_url(url),
            Err(e) => warn!(job_id = %job_id, "Could not presign result: {}", e),
        }
    }

    Ok(Json(response))
}
