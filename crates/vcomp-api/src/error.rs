//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vcomp_models::InvalidComposition;
use vcomp_pipeline::PipelineError;
use vcomp_state::StateError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid composition: {0}")]
    InvalidComposition(#[from] InvalidComposition),

    #[error("Rate limited")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(StateError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) | ApiError::InvalidComposition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Validation(_) => "invalid_request",
            ApiError::InvalidComposition(_) => "invalid_composition",
            ApiError::RateLimited => "rate_limited",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) | ApiError::Store(_) => "internal",
        }
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound(e.to_string())
        } else if e.is_transient() {
            ApiError::Unavailable(e.to_string())
        } else {
            ApiError::Store(e)
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidComposition(e) => ApiError::InvalidComposition(e),
            PipelineError::InvalidEvent(e) => ApiError::BadRequest(e.to_string()),
            e if e.is_transient() => ApiError::Unavailable(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
    /// Machine-readable rejection reason for invalid compositions
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) | ApiError::Store(_) | ApiError::Unavailable(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            ApiError::InvalidComposition(e) => e.to_string(),
            _ => self.to_string(),
        };

        let reason = match &self {
            ApiError::InvalidComposition(e) => Some(e.code()),
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                detail,
                code: self.code(),
                reason,
            }),
        )
            .into_response();

        // Encoder redelivers webhooks answered with 503
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("5"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::{JobId, JobState};

    #[test]
    fn test_invalid_composition_is_422() {
        let error = ApiError::from(PipelineError::from(InvalidComposition::EmptySegments));
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.code(), "invalid_composition");
    }

    #[test]
    fn test_not_ready_is_503() {
        let error = ApiError::from(PipelineError::NotReady {
            job_id: JobId::from_string("j"),
            state: JobState::Created,
        });
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
