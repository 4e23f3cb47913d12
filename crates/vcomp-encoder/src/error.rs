//! Encoder client error types.

use thiserror::Error;

pub type EncoderResult<T> = Result<T, EncoderError>;

#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder refused the request (4xx). Resubmitting the same input
    /// will not succeed.
    #[error("Encoder rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Encoder unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EncoderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EncoderError::ServiceUnavailable(_) | EncoderError::Network(_))
    }

    /// Whether the submission failed because of its content.
    pub fn is_rejection(&self) -> bool {
        matches!(self, EncoderError::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_not_retryable() {
        let err = EncoderError::Rejected {
            status: 422,
            message: "bad segment".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_rejection());
        assert!(EncoderError::ServiceUnavailable("503".into()).is_retryable());
    }
}
