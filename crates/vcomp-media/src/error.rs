//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// FFmpeg stderr fragments that mean the input itself is bad.
const CORRUPT_INPUT_MARKERS: &[&str] = &[
    "Invalid data found when processing input",
    "moov atom not found",
    "does not contain any stream",
    "Error while decoding stream",
    "corrupt decoded frame",
];

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Corrupt input clip: {0}")]
    CorruptInput(String),

    #[error("Overlay {index} cannot be rendered: {reason}")]
    UnrenderableOverlay { index: usize, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn unrenderable(index: usize, reason: impl Into<String>) -> Self {
        Self::UnrenderableOverlay {
            index,
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying with the same input can never succeed.
    ///
    /// Everything else (missing binaries, IO, timeouts, unexplained FFmpeg
    /// exits) is treated as an infrastructure problem.
    pub fn is_deterministic(&self) -> bool {
        match self {
            MediaError::CorruptInput(_) | MediaError::UnrenderableOverlay { .. } => true,
            MediaError::FfmpegFailed {
                stderr: Some(stderr),
                ..
            } => CORRUPT_INPUT_MARKERS.iter().any(|m| stderr.contains(m)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_classification() {
        assert!(MediaError::CorruptInput("truncated".into()).is_deterministic());
        assert!(MediaError::unrenderable(0, "bad color").is_deterministic());
        assert!(MediaError::ffmpeg_failed(
            "exit 1",
            Some("input.mp4: Invalid data found when processing input".into()),
            Some(1)
        )
        .is_deterministic());

        assert!(!MediaError::Timeout(600).is_deterministic());
        assert!(!MediaError::FfmpegNotFound.is_deterministic());
        assert!(!MediaError::ffmpeg_failed("killed", None, None).is_deterministic());
        assert!(!MediaError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            .is_deterministic());
    }
}
