//! Video encoding configuration for the compositing pass.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 20;

/// Re-encode settings used when burning overlays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264", "h264_nvenc")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "veryfast", "medium")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            preset: default_preset(),
            crf: DEFAULT_CRF,
        }
    }
}

impl EncodingConfig {
    /// Read overrides from `ENCODE_CODEC`, `ENCODE_PRESET`, `ENCODE_CRF`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            codec: std::env::var("ENCODE_CODEC").unwrap_or(defaults.codec),
            preset: std::env::var("ENCODE_PRESET").unwrap_or(defaults.preset),
            crf: std::env::var("ENCODE_CRF")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|crf| *crf <= 51)
                .unwrap_or(defaults.crf),
        }
    }

    /// FFmpeg output arguments for the video stream.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
        ]
    }
}
