//! FFmpeg CLI wrapper for the stage-2 compositing pass.
//!
//! This crate provides:
//! - FFmpeg command building and execution with timeout/cancellation
//! - FFprobe inspection of base clips
//! - Single-pass drawtext filter graphs for any number of overlays
//! - The [`Compositor`] seam used by workers

pub mod command;
pub mod compositor;
pub mod error;
pub mod overlay;
pub mod probe;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use compositor::{Compositor, FfmpegCompositor, RenderedClip};
pub use error::{MediaError, MediaResult};
pub use overlay::{build_overlay_filter, ffmpeg_color, write_overlay_text_files};
pub use probe::{probe_clip, ClipInfo};
