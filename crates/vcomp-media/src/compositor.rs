//! Overlay burn-in over a stage-1 base clip.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use vcomp_models::{EncodingConfig, TextOverlay};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::overlay::{build_overlay_filter, write_overlay_text_files};
use crate::probe::probe_clip;

/// Rendered output of one compositing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedClip {
    /// Duration in seconds
    pub duration: f64,
    pub size_bytes: u64,
}

/// Burns overlays into a base clip in a single pass.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Render `overlays` onto `input`, writing `output`.
    ///
    /// `work_dir` is private to this call and may be used for scratch files.
    async fn composite(
        &self,
        input: &Path,
        output: &Path,
        work_dir: &Path,
        overlays: &[TextOverlay],
    ) -> MediaResult<RenderedClip>;
}

/// FFmpeg drawtext compositor.
#[derive(Debug, Clone)]
pub struct FfmpegCompositor {
    encoding: EncodingConfig,
    timeout: Duration,
}

impl FfmpegCompositor {
    pub fn new(encoding: EncodingConfig, timeout: Duration) -> Self {
        Self { encoding, timeout }
    }

    fn build_command(&self, input: &Path, output: &Path, filter: Option<String>, has_audio: bool) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(input, output);
        let cmd = match filter {
            // Nothing to burn: keep the base clip bit-exact
            None => cmd.stream_copy(),
            Some(filter) => {
                let cmd = cmd
                    .video_filter(filter)
                    .output_args(self.encoding.to_ffmpeg_args())
                    .output_args(["-pix_fmt", "yuv420p"]);
                if has_audio {
                    cmd.audio_codec("copy")
                } else {
                    cmd
                }
            }
        };
        cmd.faststart()
    }
}

#[async_trait]
impl Compositor for FfmpegCompositor {
    async fn composite(
        &self,
        input: &Path,
        output: &Path,
        work_dir: &Path,
        overlays: &[TextOverlay],
    ) -> MediaResult<RenderedClip> {
        let started = Instant::now();
        let base = probe_clip(input).await?;
        debug!(
            duration = base.duration,
            width = base.width,
            height = base.height,
            "Probed base clip"
        );

        let text_files = write_overlay_text_files(work_dir, overlays).await?;
        let filter = build_overlay_filter(overlays, &text_files)?;
        let cmd = self.build_command(input, output, filter, base.has_audio);

        let total = base.duration;
        FfmpegRunner::new()
            .with_timeout(self.timeout)
            .run_with_progress(&cmd, move |p| {
                if p.is_complete {
                    debug!("Compositing finished");
                } else {
                    debug!(percent = (p.fraction_of(total) * 100.0).round(), "Compositing");
                }
            })
            .await?;

        let rendered = probe_clip(output).await.map_err(|e| match e {
            // The input probed fine, so an unreadable output is not a content problem
            MediaError::CorruptInput(msg) => MediaError::internal(format!("rendered output unreadable: {}", msg)),
            other => other,
        })?;
        let size_bytes = tokio::fs::metadata(output).await?.len();

        let elapsed = started.elapsed();
        metrics::histogram!("vcomp_composite_duration_seconds").record(elapsed.as_secs_f64());
        info!(
            overlays = overlays.len(),
            duration = rendered.duration,
            size_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Composited clip"
        );

        Ok(RenderedClip {
            duration: rendered.duration,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::Position;

    #[test]
    fn test_no_overlays_stream_copies() {
        let compositor = FfmpegCompositor::new(EncodingConfig::default(), Duration::from_secs(60));
        let args = compositor
            .build_command(Path::new("in.mp4"), Path::new("out.mp4"), None, true)
            .build_args();
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
        assert!(!args.contains(&"-vf".to_string()));
    }

    #[test]
    fn test_overlays_reencode_video_and_copy_audio() {
        let compositor = FfmpegCompositor::new(EncodingConfig::default(), Duration::from_secs(60));
        let overlays = vec![TextOverlay::new("a", 0.0, 1.0, Position::new(1, 2))];
        let filter = build_overlay_filter(&overlays, &[Path::new("/w/overlay_0.txt").to_path_buf()]).unwrap();
        let args = compositor
            .build_command(Path::new("in.mp4"), Path::new("out.mp4"), filter, true)
            .build_args();

        assert_eq!(args.iter().filter(|a| *a == "-vf").count(), 1);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
    }
}
