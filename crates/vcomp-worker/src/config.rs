//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent tasks
    pub max_concurrent_jobs: usize,
    /// Long-poll wait per receive
    pub poll_wait: Duration,
    /// Deliveries after which a task is dead-lettered
    pub max_deliveries: u32,
    /// FFmpeg wall-clock limit per task
    pub ffmpeg_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: String,
    /// How often queue depth is sampled for metrics
    pub depth_report_interval: Duration,
    /// Prometheus listener port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_wait: Duration::from_secs(1),
            max_deliveries: 20,
            ffmpeg_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(60),
            work_dir: "/tmp/vcomp".to_string(),
            depth_report_interval: Duration::from_secs(15),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(2),
            poll_wait: Duration::from_millis(
                std::env::var("WORKER_POLL_WAIT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            ffmpeg_timeout: Duration::from_secs(
                std::env::var("WORKER_FFMPEG_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or_else(|_| "/tmp/vcomp".to_string()),
            depth_report_interval: Duration::from_secs(
                std::env::var("WORKER_DEPTH_REPORT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
            metrics_port: std::env::var("WORKER_METRICS_PORT").ok().and_then(|s| s.parse().ok()),
        }
    }
}
