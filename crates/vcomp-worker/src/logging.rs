//! Structured task logging.
//!
//! Every event carries the job id, the operation and the time elapsed since
//! the logger was created.

use std::time::Instant;

use tracing::{error, info, warn, Span};
use vcomp_models::JobId;

#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    started: Instant,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            started: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Task started: {}", message
        );
    }

    /// Log a completed step.
    pub fn log_step(&self, step: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            step,
            elapsed_ms = self.elapsed_ms(),
            "Task step done"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            elapsed_ms = self.elapsed_ms(),
            "Task warning: {}", message
        );
    }

    pub fn log_failure(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            elapsed_ms = self.elapsed_ms(),
            "Task failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            elapsed_ms = self.elapsed_ms(),
            "Task completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "task",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "composite");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation, "composite");
    }
}
