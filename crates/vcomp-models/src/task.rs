//! Stage-2 work unit carried on the work queue.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::composition::TextOverlay;
use crate::job::{Job, JobId, Stage1Result};

/// Compositing task: burn `overlays` into the stage-1 base clip.
///
/// Carries a reference to the base clip, never raw bytes or segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkerTask {
    pub job_id: JobId,
    pub base_clip: Stage1Result,
    #[serde(default)]
    pub overlays: Vec<TextOverlay>,
}

impl WorkerTask {
    /// Build the task for a job whose stage-1 output is recorded.
    pub fn for_job(job: &Job) -> Option<Self> {
        let base_clip = job.stage1_result.clone()?;
        Some(Self {
            job_id: job.id.clone(),
            base_clip,
            overlays: job.composition.text_overlays.clone(),
        })
    }
}
