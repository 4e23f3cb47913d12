//! Object key layout. Every artifact lives under its job's prefix, so
//! rewriting an artifact replaces it instead of adding a new one.

use vcomp_models::{ArtifactRef, JobId};

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

const JOBS_PREFIX: &str = "jobs";

/// Key the stage-1 encoder writes the concatenated base clip to.
pub fn stage1_key(job_id: &JobId) -> ArtifactRef {
    ArtifactRef::new(format!("{}/{}/stage1.mp4", JOBS_PREFIX, job_id))
}

/// Key of the composited result.
pub fn final_key(job_id: &JobId) -> ArtifactRef {
    ArtifactRef::new(format!("{}/{}/final.mp4", JOBS_PREFIX, job_id))
}
