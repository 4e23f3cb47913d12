//! Wire types exchanged with the stage-1 encoder.

use serde::{Deserialize, Serialize};

use vcomp_models::{ArtifactRef, Canvas, Composition, JobId};

/// One input of the concatenation, in timeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage1Segment {
    pub source_ref: String,
    pub duration: f64,
}

/// Concatenate + transcode request. Carries no text; overlays are stage 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage1Request {
    /// Our job id, echoed back by the encoder for log correlation
    pub reference: JobId,
    pub segments: Vec<Stage1Segment>,
    pub canvas: Canvas,
    /// Object key the encoder writes the base clip to
    pub output_key: ArtifactRef,
    /// Where the encoder posts its completion event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Stage1Request {
    /// Build from a validated composition; segments are taken in the
    /// order the validator settled on.
    pub fn from_composition(
        job_id: &JobId,
        composition: &Composition,
        canvas: Canvas,
        output_key: ArtifactRef,
    ) -> Self {
        Self {
            reference: job_id.clone(),
            segments: composition
                .segments
                .iter()
                .map(|s| Stage1Segment {
                    source_ref: s.source_ref.clone(),
                    duration: s.duration,
                })
                .collect(),
            canvas,
            output_key,
            webhook_url: None,
        }
    }

    pub fn with_webhook(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stage1Response {
    /// Opaque handle the encoder uses in its completion event
    #[serde(alias = "id", alias = "job_handle")]
    pub handle: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
