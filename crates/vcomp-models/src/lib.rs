//! Shared data models for the vcomp rendering pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Compositions, segments and timed text overlays
//! - The composition validator
//! - Jobs, their lifecycle and transitions
//! - Queue tasks, stage-1 events and completion callbacks
//! - Submission and status DTOs
//! - An injectable clock

pub mod api;
pub mod callback;
pub mod clock;
pub mod composition;
pub mod encoding;
pub mod event;
pub mod job;
pub mod task;
pub mod validation;

// Re-export common types
pub use api::{JobStatusResponse, SubmitRequest, SubmitResponse};
pub use callback::{CallbackPayload, CallbackRecord, CallbackStatus, DeliveryState};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use composition::{
    Canvas, Composition, FontWeight, Position, Segment, Shadow, Stroke, TextOverlay, TextStyle,
};
pub use encoding::EncodingConfig;
pub use event::{EventError, Stage1Event, Stage1Status};
pub use job::{
    ArtifactRef, FailureStage, FinalResult, InvalidTransition, Job, JobFailure, JobId, JobState,
    JobTransition, Stage1Result,
};
pub use task::WorkerTask;
pub use validation::{CompositionValidator, InvalidComposition, DURATION_TOLERANCE_SECS};
