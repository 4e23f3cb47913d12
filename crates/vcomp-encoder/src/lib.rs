//! Client for the external stage-1 encoder.
//!
//! Stage 1 concatenates the composition's segments and transcodes them to
//! the canvas size. The encoder answers a submission with an opaque handle
//! and later reports completion through a webhook event.

pub mod client;
pub mod error;
pub mod types;

pub use client::{EncoderConfig, HttpEncoder, Stage1Encoder};
pub use error::{EncoderError, EncoderResult};
pub use types::{HealthResponse, Stage1Request, Stage1Response, Stage1Segment};
