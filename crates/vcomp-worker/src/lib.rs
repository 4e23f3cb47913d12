//! Stage-2 compositing worker.
//!
//! Claims [`vcomp_models::WorkerTask`]s from the work queue, burns the
//! overlays into the stage-1 base clip, uploads the final artifact, moves
//! the job to its terminal state and sends the completion callback. The
//! task is acked only once all of that is recorded.

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{DeliveryOutcome, TaskExecutor};
pub use logging::JobLogger;
pub use processor::{TaskOutcome, TaskProcessor};
