//! Pipeline stages that run inside the API process and the worker.
//!
//! - [`Dispatcher`]: validate, persist and submit stage 1
//! - [`CompletionListener`]: turn stage-1 events into queued compositing work
//! - [`CallbackNotifier`]: push the final outcome once per job
//! - [`ControlLoop`] / [`Backoff`]: interval, jitter and backoff for every
//!   periodic or retrying loop

pub mod control;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod notifier;

#[cfg(test)]
mod test_support;

pub use control::{Backoff, ControlLoop};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{PipelineError, PipelineResult};
pub use listener::{CompletionListener, ListenerOutcome};
pub use notifier::{
    CallbackNotifier, CallbackTransport, DeliveryError, HttpCallbackTransport, NotifierConfig, NotifyOutcome,
};
