//! Worker fleet autoscaler.
//!
//! Each tick reads queue depth and fleet status, computes a target from a
//! proportional policy at low depth and fixed step bands above it, and
//! applies it subject to scale-out/scale-in cooldowns and a warm-pool floor.

pub mod config;
pub mod controller;
pub mod error;
pub mod fleet;
pub mod metrics;
pub mod policy;

pub use config::{AutoscalerConfig, StepBand};
pub use controller::{Autoscaler, HoldReason, Observation, ScaleDecision};
pub use error::{AutoscalerError, AutoscalerResult};
pub use fleet::{Fleet, FleetConfig, FleetStatus, HttpFleet};
pub use policy::target_size;
