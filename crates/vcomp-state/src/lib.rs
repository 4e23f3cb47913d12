//! Durable job state for the rendering pipeline.
//!
//! This crate provides:
//! - [`JobStore`]: create / get / compare-and-set transition, plus the
//!   external-handle correlation recorded at stage-1 submission
//! - [`CallbackLedger`]: per-job callback delivery records with claim leases
//! - Redis and in-memory backends implementing both

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StateError, StateResult};
pub use memory::MemoryJobStore;
pub use redis_store::{RedisJobStore, StateConfig};
pub use store::{CallbackLedger, ClaimOutcome, JobStore};
