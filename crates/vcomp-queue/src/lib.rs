//! At-least-once work queue for stage-2 compositing tasks.
//!
//! This crate provides:
//! - Tagged queue messages validated once at the boundary
//! - The [`WorkQueue`] trait: long-poll receive with a visibility timeout,
//!   explicit ack, dead-lettering and depth reporting
//! - A Redis Streams backend (consumer groups + pending-entry reclaim)
//! - An in-memory backend driven by an injectable clock

pub mod error;
pub mod memory;
pub mod message;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryWorkQueue;
pub use message::{Delivery, QueueMessage};
pub use queue::{Enqueued, QueueDepth, WorkQueue};
pub use redis_queue::{QueueConfig, RedisWorkQueue};
