//! Work queue seam.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::message::{Delivery, QueueMessage};

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    Added { message_id: String },
    /// Same work was enqueued recently; nothing added
    Duplicate,
}

/// Outstanding work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Waiting for a consumer
    pub pending: u64,
    /// Held by a consumer, not yet acknowledged
    pub in_flight: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.pending + self.in_flight
    }
}

/// Durable, at-least-once queue.
///
/// A received message is invisible to other consumers until it is acked or
/// its visibility timeout lapses, after which it is delivered again.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, message: &QueueMessage) -> QueueResult<Enqueued>;

    /// Long-poll for up to `max` messages, waiting at most `wait`.
    ///
    /// Messages whose visibility timeout has lapsed are returned before new
    /// ones.
    async fn receive(&self, consumer: &str, max: usize, wait: Duration) -> QueueResult<Vec<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Park a message that keeps failing, removing it from the queue.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    async fn depth(&self) -> QueueResult<QueueDepth>;
}
