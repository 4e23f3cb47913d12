//! In-process work queue with clock-driven visibility timeouts.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use vcomp_models::SharedClock;

use crate::error::{QueueError, QueueResult};
use crate::message::{Delivery, QueueMessage};
use crate::queue::{Enqueued, QueueDepth, WorkQueue};

#[derive(Debug)]
struct Entry {
    message: QueueMessage,
    delivery_count: u32,
    invisible_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
    recent_keys: HashMap<String, DateTime<Utc>>,
    dead_letters: Vec<(QueueMessage, String)>,
}

/// Work queue held in memory.
#[derive(Debug)]
pub struct MemoryWorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    clock: SharedClock,
    visibility_timeout: Duration,
    dedup_window: Duration,
}

impl MemoryWorkQueue {
    pub fn new(clock: SharedClock, visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            clock,
            visibility_timeout,
            dedup_window: Duration::from_secs(3600),
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Messages parked by [`WorkQueue::dead_letter`].
    pub async fn dead_letters(&self) -> Vec<(QueueMessage, String)> {
        self.inner.lock().await.dead_letters.clone()
    }

    /// Every message not yet acked, in enqueue order.
    pub async fn messages(&self) -> Vec<QueueMessage> {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .map(|e| e.message.clone())
            .collect()
    }

    fn chrono(duration: Duration) -> chrono::Duration {
        chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
    }

    async fn take_visible(&self, max: usize) -> Vec<Delivery> {
        let now = self.clock.now();
        let hold_until = now + Self::chrono(self.visibility_timeout);
        let mut inner = self.inner.lock().await;

        // Lapsed holds first, then never-delivered messages, each in enqueue order
        let mut ids: Vec<u64> = inner
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.invisible_until, Some(until) if until <= now))
            .map(|(id, _)| *id)
            .collect();
        ids.extend(
            inner
                .entries
                .iter()
                .filter(|(_, e)| e.invisible_until.is_none())
                .map(|(id, _)| *id),
        );
        ids.truncate(max);

        ids.into_iter()
            .filter_map(|id| {
                let entry = inner.entries.get_mut(&id)?;
                entry.delivery_count += 1;
                entry.invisible_until = Some(hold_until);
                if entry.delivery_count > 1 {
                    debug!(message_id = id, deliveries = entry.delivery_count, "Redelivering message");
                }
                Some(Delivery {
                    message_id: id.to_string(),
                    message: entry.message.clone(),
                    delivery_count: entry.delivery_count,
                })
            })
            .collect()
    }

    async fn remove(&self, delivery: &Delivery) -> QueueResult<Entry> {
        let id: u64 = delivery
            .message_id
            .parse()
            .map_err(|_| QueueError::UnknownMessage(delivery.message_id.clone()))?;
        self.inner
            .lock()
            .await
            .entries
            .remove(&id)
            .ok_or_else(|| QueueError::UnknownMessage(delivery.message_id.clone()))
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, message: &QueueMessage) -> QueueResult<Enqueued> {
        let now = self.clock.now();
        let key = message.idempotency_key();
        let mut inner = self.inner.lock().await;

        let window = Self::chrono(self.dedup_window);
        if let Some(seen) = inner.recent_keys.get(&key) {
            if now - *seen < window {
                warn!(key = %key, "Duplicate enqueue dropped");
                return Ok(Enqueued::Duplicate);
            }
        }
        inner.recent_keys.retain(|_, seen| now - *seen < window);
        inner.recent_keys.insert(key, now);

        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                message: message.clone(),
                delivery_count: 0,
                invisible_until: None,
            },
        );
        drop(inner);

        self.notify.notify_waiters();
        Ok(Enqueued::Added {
            message_id: id.to_string(),
        })
    }

    async fn receive(&self, _consumer: &str, max: usize, wait: Duration) -> QueueResult<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deliveries = self.take_visible(max).await;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.remove(delivery).await?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let entry = self.remove(delivery).await?;
        warn!(job_id = %entry.message.job_id(), reason, "Moved message to dead letters");
        self.inner
            .lock()
            .await
            .dead_letters
            .push((entry.message, reason.to_string()));
        Ok(())
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        let in_flight = inner
            .entries
            .values()
            .filter(|e| matches!(e.invisible_until, Some(until) if until > now))
            .count() as u64;
        Ok(QueueDepth {
            pending: inner.entries.len() as u64 - in_flight,
            in_flight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vcomp_models::{ArtifactRef, JobId, ManualClock, Stage1Result, WorkerTask};

    fn message(job: &str) -> QueueMessage {
        QueueMessage::Composite(WorkerTask {
            job_id: JobId::from_string(job),
            base_clip: Stage1Result {
                artifact_ref: ArtifactRef::new(format!("jobs/{}/stage1.mp4", job)),
                duration: 5.0,
            },
            overlays: vec![],
        })
    }

    fn queue(clock: &ManualClock) -> MemoryWorkQueue {
        MemoryWorkQueue::new(Arc::new(clock.clone()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_received_message_is_invisible_until_timeout() {
        let clock = ManualClock::default();
        let queue = queue(&clock);
        queue.enqueue(&message("a")).await.unwrap();

        let first = queue.receive("w1", 1, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].delivery_count, 1);

        // Held by w1
        assert!(queue.receive("w2", 1, Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(queue.depth().await.unwrap(), QueueDepth { pending: 0, in_flight: 1 });

        // w1 crashes; hold lapses
        clock.advance(Duration::from_secs(61));
        let again = queue.receive("w2", 1, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message, first[0].message);
        assert_eq!(again[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let clock = ManualClock::default();
        let queue = queue(&clock);
        queue.enqueue(&message("a")).await.unwrap();

        let delivery = queue.receive("w1", 1, Duration::ZERO).await.unwrap().remove(0);
        queue.ack(&delivery).await.unwrap();

        clock.advance(Duration::from_secs(3600));
        assert!(queue.receive("w1", 1, Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(queue.depth().await.unwrap().total(), 0);
        assert!(matches!(queue.ack(&delivery).await, Err(QueueError::UnknownMessage(_))));
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_dropped() {
        let clock = ManualClock::default();
        let queue = queue(&clock);
        assert!(matches!(queue.enqueue(&message("a")).await.unwrap(), Enqueued::Added { .. }));
        assert_eq!(queue.enqueue(&message("a")).await.unwrap(), Enqueued::Duplicate);
        assert!(matches!(queue.enqueue(&message("b")).await.unwrap(), Enqueued::Added { .. }));
        assert_eq!(queue.depth().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_dedup_keys_expire_with_window() {
        let clock = ManualClock::default();
        let queue = queue(&clock).with_dedup_window(Duration::from_secs(60));
        queue.enqueue(&message("a")).await.unwrap();
        queue.enqueue(&message("b")).await.unwrap();

        clock.advance(Duration::from_secs(61));
        queue.enqueue(&message("c")).await.unwrap();
        assert_eq!(queue.inner.lock().await.recent_keys.len(), 1);

        // Past the window the same work may be queued again
        assert!(matches!(queue.enqueue(&message("a")).await.unwrap(), Enqueued::Added { .. }));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_enqueue() {
        let clock = ManualClock::default();
        let queue = Arc::new(queue(&clock));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive("w1", 4, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(&message("late")).await.unwrap();

        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message.job_id().as_str(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_empty() {
        let clock = ManualClock::default();
        let queue = queue(&clock);
        let got = queue.receive("w1", 1, Duration::from_secs(20)).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter() {
        let clock = ManualClock::default();
        let queue = queue(&clock);
        queue.enqueue(&message("poison")).await.unwrap();
        let delivery = queue.receive("w1", 1, Duration::ZERO).await.unwrap().remove(0);

        queue.dead_letter(&delivery, "too many deliveries").await.unwrap();
        assert_eq!(queue.depth().await.unwrap().total(), 0);
        assert_eq!(queue.dead_letters().await.len(), 1);
    }
}
