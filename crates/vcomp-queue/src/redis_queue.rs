//! Work queue on Redis Streams.
//!
//! Each message is a stream entry read through a consumer group. Entries a
//! consumer has read but not acked sit in the group's pending list; once an
//! entry has been idle longer than the visibility timeout another consumer
//! claims it. Ack removes the entry from both the pending list and the stream.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::{Delivery, QueueMessage};
use crate::queue::{Enqueued, QueueDepth, WorkQueue};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Stream holding compositing tasks
    pub stream_name: String,
    pub consumer_group: String,
    pub dlq_stream_name: String,
    /// How long a received message stays invisible to other consumers
    pub visibility_timeout: Duration,
    /// Window in which a repeated enqueue of the same work is dropped
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vcomp:tasks".to_string(),
            consumer_group: "vcomp:compositors".to_string(),
            dlq_stream_name: "vcomp:tasks:dlq".to_string(),
            visibility_timeout: Duration::from_secs(600),
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            dedup_ttl: std::env::var("QUEUE_DEDUP_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        }
    }
}

/// Redis Streams work queue.
pub struct RedisWorkQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisWorkQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Round-trip check for readiness probes.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Length of the dead-letter stream.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }

    /// Decode a stream entry. Malformed entries are acked and dropped so
    /// they cannot block the group.
    async fn decode(&self, entry: StreamId, delivery_count: u32) -> Option<Delivery> {
        let message_id = entry.id.clone();
        let parsed = match entry.map.get("payload") {
            Some(redis::Value::BulkString(bytes)) => serde_json::from_slice::<QueueMessage>(bytes).ok(),
            _ => None,
        };

        match parsed {
            Some(message) => Some(Delivery {
                message_id,
                message,
                delivery_count,
            }),
            None => {
                warn!(message_id = %message_id, "Dropping malformed queue entry");
                let _ = self.ack_id(&message_id).await;
                None
            }
        }
    }

    async fn ack_id(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Take over entries whose holder exceeded the visibility timeout.
    async fn claim_expired(&self, consumer: &str, max: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::with_capacity(claimed.ids.len());
        for entry in claimed.ids {
            let previous = pending
                .ids
                .iter()
                .find(|p| p.id == entry.id)
                .map(|p| p.times_delivered as u32)
                .unwrap_or(1);
            info!(message_id = %entry.id, consumer, "Reclaimed message past visibility timeout");
            if let Some(delivery) = self.decode(entry, previous + 1).await {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    async fn read_new(&self, consumer: &str, max: usize, wait: Duration) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(wait.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                if let Some(delivery) = self.decode(entry, 1).await {
                    deliveries.push(delivery);
                }
            }
        }
        Ok(deliveries)
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, message: &QueueMessage) -> QueueResult<Enqueued> {
        let mut conn = self.conn().await?;

        let idempotency_key = message.idempotency_key();
        let dedup_key = format!("{}:dedup:{}", self.config.stream_name, idempotency_key);
        let first: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !first {
            warn!(key = %idempotency_key, "Duplicate enqueue dropped");
            return Ok(Enqueued::Duplicate);
        }

        let payload = serde_json::to_string(message)?;
        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                // Let a retry through
                let _: redis::RedisResult<()> = conn.del(&dedup_key).await;
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            job_id = %message.job_id(),
            message_id = %message_id,
            "Enqueued {} task",
            message.kind()
        );
        Ok(Enqueued::Added { message_id })
    }

    async fn receive(&self, consumer: &str, max: usize, wait: Duration) -> QueueResult<Vec<Delivery>> {
        let mut deliveries = self.claim_expired(consumer, max).await?;
        if deliveries.len() < max {
            // Only block when nothing was reclaimed
            let wait = if deliveries.is_empty() { wait } else { Duration::ZERO };
            let remaining = max - deliveries.len();
            if wait.is_zero() {
                // BLOCK 0 means forever in Redis; use the smallest positive block
                deliveries.extend(self.read_new(consumer, remaining, Duration::from_millis(1)).await?);
            } else {
                deliveries.extend(self.read_new(consumer, remaining, wait).await?);
            }
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_id(&delivery.message_id).await?;
        debug!(message_id = %delivery.message_id, "Acknowledged message");
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&delivery.message)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.message_id)
            .arg("deliveries")
            .arg(delivery.delivery_count)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack_id(&delivery.message_id).await?;
        warn!(job_id = %delivery.message.job_id(), reason, "Moved message to DLQ");
        Ok(())
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        let pending: StreamPendingReply = conn
            .xpending(&self.config.stream_name, &self.config.consumer_group)
            .await?;
        let in_flight = pending.count() as u64;
        Ok(QueueDepth {
            pending: len.saturating_sub(in_flight),
            in_flight,
        })
    }
}
