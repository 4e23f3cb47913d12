//! Redis Streams queue tests. Run with a local Redis:
//! `REDIS_URL=redis://localhost:6379 cargo test -p vcomp-queue -- --ignored`

use std::time::Duration;

use vcomp_models::{ArtifactRef, JobId, Stage1Result, WorkerTask};
use vcomp_queue::{Enqueued, QueueConfig, QueueMessage, RedisWorkQueue, WorkQueue};

fn test_queue(visibility: Duration) -> RedisWorkQueue {
    let suffix = uuid_like();
    let config = QueueConfig {
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
        stream_name: format!("vcomp:test:tasks:{}", suffix),
        consumer_group: format!("vcomp:test:group:{}", suffix),
        dlq_stream_name: format!("vcomp:test:dlq:{}", suffix),
        visibility_timeout: visibility,
        dedup_ttl: Duration::from_secs(60),
    };
    RedisWorkQueue::new(config).unwrap()
}

fn uuid_like() -> String {
    format!(
        "{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

fn message(job: &str) -> QueueMessage {
    QueueMessage::Composite(WorkerTask {
        job_id: JobId::from_string(job),
        base_clip: Stage1Result {
            artifact_ref: ArtifactRef::new(format!("jobs/{}/stage1.mp4", job)),
            duration: 3.0,
        },
        overlays: vec![],
    })
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_receive_ack() {
    let queue = test_queue(Duration::from_secs(60));
    queue.init().await.unwrap();

    let job = format!("job-{}", uuid_like());
    assert!(matches!(queue.enqueue(&message(&job)).await.unwrap(), Enqueued::Added { .. }));
    assert_eq!(queue.enqueue(&message(&job)).await.unwrap(), Enqueued::Duplicate);

    let deliveries = queue.receive("w1", 10, Duration::from_millis(500)).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].delivery_count, 1);
    assert_eq!(queue.depth().await.unwrap().in_flight, 1);

    queue.ack(&deliveries[0]).await.unwrap();
    assert_eq!(queue.depth().await.unwrap().total(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unacked_message_is_redelivered_after_visibility_timeout() {
    let queue = test_queue(Duration::from_millis(200));
    queue.init().await.unwrap();

    let job = format!("job-{}", uuid_like());
    queue.enqueue(&message(&job)).await.unwrap();

    let first = queue.receive("crashing-worker", 1, Duration::from_millis(500)).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = queue.receive("healthy-worker", 1, Duration::from_millis(500)).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_eq!(second[0].delivery_count, 2);
    queue.ack(&second[0]).await.unwrap();
}
