//! Redis job store tests. Run with a local Redis:
//! `REDIS_URL=redis://localhost:6379 cargo test -p vcomp-state -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use vcomp_models::{Composition, DeliveryState, Job, JobId, JobState, JobTransition, ManualClock, Segment};
use vcomp_state::{CallbackLedger, ClaimOutcome, JobStore, RedisJobStore, StateConfig};

fn unique() -> String {
    format!(
        "{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

fn test_store() -> (RedisJobStore, ManualClock) {
    let clock = ManualClock::default();
    let config = StateConfig {
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
        key_prefix: format!("vcomp:test:{}", unique()),
        retention: Duration::from_secs(300),
    };
    (RedisJobStore::new(config, Arc::new(clock.clone())).unwrap(), clock)
}

fn new_job(id: &JobId) -> Job {
    Job::new(
        id.clone(),
        Composition {
            segments: vec![Segment {
                source_ref: "a.mp4".into(),
                duration: 2.0,
                order: 0,
            }],
            text_overlays: vec![],
            total_duration: 2.0,
        },
        "https://caller.example.com/cb",
        Utc::now(),
    )
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_transition_and_handle_lookup() {
    let (store, _) = test_store();
    store.ping().await.unwrap();
    let id = JobId::new();
    store.create(new_job(&id)).await.unwrap();
    assert!(store.create(new_job(&id)).await.is_err());

    let job = store
        .transition(&id, JobState::Created, JobTransition::Stage1Submitted { external_handle: "enc-1".into() })
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Stage1Submitted);
    assert_eq!(job.version, 1);
    assert_eq!(store.find_by_external_handle("enc-1").await.unwrap(), Some(id.clone()));

    let err = store
        .transition(&id, JobState::Created, JobTransition::Stage1Submitted { external_handle: "enc-2".into() })
        .await
        .unwrap_err();
    assert_eq!(err.actual_state(), Some(JobState::Stage1Submitted));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_callback_claim_and_settle() {
    let (store, clock) = test_store();
    let id = JobId::new();
    let lease = Duration::from_secs(60);

    assert!(matches!(store.claim_callback(&id, lease).await.unwrap(), ClaimOutcome::Claimed(_)));
    assert!(matches!(store.claim_callback(&id, lease).await.unwrap(), ClaimOutcome::InProgress(_)));

    clock.advance(Duration::from_secs(61));
    assert!(matches!(store.claim_callback(&id, lease).await.unwrap(), ClaimOutcome::Claimed(_)));

    store.settle_callback(&id, DeliveryState::Delivered, 2, None).await.unwrap();
    let record = store.get_callback(&id).await.unwrap().unwrap();
    assert_eq!(record.state, DeliveryState::Delivered);
    assert!(matches!(store.claim_callback(&id, lease).await.unwrap(), ClaimOutcome::Settled(_)));
}
