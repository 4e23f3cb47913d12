//! HTTP surface tests on in-memory infrastructure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use vcomp_api::security::{sign_body, SIGNATURE_HEADER};
use vcomp_api::{create_router, ApiConfig, AppState};
use vcomp_encoder::{EncoderResult, Stage1Encoder, Stage1Request};
use vcomp_models::{CallbackPayload, JobId, JobState, Stage1Event, SubmitRequest, SystemClock};
use vcomp_pipeline::{
    Backoff, CallbackNotifier, CallbackTransport, CompletionListener, DeliveryError, DispatchConfig, Dispatcher,
    NotifierConfig,
};
use vcomp_queue::{MemoryWorkQueue, WorkQueue};
use vcomp_state::{JobStore, MemoryJobStore};
use vcomp_storage::MemoryArtifactStore;

#[derive(Default)]
struct ScriptedEncoder {
    submitted: Mutex<Vec<Stage1Request>>,
}

#[async_trait]
impl Stage1Encoder for ScriptedEncoder {
    async fn submit(&self, request: &Stage1Request) -> EncoderResult<String> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        Ok(format!("enc-{}", submitted.len()))
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<CallbackPayload>>,
}

#[async_trait]
impl CallbackTransport for RecordingTransport {
    async fn deliver(&self, _url: &str, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct Harness {
    state: AppState,
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryWorkQueue>,
    transport: Arc<RecordingTransport>,
}

impl Harness {
    fn new(config: ApiConfig) -> Self {
        let clock = SystemClock::shared();
        let store = Arc::new(MemoryJobStore::new(clock.clone()));
        let queue = Arc::new(MemoryWorkQueue::new(clock.clone(), Duration::from_secs(60)));
        let transport = Arc::new(RecordingTransport::default());

        let notifier = Arc::new(CallbackNotifier::new(
            store.clone(),
            transport.clone(),
            NotifierConfig {
                backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(1)),
                ..NotifierConfig::default()
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::default(),
            store.clone(),
            Arc::new(ScriptedEncoder::default()),
            notifier.clone(),
            clock,
        ));
        let listener = Arc::new(CompletionListener::new(store.clone(), queue.clone(), notifier));

        let state = AppState {
            config,
            store: store.clone(),
            queue: queue.clone(),
            artifacts: Arc::new(MemoryArtifactStore::new()),
            dispatcher,
            listener,
        };

        Self {
            state,
            store,
            queue,
            transport,
        }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone(), None)
    }

    /// A job that has been accepted and submitted to stage 1.
    async fn submitted_job(&self) -> JobId {
        let job = self.state.dispatcher.accept(submit_request()).await.unwrap();
        self.state.dispatcher.dispatch(&job).await.unwrap().id
    }
}

fn submit_request() -> SubmitRequest {
    serde_json::from_value(submit_body()).unwrap()
}

fn submit_body() -> Value {
    json!({
        "composition": {
            "segments": [
                {"source_ref": "https://cdn.example.com/a.mp4", "duration": 5.0, "order": 0},
                {"source_ref": "https://cdn.example.com/b.mp4", "duration": 8.0, "order": 1}
            ],
            "text_overlays": [
                {"content": "Hello", "start_time": 0.0, "end_time": 2.0, "position": {"x": 100, "y": 200}}
            ],
            "total_duration": 13.0
        },
        "callback_url": "https://caller.example.com/hook"
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submit_returns_accepted_and_persists_job() {
    let harness = Harness::new(ApiConfig::default());

    let response = harness.router().oneshot(post_json("/jobs", &submit_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().contains_key("x-request-id"));

    let body = read_json(response).await;
    assert_eq!(body["status"], "submitted");

    let job_id = JobId::from_string(body["job_id"].as_str().unwrap());
    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.composition.total_duration, 13.0);
}

#[tokio::test]
async fn test_empty_segments_rejected_with_422() {
    let harness = Harness::new(ApiConfig::default());
    let mut body = submit_body();
    body["composition"]["segments"] = json!([]);
    body["composition"]["total_duration"] = json!(0.0);

    let response = harness.router().oneshot(post_json("/jobs", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = read_json(response).await;
    assert_eq!(body["code"], "invalid_composition");
    assert_eq!(body["reason"], "empty_segments");
    assert_eq!(harness.store.job_count().await, 0);
}

#[tokio::test]
async fn test_internal_callback_url_rejected_in_production() {
    let harness = Harness::new(ApiConfig {
        allow_private_callbacks: false,
        ..ApiConfig::default()
    });
    let mut body = submit_body();
    body["callback_url"] = json!("http://169.254.169.254/latest/meta-data");

    let response = harness.router().oneshot(post_json("/jobs", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(read_json(response).await["code"], "invalid_request");
    assert_eq!(harness.store.job_count().await, 0);
}

#[tokio::test]
async fn test_get_job_status() {
    let harness = Harness::new(ApiConfig::default());
    let job_id = harness.submitted_job().await;

    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["progress"], 10);
    assert!(body.get("result_ref").is_none());
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let harness = Harness::new(ApiConfig::default());

    let response = harness
        .router()
        .oneshot(Request::builder().uri("/jobs/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["code"], "not_found");
}

#[tokio::test]
async fn test_webhook_completion_enqueues_task_once() {
    let harness = Harness::new(ApiConfig::default());
    let job_id = harness.submitted_job().await;
    let event = serde_json::to_value(Stage1Event::completed("enc-1", "jobs/x/stage1.mp4", 13.0)).unwrap();

    let response = harness.router().oneshot(post_json("/webhooks/stage1", &event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "enqueued");

    let response = harness.router().oneshot(post_json("/webhooks/stage1", &event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "duplicate");

    assert_eq!(harness.queue.depth().await.unwrap().total(), 1);
    assert_eq!(harness.store.get(&job_id).await.unwrap().state, JobState::Stage2Queued);
}

#[tokio::test]
async fn test_webhook_failure_notifies_caller() {
    let harness = Harness::new(ApiConfig::default());
    let job_id = harness.submitted_job().await;
    let event = serde_json::to_value(Stage1Event::failed("enc-1", "unsupported codec")).unwrap();

    let response = harness.router().oneshot(post_json("/webhooks/stage1", &event)).await.unwrap();
    assert_eq!(read_json(response).await["outcome"], "failed");

    assert_eq!(harness.store.get(&job_id).await.unwrap().state, JobState::Failed);
    assert_eq!(harness.queue.depth().await.unwrap().total(), 0);
    assert_eq!(harness.transport.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_webhook_ahead_of_submission_record_is_503() {
    let harness = Harness::new(ApiConfig::default());
    let job = harness.state.dispatcher.accept(submit_request()).await.unwrap();

    let mut event = Stage1Event::completed("enc-early", "jobs/x/stage1.mp4", 13.0);
    event.reference = Some(job.id.clone());
    let response = harness
        .router()
        .oneshot(post_json("/webhooks/stage1", &serde_json::to_value(event).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(harness.store.get(&job.id).await.unwrap().state, JobState::Created);
}

#[tokio::test]
async fn test_webhook_unknown_handle_is_acknowledged() {
    let harness = Harness::new(ApiConfig::default());
    let event = serde_json::to_value(Stage1Event::completed("enc-404", "jobs/x/stage1.mp4", 13.0)).unwrap();

    let response = harness.router().oneshot(post_json("/webhooks/stage1", &event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "unknown_job");
}

#[tokio::test]
async fn test_webhook_malformed_body_is_400() {
    let harness = Harness::new(ApiConfig::default());

    let response = harness
        .router()
        .oneshot(post_json("/webhooks/stage1", &json!({"external_handle": "enc-1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_signature_required_when_secret_set() {
    let harness = Harness::new(ApiConfig {
        webhook_secret: Some("s3cret".to_string()),
        ..ApiConfig::default()
    });
    harness.submitted_job().await;
    let body = serde_json::to_vec(&Stage1Event::completed("enc-1", "jobs/x/stage1.mp4", 13.0)).unwrap();

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhooks/stage1")
        .body(Body::from(body.clone()))
        .unwrap();
    let response = harness.router().oneshot(unsigned).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(harness.queue.depth().await.unwrap().total(), 0);

    let signed = Request::builder()
        .method("POST")
        .uri("/webhooks/stage1")
        .header(SIGNATURE_HEADER, sign_body("s3cret", &body).unwrap())
        .body(Body::from(body))
        .unwrap();
    let response = harness.router().oneshot(signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.queue.depth().await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_health_and_ready() {
    let harness = Harness::new(ApiConfig::default());

    let response = harness
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let response = harness
        .router()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ready");
}
