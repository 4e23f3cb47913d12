//! Scripted collaborators shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vcomp_encoder::{EncoderError, EncoderResult, Stage1Encoder, Stage1Request};
use vcomp_models::{
    CallbackPayload, Composition, Job, JobId, JobState, JobTransition, Position, Segment, SubmitRequest, SystemClock,
    TextOverlay,
};
use vcomp_state::{JobStore, MemoryJobStore, StateError, StateResult};

use crate::control::Backoff;
use crate::notifier::{CallbackNotifier, CallbackTransport, DeliveryError, NotifierConfig};

pub enum Script {
    Accept(&'static str),
    Reject(&'static str),
    Unavailable,
    /// Unavailable for the first `failures` calls, then accepts
    Flaky { failures: usize, handle: &'static str },
}

pub struct ScriptedEncoder {
    script: Script,
    pub requests: Mutex<Vec<Stage1Request>>,
}

impl ScriptedEncoder {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Stage1Encoder for ScriptedEncoder {
    async fn submit(&self, request: &Stage1Request) -> EncoderResult<String> {
        let calls = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let unavailable = || Err(EncoderError::ServiceUnavailable("Encoder returned 503".to_string()));
        match self.script {
            Script::Accept(handle) => Ok(handle.to_string()),
            Script::Reject(message) => Err(EncoderError::Rejected {
                status: 422,
                message: message.to_string(),
            }),
            Script::Unavailable => unavailable(),
            Script::Flaky { failures, .. } if calls <= failures => unavailable(),
            Script::Flaky { handle, .. } => Ok(handle.to_string()),
        }
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<CallbackPayload>>,
}

#[async_trait]
impl CallbackTransport for RecordingTransport {
    async fn deliver(&self, _url: &str, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Delegates to a [`MemoryJobStore`], failing the first `failures`
/// transitions as if the store were unreachable.
pub struct FlakyStore {
    pub inner: Arc<MemoryJobStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryJobStore>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create(&self, job: Job) -> StateResult<Job> {
        self.inner.create(job).await
    }

    async fn get(&self, job_id: &JobId) -> StateResult<Job> {
        self.inner.get(job_id).await
    }

    async fn transition(&self, job_id: &JobId, expected: JobState, transition: JobTransition) -> StateResult<Job> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StateError::Contention(job_id.clone()));
        }
        self.inner.transition(job_id, expected, transition).await
    }

    async fn find_by_external_handle(&self, handle: &str) -> StateResult<Option<JobId>> {
        self.inner.find_by_external_handle(handle).await
    }
}

pub fn store() -> Arc<MemoryJobStore> {
    Arc::new(MemoryJobStore::new(SystemClock::shared()))
}

pub fn notifier(store: Arc<MemoryJobStore>, transport: Arc<RecordingTransport>) -> Arc<CallbackNotifier> {
    let config = NotifierConfig {
        backoff: Backoff::new(std::time::Duration::from_millis(1), std::time::Duration::from_millis(1)),
        ..NotifierConfig::default()
    };
    Arc::new(CallbackNotifier::new(store, transport, config))
}

pub fn composition(durations: &[f64]) -> Composition {
    Composition {
        segments: durations
            .iter()
            .enumerate()
            .map(|(i, d)| Segment {
                source_ref: format!("clips/{}.mp4", i),
                duration: *d,
                order: i as i64,
            })
            .collect(),
        text_overlays: vec![TextOverlay::new("Hello", 0.0, 2.0, Position::new(100, 200))],
        total_duration: 0.0,
    }
}

pub fn request(composition: Composition) -> SubmitRequest {
    SubmitRequest {
        composition,
        callback_url: "https://caller.example.com/hook".to_string(),
    }
}
