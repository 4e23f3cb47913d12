//! Application state.

use std::sync::Arc;

use vcomp_encoder::HttpEncoder;
use vcomp_models::SystemClock;
use vcomp_pipeline::{
    CallbackNotifier, CompletionListener, DispatchConfig, Dispatcher, HttpCallbackTransport, NotifierConfig,
};
use vcomp_queue::{RedisWorkQueue, WorkQueue};
use vcomp_state::{JobStore, RedisJobStore, StateConfig};
use vcomp_storage::{ArtifactStore, R2Client};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub listener: Arc<CompletionListener>,
}

impl AppState {
    /// Wire the Redis, R2 and encoder backed pipeline from the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let clock = SystemClock::shared();

        let store = Arc::new(RedisJobStore::new(StateConfig::from_env(), clock.clone())?);
        let queue = RedisWorkQueue::from_env()?;
        queue.init().await?;
        let artifacts = Arc::new(R2Client::from_env()?);
        let encoder = Arc::new(HttpEncoder::from_env()?);

        let notifier_config = NotifierConfig::from_env();
        let transport = HttpCallbackTransport::new(notifier_config.timeout)?;
        let notifier = Arc::new(CallbackNotifier::new(store.clone(), Arc::new(transport), notifier_config));

        let dispatcher = Arc::new(Dispatcher::new(
            DispatchConfig::from_env(),
            store.clone(),
            encoder,
            Arc::clone(&notifier),
            clock,
        ));
        let queue: Arc<dyn WorkQueue> = Arc::new(queue);
        let listener = Arc::new(CompletionListener::new(store.clone(), Arc::clone(&queue), notifier));

        Ok(Self {
            config,
            store,
            queue,
            artifacts,
            dispatcher,
            listener,
        })
    }
}
