//! Compositing worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vcomp_media::FfmpegCompositor;
use vcomp_models::{EncodingConfig, SystemClock};
use vcomp_pipeline::{CallbackNotifier, HttpCallbackTransport, NotifierConfig};
use vcomp_queue::RedisWorkQueue;
use vcomp_state::{RedisJobStore, StateConfig};
use vcomp_storage::R2Client;
use vcomp_worker::{metrics, TaskExecutor, TaskProcessor, WorkerConfig};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vcomp=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn exit_on_error<T, E: std::fmt::Display>(what: &str, result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to create {}: {}", what, e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vcomp-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::install_exporter(port) {
            Ok(()) => info!("Metrics exporter listening on port {}", port),
            Err(e) => warn!("Metrics exporter disabled: {}", e),
        }
    }

    let clock = SystemClock::shared();

    let queue = exit_on_error("work queue", RedisWorkQueue::from_env());
    exit_on_error("work queue consumer group", queue.init().await);

    let store = Arc::new(exit_on_error("job store", RedisJobStore::new(StateConfig::from_env(), clock.clone())));
    let artifacts = Arc::new(exit_on_error("artifact store", R2Client::from_env()));

    let notifier_config = NotifierConfig::from_env();
    let transport = exit_on_error("callback transport", HttpCallbackTransport::new(notifier_config.timeout));
    let notifier = Arc::new(CallbackNotifier::new(store.clone(), Arc::new(transport), notifier_config));

    let compositor = Arc::new(FfmpegCompositor::new(EncodingConfig::from_env(), config.ffmpeg_timeout));

    let processor = TaskProcessor::new(
        store,
        artifacts,
        compositor,
        notifier,
        clock,
        config.work_dir.clone(),
    );
    let executor = Arc::new(TaskExecutor::new(config, Arc::new(queue), processor));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
