//! Autoscaler binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vcomp_autoscaler::{metrics, Autoscaler, AutoscalerConfig, FleetConfig, HttpFleet};
use vcomp_models::SystemClock;
use vcomp_pipeline::{Backoff, ControlLoop};
use vcomp_queue::RedisWorkQueue;

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
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    let config = AutoscalerConfig::from_env().context("autoscaler config")?;
    info!(?config, "Starting vcomp-autoscaler");

    if let Some(port) = std::env::var("AUTOSCALER_METRICS_PORT").ok().and_then(|s| s.parse().ok()) {
        match metrics::install_exporter(port) {
            Ok(()) => info!("Metrics exporter listening on port {}", port),
            Err(e) => warn!("Metrics exporter disabled: {}", e),
        }
    }

    let queue = RedisWorkQueue::from_env().context("work queue")?;
    queue.init().await.context("work queue consumer group")?;
    let fleet = HttpFleet::new(FleetConfig::from_env()).context("fleet client")?;

    let control = ControlLoop::new("autoscaler", config.interval)
        .with_jitter(config.jitter)
        .with_backoff(Backoff::new(std::time::Duration::from_secs(2), config.interval * 4));
    let autoscaler = Autoscaler::new(config, Arc::new(queue), Arc::new(fleet), SystemClock::shared());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let autoscaler = &autoscaler;
    let ticks = control
        .run(shutdown_rx, move || async move { autoscaler.tick().await.map(|_| ()) })
        .await;

    info!(ticks, "Autoscaler stopped");
    Ok(())
}
