//! Autoscaler metrics.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub mod names {
    pub const QUEUE_DEPTH: &str = "vcomp_autoscaler_queue_depth";
    pub const FLEET_SIZE: &str = "vcomp_autoscaler_fleet_size";
    pub const TARGET_SIZE: &str = "vcomp_autoscaler_target_size";
    pub const SCALE_EVENTS_TOTAL: &str = "vcomp_autoscaler_scale_events_total";
}

/// Serve `/metrics` on `port`.
pub fn install_exporter(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
}

pub fn record_fleet(depth: u64, size: u32, target: u32) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
    gauge!(names::FLEET_SIZE).set(size as f64);
    gauge!(names::TARGET_SIZE).set(target as f64);
}

pub fn record_scale_event(direction: &'static str) {
    counter!(names::SCALE_EVENTS_TOTAL, "direction" => direction).increment(1);
}
