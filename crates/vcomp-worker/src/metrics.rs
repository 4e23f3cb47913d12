//! Worker metrics.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub mod names {
    pub const TASKS_TOTAL: &str = "vcomp_worker_tasks_total";
    pub const TASK_DURATION_SECONDS: &str = "vcomp_worker_task_duration_seconds";
    pub const TASKS_DEAD_LETTERED_TOTAL: &str = "vcomp_worker_tasks_dead_lettered_total";
    pub const QUEUE_PENDING: &str = "vcomp_queue_pending";
    pub const QUEUE_IN_FLIGHT: &str = "vcomp_queue_in_flight";
}

/// Serve Prometheus metrics on `port`.
pub fn install_exporter(port: u16) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| e.to_string())
}

pub fn record_task(outcome: &'static str, duration_secs: f64) {
    counter!(names::TASKS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

pub fn record_dead_letter() {
    counter!(names::TASKS_DEAD_LETTERED_TOTAL).increment(1);
}

pub fn record_queue_depth(pending: u64, in_flight: u64) {
    gauge!(names::QUEUE_PENDING).set(pending as f64);
    gauge!(names::QUEUE_IN_FLIGHT).set(in_flight as f64);
}
