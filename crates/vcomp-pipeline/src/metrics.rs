//! Pipeline metrics.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vcomp_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "vcomp_jobs_rejected_total";
    pub const STAGE1_SUBMISSIONS_TOTAL: &str = "vcomp_stage1_submissions_total";
    pub const STAGE1_EVENTS_TOTAL: &str = "vcomp_stage1_events_total";
    pub const TASKS_ENQUEUED_TOTAL: &str = "vcomp_tasks_enqueued_total";
    pub const CALLBACKS_TOTAL: &str = "vcomp_callbacks_total";
}

pub fn record_submission() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_rejection(code: &'static str) {
    counter!(names::JOBS_REJECTED_TOTAL, "code" => code).increment(1);
}

pub fn record_stage1_submission(outcome: &'static str) {
    counter!(names::STAGE1_SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_stage1_event(outcome: &'static str) {
    counter!(names::STAGE1_EVENTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_task_enqueued(duplicate: bool) {
    let label = if duplicate { "duplicate" } else { "added" };
    counter!(names::TASKS_ENQUEUED_TOTAL, "result" => label).increment(1);
}

pub fn record_callback(outcome: &'static str) {
    counter!(names::CALLBACKS_TOTAL, "outcome" => outcome).increment(1);
}
