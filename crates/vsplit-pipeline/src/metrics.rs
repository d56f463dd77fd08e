//! Pipeline metrics.
//!
//! Recording is a no-op until a recorder is installed (the API binary
//! installs the Prometheus exporter).

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const CHUNKS_DISPATCHED_TOTAL: &str = "vsplit_chunks_dispatched_total";
    pub const RUNS_TOTAL: &str = "vsplit_runs_total";
    pub const RUN_DURATION_SECONDS: &str = "vsplit_run_duration_seconds";
    pub const EVENTS_TOTAL: &str = "vsplit_events_total";
}

/// Record the terminal outcome of one chunk.
pub fn record_chunk_dispatched(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::CHUNKS_DISPATCHED_TOTAL, &labels).increment(1);
}

/// Record a finished run; `outcome` is `ok` or an error kind.
pub fn record_run(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::RUNS_TOTAL, &labels).increment(1);
    histogram!(names::RUN_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a classified inbound event.
pub fn record_event(class: &str) {
    let labels = [("class", class.to_string())];
    counter!(names::EVENTS_TOTAL, &labels).increment(1);
}
