//! Engine counters
//!
//! Recorded through the `metrics` facade; the server installs the Prometheus
//! exporter. Without an installed recorder these calls are no-ops.

use metrics::{counter, histogram};

/// A transition was applied (`replayed = false`) or answered from state
pub fn transition(operation: &'static str, replayed: bool) {
    counter!(
        "mycelio_transitions_total",
        "operation" => operation,
        "replayed" => if replayed { "true" } else { "false" }
    )
    .increment(1);
}

/// A transition was rejected with a business or internal error
pub fn rejection(operation: &'static str, code: &'static str) {
    counter!("mycelio_rejections_total", "operation" => operation, "code" => code).increment(1);
}

/// Karma moved between balances
pub fn karma_moved(kind: &'static str, amount: u64) {
    counter!("mycelio_karma_moved_total", "kind" => kind).increment(amount);
}

/// One sweep tick finished
pub fn sweep(kind: &'static str, affected: usize, failed: usize, seconds: f64) {
    counter!("mycelio_sweep_affected_total", "sweep" => kind).increment(affected as u64);
    counter!("mycelio_sweep_failures_total", "sweep" => kind).increment(failed as u64);
    histogram!("mycelio_sweep_duration_seconds", "sweep" => kind).record(seconds);
}
