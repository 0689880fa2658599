// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the transport and dispatch layers.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire process lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, TextEncoder, register_counter, register_gauge};

lazy_static! {
    // --- Gauges ---
    /// The number of connections currently open.
    pub static ref OPEN_CONNECTIONS: Gauge =
        register_gauge!("commlink_open_connections", "Number of currently open connections.").unwrap();
    /// The number of RMI calls currently blocked waiting for a response.
    pub static ref PENDING_REMOTE_CALLS: Gauge =
        register_gauge!("commlink_pending_remote_calls", "Number of RMI calls awaiting a response.").unwrap();

    // --- Counters ---
    /// The total number of connections opened since startup.
    pub static ref CONNECTIONS_OPENED_TOTAL: Counter =
        register_counter!("commlink_connections_opened_total", "Total number of connections opened.").unwrap();
    /// The total number of raw bytes read from all connections.
    pub static ref BYTES_RECEIVED_TOTAL: Counter =
        register_counter!("commlink_bytes_received_total", "Total number of bytes received.").unwrap();
    /// The total number of complete frames extracted from connection buffers.
    pub static ref FRAMES_RECEIVED_TOTAL: Counter =
        register_counter!("commlink_frames_received_total", "Total number of frames received.").unwrap();
    /// The total number of pipeline runs.
    pub static ref PIPELINE_RUNS_TOTAL: Counter =
        register_counter!("commlink_pipeline_runs_total", "Total number of receive pipeline runs.").unwrap();
    /// The total number of handler invocations that returned an error.
    pub static ref HANDLER_FAILURES_TOTAL: Counter =
        register_counter!("commlink_handler_failures_total", "Total number of failed handler invocations.").unwrap();
    /// The total number of RMI calls issued through proxies.
    pub static ref REMOTE_CALLS_TOTAL: Counter =
        register_counter!("commlink_remote_calls_total", "Total number of remote method invocations.").unwrap();
    /// The total number of RMI calls that timed out.
    pub static ref REMOTE_CALL_TIMEOUTS_TOTAL: Counter =
        register_counter!("commlink_remote_call_timeouts_total", "Total number of timed out remote method invocations.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
