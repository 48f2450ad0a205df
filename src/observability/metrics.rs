//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ceptic_frames_sent_total` (counter): frames written, by type
//! - `ceptic_frames_received_total` (counter): frames read, by type
//! - `ceptic_streams_opened_total` / `ceptic_streams_closed_total` (counters)
//! - `ceptic_active_connections` (gauge): running stream managers
//! - `ceptic_handshakes_total` (counter): negotiations, by outcome
//! - `ceptic_requests_total` (counter): served commands, by command and status
//! - `ceptic_request_duration_seconds` (histogram): server command latency

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::stream::frame::FrameType;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_frame_sent(frame_type: FrameType) {
    counter!("ceptic_frames_sent_total", "type" => frame_type.as_str()).increment(1);
}

pub fn record_frame_received(frame_type: FrameType) {
    counter!("ceptic_frames_received_total", "type" => frame_type.as_str()).increment(1);
}

pub fn record_stream_opened() {
    counter!("ceptic_streams_opened_total").increment(1);
}

pub fn record_stream_closed() {
    counter!("ceptic_streams_closed_total").increment(1);
}

pub fn record_connection_opened() {
    gauge!("ceptic_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("ceptic_active_connections").decrement(1.0);
}

pub fn record_handshake(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    counter!("ceptic_handshakes_total", "outcome" => outcome).increment(1);
}

/// Record a served command and its latency.
pub fn record_request(command: &str, status: u16, start: Instant) {
    counter!(
        "ceptic_requests_total",
        "command" => command.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("ceptic_request_duration_seconds", "command" => command.to_string())
        .record(start.elapsed().as_secs_f64());
}
