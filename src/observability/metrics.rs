//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tracewire_spans_started_total` (counter)
//! - `tracewire_spans_ended_total` (counter): by status
//! - `tracewire_spans_exported_total` (counter)
//! - `tracewire_spans_dropped_total` (counter): by reason
//! - `tracewire_requests_total` (counter): by transport, outcome
//! - `tracewire_request_duration_seconds` (histogram): by transport
//! - `tracewire_requests_rejected_total` (counter): by transport
//! - `tracewire_in_flight` (gauge)
//! - `tracewire_shutdown_forced_total` (counter)
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_span_started() {
    counter!("tracewire_spans_started_total").increment(1);
}

pub fn record_span_ended(status: &'static str) {
    counter!("tracewire_spans_ended_total", "status" => status).increment(1);
}

pub fn record_spans_exported(count: usize) {
    counter!("tracewire_spans_exported_total").increment(count as u64);
}

pub fn record_spans_dropped(reason: &'static str, count: usize) {
    counter!("tracewire_spans_dropped_total", "reason" => reason).increment(count as u64);
}

pub fn record_request(transport: &'static str, outcome: &'static str, start: Instant) {
    counter!("tracewire_requests_total", "transport" => transport, "outcome" => outcome).increment(1);
    histogram!("tracewire_request_duration_seconds", "transport" => transport)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rejected(transport: &'static str) {
    counter!("tracewire_requests_rejected_total", "transport" => transport).increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!("tracewire_in_flight").set(count as f64);
}

pub fn record_forced_shutdown() {
    counter!("tracewire_shutdown_forced_total").increment(1);
}
