// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the gateway.

use std::sync::OnceLock;

use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    /// Write requests that passed the circuit breaker and the probe
    /// short-circuit.
    pub write_requests: Counter,

    /// Compressed body bytes received.
    pub received_bytes: Counter,

    /// Body bytes after decompression.
    pub received_uncompressed_bytes: Counter,

    /// Accepted writes by negotiated protocol.
    pub requests_by_protocol: CounterVec,

    /// Series messages handed to the broker, by topic.
    pub published_messages: CounterVec,

    /// End-to-end write handling latency.
    pub request_duration_seconds: Histogram,
}

impl Metrics {
    pub fn init() -> Result<&'static Metrics, prometheus::Error> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            write_requests: register_counter!(
                "relaywrite_gateway_write_requests_total",
                "Total remote-write requests handled"
            )?,
            received_bytes: register_counter!(
                "relaywrite_gateway_received_bytes_total",
                "Total compressed request body bytes received"
            )?,
            received_uncompressed_bytes: register_counter!(
                "relaywrite_gateway_received_uncompressed_bytes_total",
                "Total request body bytes after decompression"
            )?,
            requests_by_protocol: register_counter_vec!(
                "relaywrite_gateway_requests_protocol_total",
                "Accepted write requests by remote-write protocol",
                &["protocol"]
            )?,
            published_messages: register_counter_vec!(
                "relaywrite_gateway_published_messages_total",
                "Series messages published to the broker",
                &["topic"]
            )?,
            request_duration_seconds: register_histogram!(
                "relaywrite_gateway_request_duration_seconds",
                "Write request handling duration in seconds"
            )?,
        };

        Ok(METRICS.get_or_init(|| metrics))
    }

    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }
}

/// Renders the default registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}
