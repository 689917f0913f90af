// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the worker, with an optional exposition
//! listener.

use std::sync::OnceLock;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error};

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    /// Messages received from the broker.
    pub messages_consumed: Counter,

    /// Batches delivered downstream, by topic.
    pub batches_flushed: CounterVec,

    /// Batches dropped after the delivery retry budget ran out.
    pub batches_dropped: Counter,

    /// Batches abandoned because a message failed to decode.
    pub batches_abandoned: Counter,

    /// Series per delivered batch.
    pub batch_size: Histogram,
}

impl Metrics {
    pub fn init() -> Result<&'static Metrics, prometheus::Error> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            messages_consumed: register_counter!(
                "relaywrite_worker_messages_consumed_total",
                "Total messages received from the broker"
            )?,
            batches_flushed: register_counter_vec!(
                "relaywrite_worker_batches_flushed_total",
                "Batches delivered to the remote-write endpoint",
                &["topic"]
            )?,
            batches_dropped: register_counter!(
                "relaywrite_worker_batches_dropped_total",
                "Batches dropped after exhausting delivery retries"
            )?,
            batches_abandoned: register_counter!(
                "relaywrite_worker_batches_abandoned_total",
                "Batches abandoned because a message failed to decode"
            )?,
            batch_size: register_histogram!(
                "relaywrite_worker_batch_size",
                "Series per delivered batch",
                vec![1.0, 10.0, 100.0, 1_000.0, 10_000.0, 100_000.0]
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

/// Starts a minimal exposition server on the given address.
pub fn spawn_exposition_listener(address: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("unable to bind metrics listener on {address}: {e}");
                return;
            }
        };
        debug!("metrics listener on {address}");

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                            let response = match (req.method(), req.uri().path()) {
                                (&Method::GET, "/metrics") => Response::builder()
                                    .status(StatusCode::OK)
                                    .body(Full::<Bytes>::from(Bytes::from(gather()))),
                                _ => Response::builder()
                                    .status(StatusCode::NOT_FOUND)
                                    .body(Full::default()),
                            };
                            response
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("metrics connection error: {e}");
                        }
                    });
                }
                Err(e) => error!("metrics listener accept error: {e}"),
            }
        }
    })
}
