// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the gateway and the write ingestion path.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::WWW_AUTHENTICATE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use relaywrite_broker::{BrokerError, SeriesPublisher};
use relaywrite_core::{codec, partition_key};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{self, AuthError};
use crate::config::GatewayConfig;
use crate::health::HealthState;
use crate::metrics::{self, Metrics};
use crate::protocol::{self, Negotiation, ProtocolError, VM_PROTO_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("request body is too large")]
    PayloadTooLarge,

    #[error("error reading request body: {0}")]
    Body(String),

    #[error("error decoding request: {0}")]
    Decode(#[from] codec::CodecError),

    #[error("timeout writing to kafka")]
    PublishTimeout,

    #[error("error writing to kafka: {0}")]
    Publish(String),

    #[error("gateway is in error state")]
    CircuitOpen,
}

impl WriteError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Protocol(_) | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Body(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PublishTimeout | Self::Publish(_) | Self::CircuitOpen => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

pub struct Gateway {
    config: GatewayConfig,
    publisher: Arc<dyn SeriesPublisher>,
    health: Arc<HealthState>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        publisher: Arc<dyn SeriesPublisher>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            config,
            publisher,
            health,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> hyper::http::Result<Response<Full<Bytes>>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/") => text(StatusCode::OK, "relaywrite-gateway"),
            (&Method::GET, "/metrics") => text(StatusCode::OK, &metrics::gather()),
            (&Method::POST, "/api/v1/write") => match self.handle_write(req).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    debug!("write request rejected: {e}");
                    if let WriteError::Auth(_) = e {
                        return Response::builder()
                            .status(StatusCode::UNAUTHORIZED)
                            .header(WWW_AUTHENTICATE, "Basic realm=\"restricted\"")
                            .body(Full::default());
                    }
                    text(e.status(), &e.to_string())
                }
            },
            _ => text(StatusCode::NOT_FOUND, "not found"),
        }
    }

    async fn handle_write<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, WriteError>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.health.is_open() {
            return Err(WriteError::CircuitOpen);
        }

        let (parts, body) = req.into_parts();

        let protocol = match protocol::negotiate(parts.uri.query(), &parts.headers)? {
            Negotiation::VersionProbe => return text_ok(VM_PROTO_VERSION),
            Negotiation::Write(protocol) => protocol,
        };

        let started = Instant::now();
        let metrics = Metrics::get();
        if let Some(m) = metrics {
            m.write_requests.inc();
        }

        let user = auth::authenticate(&parts.headers, self.config.users.as_deref())?;
        let topic = user
            .topic
            .as_deref()
            .unwrap_or(&self.config.kafka.topic);

        let compressed = Limited::new(body, self.config.max_request_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    WriteError::PayloadTooLarge
                } else {
                    WriteError::Body(e.to_string())
                }
            })?
            .to_bytes();
        if let Some(m) = metrics {
            m.received_bytes.inc_by(compressed.len() as f64);
        }

        let buffer = codec::decompress(protocol.compression(), &compressed)?;
        if let Some(m) = metrics {
            m.requests_by_protocol
                .with_label_values(&[protocol.as_str()])
                .inc();
            m.received_uncompressed_bytes.inc_by(buffer.len() as f64);
        }

        let request = codec::decode_write_request(&buffer)?;

        for series in &request.timeseries {
            let key = partition_key(&series.labels);
            let payload = codec::encode_series(series);
            self.publisher
                .publish(topic, key, payload)
                .await
                .map_err(|e| match e {
                    BrokerError::PublishTimeout => WriteError::PublishTimeout,
                    other => WriteError::Publish(other.to_string()),
                })?;
            if let Some(m) = metrics {
                m.published_messages.with_label_values(&[topic]).inc();
            }
        }

        if let Some(m) = metrics {
            m.request_duration_seconds
                .observe(started.elapsed().as_secs_f64());
        }

        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Full::default())
            .map_err(|e| WriteError::Body(e.to_string()))
    }

    /// Accept loop. Runs until the token is canceled, then waits for
    /// in-flight connections to finish.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let gateway = Arc::clone(&self);
                        connections.spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let gateway = Arc::clone(&gateway);
                                async move { gateway.handle(req).await }
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!("connection error: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("failed to accept connection: {e}"),
                },
                Some(_) = connections.join_next() => {}
            }
        }

        connections.shutdown().await;
    }
}

fn text(status: StatusCode, body: &str) -> hyper::http::Result<Response<Full<Bytes>>> {
    Response::builder()
        .status(status)
        .body(Full::from(Bytes::from(body.to_string())))
}

fn text_ok(body: &str) -> Result<Response<Full<Bytes>>, WriteError> {
    text(StatusCode::OK, body).map_err(|e| WriteError::Body(e.to_string()))
}
