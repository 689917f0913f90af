// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote-write delivery over HTTP.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::warn;

/// Attempts per batch. Retries are evenly spaced with no backoff; a
/// batch that survives all attempts is dropped by the caller.
const DELIVERY_ATTEMPTS: u32 = 1024;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("error sending request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status code: {status}, body: {body}")]
    Status { status: StatusCode, body: String },

    #[error("delivery failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub endpoint: String,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl SinkConfig {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            attempts: DELIVERY_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Posts snappy-compressed write requests to a Prometheus-compatible
/// remote-write endpoint.
pub struct RemoteWriteSink {
    client: reqwest::Client,
    config: SinkConfig,
}

impl RemoteWriteSink {
    pub fn new(config: SinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Delivers one batch, retrying until it succeeds or the attempt
    /// budget runs out.
    pub async fn deliver(&self, payload: Bytes) -> Result<(), SinkError> {
        for attempt in 1..=self.config.attempts {
            match self.send(payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("error sending batch (attempt {attempt}): {e}");
                    if attempt < self.config.attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(SinkError::Exhausted {
            attempts: self.config.attempts,
        })
    }

    async fn send(&self, payload: Bytes) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header(CONTENT_ENCODING, "snappy")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(endpoint: String, attempts: u32) -> RemoteWriteSink {
        RemoteWriteSink::new(SinkConfig {
            endpoint,
            attempts,
            retry_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn delivers_with_expected_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/write")
            .match_header("content-type", "application/x-protobuf")
            .match_header("content-encoding", "snappy")
            .match_header("x-prometheus-remote-write-version", "0.1.0")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let sink = sink(format!("{}/api/v1/write", server.url()), 3);
        sink.deliver(Bytes::from_static(b"payload")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_until_budget_is_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/write")
            .with_status(500)
            .with_body("boom")
            .expect(3)
            .create_async()
            .await;

        let sink = sink(format!("{}/api/v1/write", server.url()), 3);
        let err = sink.deliver(Bytes::from_static(b"payload")).await.unwrap_err();
        assert!(matches!(err, SinkError::Exhausted { attempts: 3 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn recovers_when_endpoint_comes_back() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/api/v1/write")
            .with_status(503)
            .create_async()
            .await;

        let sink = sink(format!("{}/api/v1/write", server.url()), 100);
        let delivery = tokio::spawn(async move {
            sink.deliver(Bytes::from_static(b"payload")).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        failing.remove_async().await;
        let ok = server
            .mock("POST", "/api/v1/write")
            .with_status(204)
            .create_async()
            .await;

        delivery.await.unwrap().unwrap();
        ok.assert_async().await;
    }
}
