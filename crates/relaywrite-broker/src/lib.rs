// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Broker capability interface for the relaywrite pipeline.
//!
//! The gateway publishes one message per series and the worker consumes
//! them as a consumer-group member. Both sides talk to the broker
//! through the traits in this crate so the ingestion path and the
//! batching state machine can be exercised without a running Kafka
//! cluster: [`kafka`] binds the traits to `rdkafka` for production,
//! [`memory`] provides an in-process broker for tests.

pub mod kafka;
pub mod memory;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid broker configuration: {0}")]
    Config(String),

    #[error("error publishing message: {0}")]
    Publish(String),

    /// The broker did not accept the message within the publish
    /// timeout. Messages already accepted for the same request stay
    /// published.
    #[error("timeout writing to broker")]
    PublishTimeout,

    /// Asynchronous delivery failure reported after the broker accepted
    /// the message. Surfaced on the publisher's error channel, never to
    /// the request that enqueued the message.
    #[error("message delivery failed: {0}")]
    Delivery(String),

    #[error("error consuming message: {0}")]
    Consume(String),

    #[error("consumer closed")]
    Closed,
}

/// One message consumed from a log topic. The payload is a single
/// encoded series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Publish side of the broker.
///
/// `publish` resolves once the broker has accepted the message for
/// delivery, bounded by the implementation's enqueue timeout. Delivery
/// itself is asynchronous; failures after acceptance are reported on
/// the error channel handed out at construction time.
#[async_trait]
pub trait SeriesPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: String, payload: Vec<u8>)
        -> Result<(), BrokerError>;
}

/// Consume side of the broker: a consumer-group member.
///
/// `recv` yields messages in per-partition order; no ordering holds
/// across partitions. `mark_processed` advances the stored offset for
/// the message's partition, independent of any downstream delivery
/// outcome. `wait_ready` resolves once the first group session has
/// been set up.
#[async_trait]
pub trait GroupConsumer: Send + Sync {
    async fn wait_ready(&self);

    async fn recv(&self) -> Result<ConsumedMessage, BrokerError>;

    fn mark_processed(&self, message: &ConsumedMessage) -> Result<(), BrokerError>;
}
