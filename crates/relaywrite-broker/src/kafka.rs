// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Kafka bindings for the broker capability traits, built on `rdkafka`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{BrokerError, ConsumedMessage, GroupConsumer, SeriesPublisher};

/// Per-request ack timeout configured on the producer.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Send retries configured on the producer.
const SEND_RETRIES: u32 = 3;
/// How long to back off when the local producer queue is full.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Publisher backed by an `rdkafka` [`FutureProducer`].
///
/// `publish` blocks only until the message is accepted into the
/// producer queue, bounded by [`KafkaPublisher::enqueue_timeout`].
/// Delivery results are awaited in the background; failures are
/// forwarded to the error channel returned by [`KafkaPublisher::new`],
/// whose receiver the owning service is expected to drain.
pub struct KafkaPublisher {
    producer: FutureProducer,
    errors_tx: UnboundedSender<BrokerError>,
}

impl KafkaPublisher {
    pub fn new(
        brokers: &[String],
        client_id: &str,
    ) -> Result<(Self, UnboundedReceiver<BrokerError>), BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("client.id", client_id)
            .set("acks", "1")
            .set("request.timeout.ms", SEND_TIMEOUT.as_millis().to_string())
            .set("message.send.max.retries", SEND_RETRIES.to_string())
            .create()
            .map_err(|e| BrokerError::Config(e.to_string()))?;

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                producer,
                errors_tx,
            },
            errors_rx,
        ))
    }

    /// Upper bound on how long `publish` waits for the broker to accept
    /// a message: the producer's ack timeout times its retry count.
    pub fn enqueue_timeout() -> Duration {
        SEND_TIMEOUT * SEND_RETRIES
    }
}

#[async_trait]
impl SeriesPublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: String,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let deadline = Instant::now() + Self::enqueue_timeout();
        let mut record = FutureRecord::to(topic).key(&key).payload(&payload);

        let delivery = loop {
            match self.producer.send_result(record) {
                Ok(delivery) => break delivery,
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    if Instant::now() >= deadline {
                        return Err(BrokerError::PublishTimeout);
                    }
                    record = returned;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((e, _)) => return Err(BrokerError::Publish(e.to_string())),
            }
        };

        // Delivery outcome is decoupled from the request that enqueued
        // the message; errors only feed the health channel.
        let errors_tx = self.errors_tx.clone();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => {
                    let _ = errors_tx.send(BrokerError::Delivery(e.to_string()));
                }
                Err(_) => {
                    let _ = errors_tx.send(BrokerError::Delivery(
                        "delivery result channel canceled".to_string(),
                    ));
                }
            }
        });

        Ok(())
    }
}

/// Latches once the first consumer-group session has been assigned.
struct SessionGate {
    ready: AtomicBool,
    notify: Notify,
}

impl SessionGate {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        while !self.ready.load(Ordering::SeqCst) {
            let notified = self.notify.notified();
            if self.ready.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }
}

struct SessionContext {
    gate: Arc<SessionGate>,
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Revoke(partitions) = rebalance {
            debug!("group session revoked: {} partitions", partitions.count());
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                debug!("group session assigned: {} partitions", partitions.count());
                self.gate.mark_ready();
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!("rebalance error: {e}"),
        }
    }
}

/// Consumer-group member backed by an `rdkafka` [`StreamConsumer`].
///
/// Offsets are stored explicitly through [`GroupConsumer::mark_processed`]
/// and committed by the client's auto-commit loop.
pub struct KafkaGroupConsumer {
    consumer: StreamConsumer<SessionContext>,
    gate: Arc<SessionGate>,
}

impl KafkaGroupConsumer {
    pub fn new(
        brokers: &[String],
        group_id: &str,
        topics: &[String],
    ) -> Result<Self, BrokerError> {
        let gate = Arc::new(SessionGate::new());

        let consumer: StreamConsumer<SessionContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .create_with_context(SessionContext {
                gate: Arc::clone(&gate),
            })
            .map_err(|e| BrokerError::Config(e.to_string()))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BrokerError::Config(e.to_string()))?;

        Ok(Self { consumer, gate })
    }
}

#[async_trait]
impl GroupConsumer for KafkaGroupConsumer {
    async fn wait_ready(&self) {
        self.gate.wait().await;
    }

    async fn recv(&self) -> Result<ConsumedMessage, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        Ok(ConsumedMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    fn mark_processed(&self, message: &ConsumedMessage) -> Result<(), BrokerError> {
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset)
            .map_err(|e| BrokerError::Consume(e.to_string()))
    }
}
