// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process broker used by tests: a recording publisher and a
//! channel-fed consumer-group member.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{BrokerError, ConsumedMessage, GroupConsumer, SeriesPublisher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Publisher that records every accepted message in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<PublishedMessage>>,
    fail_publishes: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// When set, every publish fails with [`BrokerError::PublishTimeout`].
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SeriesPublisher for MemoryPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: String,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::PublishTimeout);
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                topic: topic.to_string(),
                key,
                payload,
            });
        Ok(())
    }
}

/// Consumer fed through an in-process channel. Closing the sender ends
/// the stream, which consumers observe as [`BrokerError::Closed`].
pub struct MemoryGroupConsumer {
    rx: tokio::sync::Mutex<mpsc::Receiver<ConsumedMessage>>,
    marked: Mutex<Vec<(String, i32, i64)>>,
}

impl MemoryGroupConsumer {
    pub fn channel(capacity: usize) -> (mpsc::Sender<ConsumedMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                rx: tokio::sync::Mutex::new(rx),
                marked: Mutex::new(Vec::new()),
            },
        )
    }

    /// `(topic, partition, offset)` triples marked processed so far.
    pub fn marked_offsets(&self) -> Vec<(String, i32, i64)> {
        self.marked.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl GroupConsumer for MemoryGroupConsumer {
    async fn wait_ready(&self) {}

    async fn recv(&self) -> Result<ConsumedMessage, BrokerError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(BrokerError::Closed)
    }

    fn mark_processed(&self, message: &ConsumedMessage) -> Result<(), BrokerError> {
        self.marked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message.topic.clone(), message.partition, message.offset));
        Ok(())
    }
}
