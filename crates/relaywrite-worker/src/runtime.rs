// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consume loop: routes messages to per-partition batcher tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relaywrite_broker::{BrokerError, ConsumedMessage, GroupConsumer};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batcher::{BatchLimits, PartitionBatcher};
use crate::metrics::Metrics;
use crate::sink::RemoteWriteSink;

/// Per-partition channel depth. A full channel applies backpressure to
/// the consume loop.
const PARTITION_CHANNEL_CAPACITY: usize = 1024;

/// How long to pause the consume loop after a transient consume error.
const CONSUME_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct WorkerRuntime {
    consumer: Arc<dyn GroupConsumer>,
    sink: Arc<RemoteWriteSink>,
    limits: BatchLimits,
}

impl WorkerRuntime {
    pub fn new(
        consumer: Arc<dyn GroupConsumer>,
        sink: Arc<RemoteWriteSink>,
        limits: BatchLimits,
    ) -> Self {
        Self {
            consumer,
            sink,
            limits,
        }
    }

    /// Consumes until canceled or the consumer closes. On exit the
    /// partition channels are dropped, which makes every batcher flush
    /// its remainder and stop; the call returns once they all have.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut partitions: HashMap<(String, i32), mpsc::Sender<ConsumedMessage>> = HashMap::new();
        let mut batchers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("worker runtime shutting down");
                    break;
                }
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        if let Some(m) = Metrics::get() {
                            m.messages_consumed.inc();
                        }
                        self.route(message, &mut partitions, &mut batchers).await;
                    }
                    Err(BrokerError::Closed) => {
                        info!("consumer closed");
                        break;
                    }
                    Err(e) => {
                        warn!("error consuming: {e}");
                        tokio::time::sleep(CONSUME_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        drop(partitions);
        while batchers.join_next().await.is_some() {}
    }

    async fn route(
        &self,
        message: ConsumedMessage,
        partitions: &mut HashMap<(String, i32), mpsc::Sender<ConsumedMessage>>,
        batchers: &mut JoinSet<()>,
    ) {
        let key = (message.topic.clone(), message.partition);

        if !partitions.contains_key(&key) {
            debug!("starting batcher for {}/{}", key.0, key.1);
            let (tx, rx) = mpsc::channel(PARTITION_CHANNEL_CAPACITY);
            let batcher = PartitionBatcher::new(
                key.0.clone(),
                key.1,
                self.limits.clone(),
                Arc::clone(&self.sink),
                Arc::clone(&self.consumer),
            );
            batchers.spawn(batcher.run(rx));
            partitions.insert(key.clone(), tx);
        }

        let send_failed = match partitions.get(&key) {
            Some(tx) => tx.send(message).await.is_err(),
            None => true,
        };
        if send_failed {
            warn!("batcher for {}/{} is gone, dropping message", key.0, key.1);
            partitions.remove(&key);
        }
    }
}
