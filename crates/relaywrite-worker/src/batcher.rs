// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-partition batch accumulation.
//!
//! One batcher task runs per assigned `(topic, partition)` pair. It
//! appends incoming messages to the current batch and flushes when the
//! batch reaches its message or byte limit, when the flush interval
//! elapses, or when its channel closes on shutdown. Messages are marked
//! processed on append; delivery failures never rewind offsets.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relaywrite_broker::{ConsumedMessage, GroupConsumer};
use relaywrite_core::prompb::WriteRequest;
use relaywrite_core::{codec, compress, Compression};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::metrics::Metrics;
use crate::sink::RemoteWriteSink;

#[derive(Clone, Debug)]
pub struct BatchLimits {
    pub max_messages: usize,
    pub max_bytes: usize,
    pub interval: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_messages: 100_000,
            max_bytes: 30 * 1024 * 1024,
            interval: Duration::from_secs(1),
        }
    }
}

pub struct PartitionBatcher {
    topic: String,
    partition: i32,
    limits: BatchLimits,
    sink: Arc<RemoteWriteSink>,
    consumer: Arc<dyn GroupConsumer>,
    pending: Vec<Vec<u8>>,
    pending_bytes: usize,
}

impl PartitionBatcher {
    pub fn new(
        topic: String,
        partition: i32,
        limits: BatchLimits,
        sink: Arc<RemoteWriteSink>,
        consumer: Arc<dyn GroupConsumer>,
    ) -> Self {
        Self {
            topic,
            partition,
            limits,
            sink,
            consumer,
            pending: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Runs until the channel closes, then flushes whatever is left.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ConsumedMessage>) {
        let mut flush_timer = tokio::time::interval(self.limits.interval);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it.
        flush_timer.reset();

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(message) => {
                        self.append(message);
                        if self.pending.len() >= self.limits.max_messages
                            || self.pending_bytes >= self.limits.max_bytes
                        {
                            self.flush().await;
                            flush_timer.reset();
                        }
                    }
                    None => break,
                },
                _ = flush_timer.tick() => {
                    if !self.pending.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }

        if !self.pending.is_empty() {
            self.flush().await;
        }
        debug!("batcher for {}/{} stopped", self.topic, self.partition);
    }

    fn append(&mut self, message: ConsumedMessage) {
        // Marked before delivery: a crash between here and the flush
        // loses the batch rather than replaying it.
        if let Err(e) = self.consumer.mark_processed(&message) {
            warn!(
                "unable to store offset {} for {}/{}: {e}",
                message.offset, message.topic, message.partition
            );
        }
        self.pending_bytes += message.payload.len();
        self.pending.push(message.payload);
    }

    async fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;
        let metrics = Metrics::get();

        let mut request = WriteRequest::default();
        for payload in &pending {
            match codec::decode_series(payload) {
                Ok(series) => request.timeseries.push(series),
                Err(e) => {
                    // One corrupt message poisons the whole batch; the
                    // offsets are already stored, so drop it all.
                    error!(
                        "abandoning batch of {} messages from {}/{}: {e}",
                        pending.len(),
                        self.topic,
                        self.partition
                    );
                    if let Some(m) = metrics {
                        m.batches_abandoned.inc();
                    }
                    return;
                }
            }
        }

        let series_count = request.timeseries.len();
        let encoded = codec::encode_write_request(&request);
        let compressed = match compress(Compression::Snappy, &encoded) {
            Ok(compressed) => compressed,
            Err(e) => {
                error!("unable to compress batch: {e}");
                if let Some(m) = metrics {
                    m.batches_abandoned.inc();
                }
                return;
            }
        };

        match self.sink.deliver(Bytes::from(compressed)).await {
            Ok(()) => {
                debug!(
                    "flushed {series_count} series from {}/{}",
                    self.topic, self.partition
                );
                if let Some(m) = metrics {
                    m.batches_flushed.with_label_values(&[&self.topic]).inc();
                    m.batch_size.observe(series_count as f64);
                }
            }
            Err(e) => {
                error!(
                    "dropping batch of {series_count} series from {}/{}: {e}",
                    self.topic, self.partition
                );
                if let Some(m) = metrics {
                    m.batches_dropped.inc();
                }
            }
        }
    }
}
