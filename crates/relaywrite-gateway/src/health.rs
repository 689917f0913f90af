// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Circuit breaker fed by asynchronous publish failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use relaywrite_broker::BrokerError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::error;

/// The breaker stays open for this long after the last recorded error.
pub const ERROR_WINDOW: Duration = Duration::from_secs(10);

/// Shared publish-health state. A single monitor task records errors;
/// request handlers only read.
#[derive(Debug, Default)]
pub struct HealthState {
    last_error_ms: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self) {
        self.record_error_at(now_unix_ms());
    }

    fn record_error_at(&self, now_ms: u64) {
        // fetch_max keeps the timestamp monotonic under races.
        self.last_error_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// True while the last error is strictly inside the window. At
    /// exactly [`ERROR_WINDOW`] the breaker is closed again.
    pub fn is_open(&self) -> bool {
        self.is_open_at(now_unix_ms())
    }

    fn is_open_at(&self, now_ms: u64) -> bool {
        let last = self.last_error_ms.load(Ordering::Relaxed);
        last != 0 && now_ms.saturating_sub(last) < ERROR_WINDOW.as_millis() as u64
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Drains the publisher's delivery-error channel into the breaker.
/// Exits when the publisher is dropped.
pub fn spawn_error_monitor(
    health: Arc<HealthState>,
    mut errors: UnboundedReceiver<BrokerError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(e) = errors.recv().await {
            error!("failed to deliver published message: {e}");
            health.record_error();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const WINDOW_MS: u64 = ERROR_WINDOW.as_millis() as u64;

    #[test]
    fn closed_without_errors() {
        let health = HealthState::new();
        assert!(!health.is_open_at(1_000_000));
    }

    #[test]
    fn open_within_window() {
        let health = HealthState::new();
        health.record_error_at(1_000_000);
        assert!(health.is_open_at(1_000_000));
        assert!(health.is_open_at(1_000_000 + WINDOW_MS - 1));
    }

    #[test]
    fn closed_at_window_boundary() {
        let health = HealthState::new();
        health.record_error_at(1_000_000);
        assert!(!health.is_open_at(1_000_000 + WINDOW_MS));
    }

    #[test]
    fn timestamp_never_moves_backwards() {
        let health = HealthState::new();
        health.record_error_at(2_000_000);
        health.record_error_at(1_000_000);
        assert!(health.is_open_at(2_000_000 + WINDOW_MS - 1));
    }

    #[tokio::test]
    async fn monitor_records_channel_errors() {
        let health = Arc::new(HealthState::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = spawn_error_monitor(Arc::clone(&health), rx);

        tx.send(BrokerError::Delivery("boom".to_string())).unwrap();
        drop(tx);
        monitor.await.unwrap();

        assert!(health.is_open());
    }
}
