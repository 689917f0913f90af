// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relaywrite_broker::kafka::KafkaGroupConsumer;
use relaywrite_broker::GroupConsumer;
use relaywrite_worker::batcher::BatchLimits;
use relaywrite_worker::config::WorkerConfig;
use relaywrite_worker::metrics::{spawn_exposition_listener, Metrics};
use relaywrite_worker::runtime::WorkerRuntime;
use relaywrite_worker::sink::{RemoteWriteSink, SinkConfig};

/// How long shutdown waits for batchers to flush their remainders.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RELAYWRITE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("hyper=off,reqwest=off,rdkafka=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("unable to load config: {e}");
            return;
        }
    };

    if let Err(e) = Metrics::init() {
        error!("unable to register metrics: {e}");
        return;
    }
    if let Some(address) = config.metrics_listen.clone() {
        spawn_exposition_listener(address);
    }

    let sink = match RemoteWriteSink::new(SinkConfig::new(config.write_endpoint.clone())) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            error!("unable to create remote-write client: {e}");
            return;
        }
    };

    let consumer = match KafkaGroupConsumer::new(&config.brokers, &config.group_id, &config.topics)
    {
        Ok(consumer) => Arc::new(consumer),
        Err(e) => {
            error!("unable to create consumer group: {e}");
            return;
        }
    };

    let runtime = WorkerRuntime::new(
        Arc::clone(&consumer) as Arc<dyn GroupConsumer>,
        sink,
        BatchLimits::default(),
    );

    let shutdown = CancellationToken::new();
    let runtime_handle = tokio::spawn(runtime.run(shutdown.clone()));

    consumer.wait_ready().await;
    info!(
        "worker consuming {:?} as group {}",
        config.topics, config.group_id
    );

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    shutdown.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, runtime_handle)
        .await
        .is_err()
    {
        warn!("batchers did not stop within the shutdown grace period");
    }
    info!("worker stopped");
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("unable to install SIGINT handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("unable to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
