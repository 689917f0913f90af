// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relaywrite_broker::kafka::KafkaPublisher;
use relaywrite_gateway::config::GatewayConfig;
use relaywrite_gateway::health::{spawn_error_monitor, HealthState};
use relaywrite_gateway::metrics::Metrics;
use relaywrite_gateway::server::Gateway;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RELAYWRITE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("hyper=off,rdkafka=off,{}", log_level);

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

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("RELAYWRITE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match GatewayConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("unable to load config from {config_path}: {e}");
            return;
        }
    };

    if let Err(e) = Metrics::init() {
        error!("unable to register metrics: {e}");
        return;
    }

    let (publisher, errors_rx) =
        match KafkaPublisher::new(&config.kafka.brokers, "relaywrite-gateway") {
            Ok(value) => value,
            Err(e) => {
                error!("unable to create kafka producer: {e}");
                return;
            }
        };

    let health = Arc::new(HealthState::new());
    let error_monitor = spawn_error_monitor(Arc::clone(&health), errors_rx);

    let listen_address =
        env::var("LISTEN_ADDRESS").unwrap_or_else(|_| DEFAULT_LISTEN_ADDRESS.to_string());
    let listener = match TcpListener::bind(&listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("unable to bind {listen_address}: {e}");
            return;
        }
    };
    info!("gateway listening on {listen_address}");

    let gateway = Arc::new(Gateway::new(config, Arc::new(publisher), health));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    gateway.serve(listener, shutdown).await;

    // The publisher is gone with the gateway; the monitor exits once
    // its channel drains.
    let _ = error_monitor.await;
    info!("gateway stopped");
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
