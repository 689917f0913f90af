// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Worker configuration, taken entirely from the environment.

use std::env;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub topics: Vec<String>,
    pub brokers: Vec<String>,
    pub group_id: String,
    pub write_endpoint: String,
    /// When set, a metrics exposition listener is started on this
    /// address.
    pub metrics_listen: Option<String>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            topics: list_var("RELAYWRITE_KAFKA_TOPICS", &["series_default"]),
            brokers: list_var("RELAYWRITE_KAFKA_BROKERS", &["kafka:9092"]),
            group_id: env::var("RELAYWRITE_KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "relaywrite-worker".to_string()),
            write_endpoint: env::var("RELAYWRITE_WRITE_ENDPOINT")
                .unwrap_or_else(|_| "http://victoriametrics:8428/api/v1/write".to_string()),
            metrics_listen: env::var("RELAYWRITE_METRICS_LISTEN").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.topics.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("topic names must not be empty"));
        }
        if self.brokers.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("broker addresses must not be empty"));
        }
        if self.group_id.is_empty() {
            return Err(ConfigError::Invalid("group id must not be empty"));
        }
        if self.write_endpoint.is_empty() {
            return Err(ConfigError::Invalid("write endpoint must not be empty"));
        }
        Ok(())
    }
}

/// Comma-separated list variable with a default.
fn list_var(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw.split(',').map(str::to_string).collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WorkerConfig {
            topics: vec!["series_default".to_string()],
            brokers: vec!["kafka:9092".to_string()],
            group_id: "relaywrite-worker".to_string(),
            write_endpoint: "http://victoriametrics:8428/api/v1/write".to_string(),
            metrics_listen: None,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_topic() {
        let config = WorkerConfig {
            topics: vec!["series_default".to_string(), String::new()],
            brokers: vec!["kafka:9092".to_string()],
            group_id: "relaywrite-worker".to_string(),
            write_endpoint: "http://victoriametrics:8428/api/v1/write".to_string(),
            metrics_listen: None,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid("topic names must not be empty"))
        );
    }
}
