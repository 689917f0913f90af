// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration, loaded from a YAML file.

use figment::providers::{Format, Yaml};
use figment::Figment;
use serde::Deserialize;

/// Default cap on the compressed request body, in bytes.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 128 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error loading config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub kafka: KafkaConfig,
    /// When absent or empty, authentication is disabled and every
    /// request is treated as anonymous.
    #[serde(default)]
    pub users: Option<Vec<User>>,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaConfig {
    /// Default topic for series whose user has no topic override.
    pub topic: String,
    pub brokers: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub login: String,
    pub password: String,
    /// Optional per-user topic override.
    #[serde(default)]
    pub topic: Option<String>,
}

fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

impl GatewayConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Yaml::file(path)))
    }

    pub fn load_from_str(raw: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Yaml::string(raw)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.topic.is_empty() {
            return Err(ConfigError::Invalid("kafka.topic must not be empty"));
        }
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Invalid("kafka.brokers must not be empty"));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Invalid("max_request_bytes must be positive"));
        }
        Ok(())
    }
}
