// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote-write ingress gateway.
//!
//! Accepts Prometheus-compatible remote-write requests, authenticates
//! the caller, negotiates the wire protocol, splits the payload into
//! individual series and publishes each one to a log topic keyed by
//! [`relaywrite_core::partition_key`]. Publish health feeds a
//! trailing-window circuit breaker that sheds load while the broker is
//! failing.

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
