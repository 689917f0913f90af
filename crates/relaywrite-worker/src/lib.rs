// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching worker for the relaywrite pipeline.
//!
//! Consumes per-series messages from the log topics as a
//! consumer-group member, accumulates them into per-partition batches
//! and delivers each batch to a Prometheus-compatible remote-write
//! endpoint.

pub mod batcher;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod sink;
