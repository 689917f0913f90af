// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared leaf crate for the relaywrite pipeline: the remote-write wire
//! format, the two body compressions, and partition-key derivation.
//!
//! Both the gateway and the worker depend on this crate and nothing in
//! here performs I/O.

pub mod codec;
pub mod partition;
pub mod prompb;

pub use codec::{compress, decompress, CodecError, Compression};
pub use partition::partition_key;
