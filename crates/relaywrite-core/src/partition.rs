// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Partition-key derivation for published series.

use std::hash::Hasher;

use fnv::FnvHasher;

use crate::prompb::Label;

/// The reserved label carrying the metric name.
pub const NAME_LABEL: &str = "__name__";

/// Derives the log partition key for a series from its label set.
///
/// If a `__name__` label is present its value is the key, wherever it
/// sits in the sequence. Otherwise the key is `h-` followed by the
/// FNV-1a 64 hash of every label name and value folded in the order
/// given. The fold is deliberately not canonicalized: the same label
/// set presented in a different order yields a different key. Changing
/// that would re-shuffle every keyed series across partitions, so the
/// literal behavior is kept.
pub fn partition_key(labels: &[Label]) -> String {
    if let Some(label) = labels.iter().find(|l| l.name == NAME_LABEL) {
        return label.value.clone();
    }

    let mut hasher = FnvHasher::default();
    for label in labels {
        hasher.write(label.name.as_bytes());
        hasher.write(label.value.as_bytes());
    }

    format!("h-{}", hasher.finish())
}
