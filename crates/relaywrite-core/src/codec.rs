// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Body compression and wire encode/decode.
//!
//! Two compressions are supported: raw-block snappy (the Prometheus
//! remote-write encoding, also used for worker→sink delivery) and zstd
//! (the VictoriaMetrics ingress encoding). Encode never fails; decode
//! and decompress return [`CodecError`], which callers map to a 400 on
//! ingress or an abandoned batch on the worker.

use prost::Message;

use crate::prompb::{TimeSeries, WriteRequest};

/// Compression scheme negotiated from the `Content-Encoding` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Snappy,
    Zstd,
}

impl Compression {
    /// The `Content-Encoding` token for this compression.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Compression::Snappy => "snappy",
            Compression::Zstd => "zstd",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("error decoding snappy: {0}")]
    Snappy(#[from] snap::Error),

    #[error("error decoding zstd: {0}")]
    Zstd(std::io::Error),

    #[error("error decoding protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match compression {
        Compression::Snappy => Ok(snap::raw::Encoder::new().compress_vec(data)?),
        Compression::Zstd => zstd::stream::encode_all(data, 0).map_err(CodecError::Zstd),
    }
}

pub fn decompress(compression: Compression, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match compression {
        Compression::Snappy => Ok(snap::raw::Decoder::new().decompress_vec(data)?),
        Compression::Zstd => zstd::stream::decode_all(data).map_err(CodecError::Zstd),
    }
}

pub fn encode_write_request(request: &WriteRequest) -> Vec<u8> {
    request.encode_to_vec()
}

pub fn decode_write_request(data: &[u8]) -> Result<WriteRequest, CodecError> {
    Ok(WriteRequest::decode(data)?)
}

/// Encodes a single series: the value format of one log message.
pub fn encode_series(series: &TimeSeries) -> Vec<u8> {
    series.encode_to_vec()
}

pub fn decode_series(data: &[u8]) -> Result<TimeSeries, CodecError> {
    Ok(TimeSeries::decode(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompb::{histogram, BucketSpan, Exemplar, Histogram, Label, Sample};

    fn label(name: &str, value: &str) -> Label {
        Label {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn sample_request() -> WriteRequest {
        WriteRequest {
            timeseries: vec![TimeSeries {
                labels: vec![label("__name__", "http_requests_total"), label("job", "api")],
                samples: vec![
                    Sample {
                        value: 1.5,
                        timestamp: 1_700_000_000_000,
                    },
                    Sample {
                        value: 2.0,
                        timestamp: 1_700_000_015_000,
                    },
                ],
                exemplars: vec![Exemplar {
                    labels: vec![label("trace_id", "abc123")],
                    value: 0.25,
                    timestamp: 1_700_000_001_000,
                }],
                histograms: vec![Histogram {
                    count: Some(histogram::Count::CountInt(42)),
                    sum: 9.75,
                    schema: 3,
                    zero_threshold: 1e-128,
                    zero_count: Some(histogram::ZeroCount::ZeroCountInt(2)),
                    negative_spans: vec![BucketSpan {
                        offset: -1,
                        length: 2,
                    }],
                    negative_deltas: vec![1, -1],
                    negative_counts: vec![],
                    positive_spans: vec![BucketSpan { offset: 0, length: 3 }],
                    positive_deltas: vec![2, 1, -2],
                    positive_counts: vec![],
                    reset_hint: histogram::ResetHint::No as i32,
                    timestamp: 1_700_000_000_000,
                }],
            }],
        }
    }

    #[test]
    fn write_request_round_trip() {
        let request = sample_request();
        let encoded = encode_write_request(&request);
        let decoded = decode_write_request(&encoded).expect("decode failed");
        assert_eq!(request, decoded);
    }

    #[test]
    fn series_round_trip() {
        let series = sample_request().timeseries.remove(0);
        let decoded = decode_series(&encode_series(&series)).expect("decode failed");
        assert_eq!(series, decoded);
    }

    #[test]
    fn snappy_round_trip() {
        let compressed = compress(Compression::Snappy, b"test data").unwrap();
        let decompressed = decompress(Compression::Snappy, &compressed).unwrap();
        assert_eq!(decompressed, b"test data");
    }

    #[test]
    fn snappy_rejects_garbage() {
        assert!(decompress(Compression::Snappy, &[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn zstd_round_trip() {
        let compressed = compress(Compression::Zstd, b"test data").unwrap();
        let decompressed = decompress(Compression::Zstd, &compressed).unwrap();
        assert_eq!(decompressed, b"test data");
    }

    #[test]
    fn zstd_rejects_garbage() {
        assert!(decompress(Compression::Zstd, &[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn decode_rejects_truncated_protobuf() {
        let encoded = encode_write_request(&sample_request());
        assert!(decode_write_request(&encoded[..encoded.len() - 3]).is_err());
    }
}
