// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote-write protocol negotiation.
//!
//! Two protocol families are accepted on the same endpoint: the
//! Prometheus remote-write 0.1.0 protocol (snappy-compressed bodies)
//! and the VictoriaMetrics variant (zstd-compressed bodies). A request
//! declares its family through version headers; a request carrying the
//! `get_vm_proto_version` query parameter is a capability probe and
//! carries no write payload at all.

use hyper::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use relaywrite_core::Compression;

pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
pub const PROMETHEUS_VERSION_HEADER: &str = "x-prometheus-remote-write-version";
pub const PROMETHEUS_VERSION: &str = "0.1.0";
pub const VICTORIAMETRICS_VERSION_HEADER: &str = "x-victoriametrics-remote-write-version";
pub const VICTORIAMETRICS_VERSION: &str = "1";
pub const VM_PROBE_PARAM: &str = "get_vm_proto_version";
/// The only protocol version the probe endpoint reports.
pub const VM_PROTO_VERSION: &str = "1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteProtocol {
    Prometheus,
    VictoriaMetrics,
}

impl WriteProtocol {
    pub fn compression(self) -> Compression {
        match self {
            Self::Prometheus => Compression::Snappy,
            Self::VictoriaMetrics => Compression::Zstd,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prometheus => "prometheus",
            Self::VictoriaMetrics => "victoriametrics",
        }
    }
}

/// Outcome of inspecting an incoming write request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Negotiation {
    /// Capability probe; answer with the supported protocol version.
    VersionProbe,
    /// A write carrying a payload in the given protocol.
    Write(WriteProtocol),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedProbeVersion(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("unsupported {header} version: {value}")]
    UnsupportedVersion { header: &'static str, value: String },

    #[error("unsupported content encoding for {protocol}: {encoding}")]
    UnsupportedEncoding {
        protocol: &'static str,
        encoding: String,
    },

    #[error("unsupported remote write protocol")]
    NoProtocol,
}

/// Negotiates the protocol for a write request from its query string
/// and headers.
///
/// The probe parameter wins over everything else. When both families'
/// version headers are present each is validated and the
/// VictoriaMetrics variant is selected.
pub fn negotiate(query: Option<&str>, headers: &HeaderMap) -> Result<Negotiation, ProtocolError> {
    if let Some(version) = query_param(query, VM_PROBE_PARAM) {
        if version == VM_PROTO_VERSION {
            return Ok(Negotiation::VersionProbe);
        }
        return Err(ProtocolError::UnsupportedProbeVersion(version.to_string()));
    }

    let content_type = header_str(headers, CONTENT_TYPE.as_str());
    if content_type != CONTENT_TYPE_PROTOBUF {
        return Err(ProtocolError::UnsupportedContentType(
            content_type.to_string(),
        ));
    }

    let encoding = header_str(headers, CONTENT_ENCODING.as_str());
    let mut protocol = None;

    if headers.contains_key(PROMETHEUS_VERSION_HEADER) {
        let version = header_str(headers, PROMETHEUS_VERSION_HEADER);
        if version != PROMETHEUS_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                header: PROMETHEUS_VERSION_HEADER,
                value: version.to_string(),
            });
        }
        if encoding != Compression::Snappy.content_encoding() {
            return Err(ProtocolError::UnsupportedEncoding {
                protocol: WriteProtocol::Prometheus.as_str(),
                encoding: encoding.to_string(),
            });
        }
        protocol = Some(WriteProtocol::Prometheus);
    }

    if headers.contains_key(VICTORIAMETRICS_VERSION_HEADER) {
        let version = header_str(headers, VICTORIAMETRICS_VERSION_HEADER);
        if version != VICTORIAMETRICS_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                header: VICTORIAMETRICS_VERSION_HEADER,
                value: version.to_string(),
            });
        }
        if encoding != Compression::Zstd.content_encoding() {
            return Err(ProtocolError::UnsupportedEncoding {
                protocol: WriteProtocol::VictoriaMetrics.as_str(),
                encoding: encoding.to_string(),
            });
        }
        protocol = Some(WriteProtocol::VictoriaMetrics);
    }

    protocol.map(Negotiation::Write).ok_or(ProtocolError::NoProtocol)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                hyper::header::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn probe_request() {
        let result = negotiate(Some("get_vm_proto_version=1"), &HeaderMap::new());
        assert_eq!(result, Ok(Negotiation::VersionProbe));
    }

    #[test]
    fn probe_with_unsupported_version() {
        let result = negotiate(Some("get_vm_proto_version=2"), &HeaderMap::new());
        assert_eq!(
            result,
            Err(ProtocolError::UnsupportedProbeVersion("2".to_string()))
        );
    }

    #[test]
    fn probe_wins_over_write_headers() {
        let headers = headers(&[
            ("content-type", CONTENT_TYPE_PROTOBUF),
            ("content-encoding", "snappy"),
            (PROMETHEUS_VERSION_HEADER, "0.1.0"),
        ]);
        let result = negotiate(Some("foo=bar&get_vm_proto_version=1"), &headers);
        assert_eq!(result, Ok(Negotiation::VersionProbe));
    }

    #[test]
    fn prometheus_write() {
        let headers = headers(&[
            ("content-type", CONTENT_TYPE_PROTOBUF),
            ("content-encoding", "snappy"),
            (PROMETHEUS_VERSION_HEADER, "0.1.0"),
        ]);
        let result = negotiate(None, &headers);
        assert_eq!(
            result,
            Ok(Negotiation::Write(WriteProtocol::Prometheus))
        );
    }

    #[test]
    fn victoriametrics_write() {
        let headers = headers(&[
            ("content-type", CONTENT_TYPE_PROTOBUF),
            ("content-encoding", "zstd"),
            (VICTORIAMETRICS_VERSION_HEADER, "1"),
        ]);
        let result = negotiate(None, &headers);
        assert_eq!(
            result,
            Ok(Negotiation::Write(WriteProtocol::VictoriaMetrics))
        );
    }

    #[test]
    fn both_version_headers_validate_both_encodings() {
        // Each family pins its own encoding, so a request declaring
        // both families can never satisfy both checks.
        for encoding in ["snappy", "zstd"] {
            let headers = headers(&[
                ("content-type", CONTENT_TYPE_PROTOBUF),
                ("content-encoding", encoding),
                (PROMETHEUS_VERSION_HEADER, "0.1.0"),
                (VICTORIAMETRICS_VERSION_HEADER, "1"),
            ]);
            assert!(matches!(
                negotiate(None, &headers),
                Err(ProtocolError::UnsupportedEncoding { .. })
            ));
        }
    }

    #[test]
    fn wrong_content_type() {
        let headers = headers(&[("content-type", "application/json")]);
        assert_eq!(
            negotiate(None, &headers),
            Err(ProtocolError::UnsupportedContentType(
                "application/json".to_string()
            ))
        );
    }

    #[test]
    fn missing_content_type() {
        assert_eq!(
            negotiate(None, &HeaderMap::new()),
            Err(ProtocolError::UnsupportedContentType(String::new()))
        );
    }

    #[test]
    fn unsupported_prometheus_version() {
        let headers = headers(&[
            ("content-type", CONTENT_TYPE_PROTOBUF),
            ("content-encoding", "snappy"),
            (PROMETHEUS_VERSION_HEADER, "2.0.0"),
        ]);
        assert!(matches!(
            negotiate(None, &headers),
            Err(ProtocolError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn prometheus_rejects_gzip() {
        let headers = headers(&[
            ("content-type", CONTENT_TYPE_PROTOBUF),
            ("content-encoding", "gzip"),
            (PROMETHEUS_VERSION_HEADER, "0.1.0"),
        ]);
        assert!(matches!(
            negotiate(None, &headers),
            Err(ProtocolError::UnsupportedEncoding { .. })
        ));
    }

    #[test]
    fn no_version_header() {
        let headers = headers(&[
            ("content-type", CONTENT_TYPE_PROTOBUF),
            ("content-encoding", "snappy"),
        ]);
        assert_eq!(negotiate(None, &headers), Err(ProtocolError::NoProtocol));
    }
}
