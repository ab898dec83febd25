//! The compression algorithm registry (spec §3, §4.3): `identity`,
//! `deflate`, `gzip`, plus the `DecompressionLimit` and negotiated
//! `MessageEncoding` pair.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

use crate::error::{Result, TransportError};

/// An algorithm recognized by name over the wire in `grpc-encoding` /
/// `grpc-accept-encoding` (spec §3). `Identity` is a sentinel: it occupies
/// a slot in the encoding name without invoking a compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    Identity,
    Deflate,
    Gzip,
}

impl CompressionAlgorithm {
    /// Parses the wire name (`grpc-encoding` value). Unrecognized names
    /// return `None` — the caller decides whether that's fatal.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(CompressionAlgorithm::Identity),
            "deflate" => Some(CompressionAlgorithm::Deflate),
            "gzip" => Some(CompressionAlgorithm::Gzip),
            _ => None,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            CompressionAlgorithm::Identity => "identity",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Gzip => "gzip",
        }
    }

    /// Compresses `input`, returning `None` for `Identity` (no compressor
    /// is invoked for the sentinel algorithm).
    pub fn compress(self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            CompressionAlgorithm::Identity => Ok(None),
            CompressionAlgorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(input)
                    .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;
                Ok(Some(encoder.finish().map_err(|e| {
                    TransportError::SerializationFailed(e.to_string())
                })?))
            }
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(input)
                    .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;
                Ok(Some(encoder.finish().map_err(|e| {
                    TransportError::SerializationFailed(e.to_string())
                })?))
            }
        }
    }

    /// Decompresses `input`, enforcing `limit` on the *decompressed* size
    /// (spec §4.3: "Enforce `DecompressionLimit` on the decompressed size
    /// (not the framed size)").
    pub fn decompress(self, input: &[u8], limit: DecompressionLimit) -> Result<Vec<u8>> {
        let cap = limit.0.saturating_add(1);
        let mut out = Vec::new();
        match self {
            CompressionAlgorithm::Identity => {
                out.extend_from_slice(input);
            }
            CompressionAlgorithm::Deflate => {
                let mut decoder = DeflateDecoder::new(input).take(cap as u64);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| TransportError::DeserializationFailed(e.to_string()))?;
            }
            CompressionAlgorithm::Gzip => {
                let mut decoder = GzDecoder::new(input).take(cap as u64);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| TransportError::DeserializationFailed(e.to_string()))?;
            }
        }
        if out.len() > limit.0 {
            return Err(TransportError::DecompressionLimitExceeded {
                limit: limit.0,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A cap on decompressed size per message (spec §3); exceeding it fails
/// the call with `ResourceExhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompressionLimit(pub usize);

impl DecompressionLimit {
    /// 4 MiB, a conservative default matching common gRPC implementations'
    /// default max receive message size.
    pub const DEFAULT: DecompressionLimit = DecompressionLimit(4 * 1024 * 1024);
}

impl Default for DecompressionLimit {
    fn default() -> Self {
        DecompressionLimit::DEFAULT
    }
}

/// The negotiated pair for one direction of traffic: an inbound decoder
/// (possibly none, i.e. identity-only), an outbound encoder (possibly
/// none), plus the advertised `grpc-accept-encoding` list (spec §3).
#[derive(Debug, Clone)]
pub struct MessageEncoding {
    pub decoder: Option<CompressionAlgorithm>,
    pub encoder: Option<CompressionAlgorithm>,
    pub accept_encoding: Vec<CompressionAlgorithm>,
    pub decompression_limit: DecompressionLimit,
}

impl Default for MessageEncoding {
    fn default() -> Self {
        MessageEncoding {
            decoder: None,
            encoder: None,
            accept_encoding: vec![CompressionAlgorithm::Identity],
            decompression_limit: DecompressionLimit::DEFAULT,
        }
    }
}

impl MessageEncoding {
    /// Renders `accept_encoding` as a comma-separated `grpc-accept-encoding`
    /// value.
    pub fn accept_encoding_header(&self) -> String {
        self.accept_encoding
            .iter()
            .map(|a| a.wire_name())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses a comma-separated `grpc-accept-encoding` header value,
    /// silently dropping unrecognized algorithm names.
    pub fn parse_accept_encoding(value: &str) -> Vec<CompressionAlgorithm> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(CompressionAlgorithm::from_wire_name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_name_round_trips() {
        for algo in [
            CompressionAlgorithm::Identity,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Gzip,
        ] {
            assert_eq!(CompressionAlgorithm::from_wire_name(algo.wire_name()), Some(algo));
        }
    }

    #[test]
    fn unknown_wire_name_is_none() {
        assert_eq!(CompressionAlgorithm::from_wire_name("snappy"), None);
    }

    #[test]
    fn identity_compress_is_a_noop_sentinel() {
        let result = CompressionAlgorithm::Identity.compress(b"hello").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn gzip_round_trips() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = CompressionAlgorithm::Gzip.compress(&payload).unwrap().unwrap();
        assert_ne!(compressed, payload);
        let decompressed = CompressionAlgorithm::Gzip
            .decompress(&compressed, DecompressionLimit::DEFAULT)
            .unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn deflate_round_trips() {
        let payload = b"some payload bytes to compress".to_vec();
        let compressed = CompressionAlgorithm::Deflate.compress(&payload).unwrap().unwrap();
        let decompressed = CompressionAlgorithm::Deflate
            .decompress(&compressed, DecompressionLimit::DEFAULT)
            .unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn decompression_limit_is_enforced_on_decompressed_size() {
        let payload = vec![b'x'; 10_000];
        let compressed = CompressionAlgorithm::Gzip.compress(&payload).unwrap().unwrap();
        // The compressed form is small, but the decompressed form exceeds a tiny limit.
        let err = CompressionAlgorithm::Gzip
            .decompress(&compressed, DecompressionLimit(100))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::DecompressionLimitExceeded { limit: 100, .. }
        ));
    }

    #[test]
    fn parse_accept_encoding_drops_unknown_entries() {
        let parsed = MessageEncoding::parse_accept_encoding("gzip, snappy , identity");
        assert_eq!(
            parsed,
            vec![CompressionAlgorithm::Gzip, CompressionAlgorithm::Identity]
        );
    }

    #[test]
    fn accept_encoding_header_joins_with_commas() {
        let encoding = MessageEncoding {
            accept_encoding: vec![CompressionAlgorithm::Identity, CompressionAlgorithm::Gzip],
            ..Default::default()
        };
        assert_eq!(encoding.accept_encoding_header(), "identity,gzip");
    }
}
