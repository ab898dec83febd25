//! The server HTTP/1↔gRPC codec (spec §4.4): content-type classification,
//! encoding negotiation, and the three response-body shapes (plain binary,
//! gRPC-Web binary-with-in-body-trailers, gRPC-Web-Text/base64).
//!
//! `grpcurl-core` is a client-only library with no server-side code to
//! adapt here, so this module follows §4.4/§6's wire format directly,
//! reusing the `base64` dependency already pulled in for gRPC-Web framing.

use bytes::Bytes;

use crate::compression::CompressionAlgorithm;
use crate::error::Result;
use crate::framing::{FrameReader, FrameWriter};
use crate::metadata::Metadata;
use crate::status::GrpcStatus;

use super::{encode_trailer_block, Base64InboundBuffer, ContentKind};

/// Outcome of validating the request's `grpc-encoding` against what this
/// server can actually decode and what it advertises (spec §4.4
/// "Encoding negotiation").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingOutcome {
    /// Recognized and in the advertised `grpc-accept-encoding` set.
    Supported(CompressionAlgorithm),
    /// Recognized and decodable, but not normally advertised; the response
    /// must add it to `grpc-accept-encoding` so the client learns it works.
    SupportedButUndisclosed(CompressionAlgorithm),
    /// Not a recognized algorithm name at all.
    Unsupported(String),
}

/// spec §4.4 "Encoding negotiation". `decodable` is every algorithm this
/// server implementation can actually decompress; `advertised` is the
/// subset it lists in `grpc-accept-encoding` by default.
pub fn negotiate_request_encoding(
    requested: Option<&str>,
    decodable: &[CompressionAlgorithm],
    advertised: &[CompressionAlgorithm],
) -> EncodingOutcome {
    let Some(name) = requested else {
        return EncodingOutcome::Supported(CompressionAlgorithm::Identity);
    };
    match CompressionAlgorithm::from_wire_name(name) {
        Some(algo) if advertised.contains(&algo) => EncodingOutcome::Supported(algo),
        Some(algo) if decodable.contains(&algo) => EncodingOutcome::SupportedButUndisclosed(algo),
        _ => EncodingOutcome::Unsupported(name.to_string()),
    }
}

/// spec §4.4 "Response encoding selection": the first algorithm in the
/// client's comma-separated `grpc-accept-encoding` that this server also
/// has enabled for outbound use.
pub fn select_response_encoding(
    client_accept_encoding: &str,
    server_enabled: &[CompressionAlgorithm],
) -> Option<CompressionAlgorithm> {
    crate::compression::MessageEncoding::parse_accept_encoding(client_accept_encoding)
        .into_iter()
        .find(|algo| server_enabled.contains(algo))
}

/// Decodes an inbound HTTP/1 request body into gRPC messages, handling the
/// gRPC-Web-Text base64 layer transparently.
pub struct RequestBodyDecoder {
    kind: ContentKind,
    text: Option<Base64InboundBuffer>,
    reader: FrameReader,
}

impl RequestBodyDecoder {
    pub fn new(kind: ContentKind, decoder: Option<CompressionAlgorithm>, limit: crate::compression::DecompressionLimit) -> Self {
        RequestBodyDecoder {
            kind,
            text: matches!(kind, ContentKind::WebText).then(Base64InboundBuffer::new),
            reader: FrameReader::new(decoder, limit),
        }
    }

    /// Feeds one body chunk, returning every gRPC message it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        if let Some(text) = &mut self.text {
            let decoded = text.push(chunk)?;
            self.reader.append(&decoded);
        } else {
            self.reader.append(chunk);
        }
        self.reader.drain_messages()
    }
}

/// What the caller must do with a completed response (spec §4.4's three
/// body shapes).
pub enum ResponseTail {
    /// Plain `application/grpc`: use real HTTP/2 trailers.
    NativeTrailers { trailers: Metadata, status: GrpcStatus },
    /// gRPC-Web binary: append these bytes to the body, then end the
    /// response with an empty DATA frame.
    InBodyTrailers(Bytes),
    /// gRPC-Web-Text: the *entire* response body (messages and trailers
    /// together), already base64-encoded.
    TextBody(String),
}

/// Encodes outbound gRPC messages for one HTTP/1 response, handling the
/// gRPC-Web binary in-body-trailer shape and the gRPC-Web-Text
/// accumulate-then-base64 shape (spec §4.4).
pub struct ResponseBodyEncoder {
    kind: ContentKind,
    writer: FrameWriter,
    text_buffer: Vec<u8>,
}

impl ResponseBodyEncoder {
    pub fn new(kind: ContentKind, encoder: Option<CompressionAlgorithm>) -> Self {
        ResponseBodyEncoder {
            kind,
            writer: FrameWriter::new(encoder),
            text_buffer: Vec::new(),
        }
    }

    /// Frames one message. For `Binary`/`WebBinary`, returns the bytes to
    /// write immediately. For `WebText`, the framed bytes are buffered
    /// internally and `None` is returned — nothing streams until `finish`.
    pub fn push_message(&mut self, payload: &[u8], compress: bool) -> Result<Option<Bytes>> {
        let framed = self.writer.encode(payload, compress)?.into_bytes();
        match self.kind {
            ContentKind::WebText => {
                self.text_buffer.extend_from_slice(&framed);
                Ok(None)
            }
            ContentKind::Binary | ContentKind::WebBinary => Ok(Some(framed)),
        }
    }

    /// Finalizes the response (spec §4.4's three trailer shapes).
    pub fn finish(mut self, trailers: Metadata, status: GrpcStatus) -> ResponseTail {
        match self.kind {
            ContentKind::Binary => ResponseTail::NativeTrailers { trailers, status },
            ContentKind::WebBinary => {
                ResponseTail::InBodyTrailers(Bytes::from(encode_trailer_block(&trailers, &status)))
            }
            ContentKind::WebText => {
                self.text_buffer
                    .extend_from_slice(&encode_trailer_block(&trailers, &status));
                let encoded = {
                    use base64::engine::general_purpose::STANDARD;
                    use base64::Engine as _;
                    STANDARD.encode(&self.text_buffer)
                };
                ResponseTail::TextBody(encoded)
            }
        }
    }
}

/// spec §4.4 "Trailers-only on error": if a status is produced before any
/// headers have been sent on the wire, the caller must synthesize an empty
/// headers block first (HTTP/2 Trailers-Only has no HTTP/1.1 equivalent).
pub fn synthesize_headers_if_needed(headers_already_sent: bool) -> Option<http::HeaderMap> {
    if headers_already_sent {
        None
    } else {
        Some(http::HeaderMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::DecompressionLimit;
    use crate::status::StatusCode;

    #[test]
    fn negotiation_supported_when_advertised() {
        let outcome = negotiate_request_encoding(
            Some("gzip"),
            &[CompressionAlgorithm::Gzip],
            &[CompressionAlgorithm::Gzip],
        );
        assert_eq!(outcome, EncodingOutcome::Supported(CompressionAlgorithm::Gzip));
    }

    #[test]
    fn negotiation_supported_but_undisclosed() {
        let outcome = negotiate_request_encoding(
            Some("gzip"),
            &[CompressionAlgorithm::Gzip],
            &[CompressionAlgorithm::Identity],
        );
        assert_eq!(
            outcome,
            EncodingOutcome::SupportedButUndisclosed(CompressionAlgorithm::Gzip)
        );
    }

    #[test]
    fn negotiation_unsupported_for_unknown_name() {
        let outcome = negotiate_request_encoding(Some("snappy"), &[], &[]);
        assert_eq!(outcome, EncodingOutcome::Unsupported("snappy".to_string()));
    }

    #[test]
    fn missing_encoding_header_is_identity() {
        let outcome = negotiate_request_encoding(None, &[], &[]);
        assert_eq!(outcome, EncodingOutcome::Supported(CompressionAlgorithm::Identity));
    }

    #[test]
    fn response_encoding_picks_first_mutually_enabled() {
        let picked = select_response_encoding(
            "deflate, gzip",
            &[CompressionAlgorithm::Identity, CompressionAlgorithm::Gzip],
        );
        assert_eq!(picked, Some(CompressionAlgorithm::Gzip));
    }

    #[test]
    fn binary_response_uses_native_trailers() {
        let encoder = ResponseBodyEncoder::new(ContentKind::Binary, None);
        let tail = encoder.finish(Metadata::new(), GrpcStatus::ok());
        assert!(matches!(tail, ResponseTail::NativeTrailers { .. }));
    }

    #[test]
    fn web_binary_response_embeds_trailers_in_body() {
        let mut encoder = ResponseBodyEncoder::new(ContentKind::WebBinary, None);
        let framed = encoder.push_message(b"ab", false).unwrap().unwrap();
        assert!(!framed.is_empty());
        let tail = encoder.finish(Metadata::new(), GrpcStatus::ok());
        match tail {
            ResponseTail::InBodyTrailers(bytes) => assert_eq!(bytes[0], 0x80),
            _ => panic!("expected in-body trailers"),
        }
    }

    #[test]
    fn web_text_response_buffers_until_finish_then_base64_encodes() {
        let mut encoder = ResponseBodyEncoder::new(ContentKind::WebText, None);
        assert!(encoder.push_message(b"ab", false).unwrap().is_none());
        let tail = encoder.finish(Metadata::new(), GrpcStatus::new(StatusCode::Internal, None));
        match tail {
            ResponseTail::TextBody(text) => {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine as _;
                let decoded = STANDARD.decode(text).unwrap();
                assert_eq!(decoded[0], 0); // uncompressed message flag
                let as_text = String::from_utf8_lossy(&decoded);
                assert!(as_text.contains("grpc-status: 13"));
            }
            _ => panic!("expected text body"),
        }
    }

    #[test]
    fn request_body_decoder_handles_web_text_chunking() {
        let writer = FrameWriter::new(None);
        let framed = writer.encode(b"hello", false).unwrap().into_bytes();
        let encoded = {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine as _;
            STANDARD.encode(&framed)
        };

        let mut decoder = RequestBodyDecoder::new(ContentKind::WebText, None, DecompressionLimit::DEFAULT);
        let bytes = encoded.as_bytes();
        let mut messages = Vec::new();
        messages.extend(decoder.push_chunk(&bytes[..4]).unwrap());
        messages.extend(decoder.push_chunk(&bytes[4..]).unwrap());
        assert_eq!(messages, vec![b"hello".to_vec()]);
    }

    #[test]
    fn trailers_only_on_error_synthesizes_empty_headers() {
        assert!(synthesize_headers_if_needed(false).is_some());
        assert!(synthesize_headers_if_needed(true).is_none());
    }
}
