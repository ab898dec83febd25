//! Server-side protocol adapters (spec §4.4–§4.6): the HTTP/1↔gRPC codec,
//! the gRPC-Web↔HTTP/2 duplex adapter, and the idle/keepalive handler.
//!
//! No HTTP/1 wire parser is pulled in here — `hyper`/`hyper-util` aren't a
//! dependency of this crate, so these adapters operate on already-parsed
//! `http::Request`/`http::Response` parts and raw body chunks, the same
//! seam `call.rs` uses for the client side.

pub mod grpc_web;
pub mod http1_codec;
pub mod keepalive;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, TransportError};
use crate::metadata::{percent_encode_message, Metadata};
use crate::status::GrpcStatus;

/// How a request's content-type classifies it (spec §4.4 "Content-type
/// classification"), shared between the HTTP/1 and gRPC-Web adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// `application/grpc` (or a missing header, which defaults here).
    Binary,
    /// `application/grpc-web`.
    WebBinary,
    /// `application/grpc-web-text`.
    WebText,
}

impl ContentKind {
    /// Classifies a `content-type` header value. A value outside the three
    /// recognized prefixes is not a gRPC protocol error — the caller must
    /// answer with a bare HTTP `415`, never a `grpc-status` trailer (spec
    /// §4.4).
    pub fn classify(content_type: Option<&str>) -> Result<ContentKind> {
        let Some(ct) = content_type else {
            return Ok(ContentKind::Binary);
        };
        if ct.starts_with("application/grpc-web-text") {
            Ok(ContentKind::WebText)
        } else if ct.starts_with("application/grpc-web") {
            Ok(ContentKind::WebBinary)
        } else if ct.starts_with("application/grpc") {
            Ok(ContentKind::Binary)
        } else {
            Err(TransportError::InvalidContentType(ct.to_string()))
        }
    }

    pub fn is_web(self) -> bool {
        matches!(self, ContentKind::WebBinary | ContentKind::WebText)
    }
}

/// Buffers gRPC-Web-Text base64 input across chunk boundaries: each push
/// decodes the largest prefix whose length is a multiple of 4 and retains
/// the (`< 4` byte) remainder for the next chunk (spec §4.4/§4.5).
#[derive(Debug, Default)]
pub struct Base64InboundBuffer {
    tail: Vec<u8>,
}

impl Base64InboundBuffer {
    pub fn new() -> Self {
        Base64InboundBuffer::default()
    }

    /// Decodes as much of `chunk` as forms complete base64 quartets,
    /// combined with any carried-over tail.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.tail.extend_from_slice(chunk);
        let usable_len = self.tail.len() - (self.tail.len() % 4);
        let remainder = self.tail.split_off(usable_len);
        let to_decode = std::mem::replace(&mut self.tail, remainder);
        BASE64
            .decode(&to_decode)
            .map_err(|e| TransportError::Base64DecodeError(e.to_string()))
    }

    /// True if no partial quartet remains buffered.
    pub fn is_empty(&self) -> bool {
        self.tail.is_empty()
    }
}

/// Builds the gRPC-Web trailer-in-body block (spec §6): `0x80`, a
/// big-endian `u32` length, then `name: value\r\n` lines (lowercased
/// names) for `grpc-status`, optional `grpc-message`, and any custom
/// trailer metadata.
pub fn encode_trailer_block(trailers: &Metadata, status: &GrpcStatus) -> Vec<u8> {
    let mut block = String::new();
    block.push_str(&format!("grpc-status: {}\r\n", status.code.as_i32()));
    if let Some(msg) = &status.message {
        block.push_str(&format!("grpc-message: {}\r\n", percent_encode_message(msg)));
    }
    for (name, value) in trailers.iter() {
        block.push_str(&format!("{}: {}\r\n", name.to_ascii_lowercase(), value.as_str_lossy()));
    }

    let body = block.into_bytes();
    let mut out = Vec::with_capacity(5 + body.len());
    out.push(0x80);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    #[test]
    fn classify_defaults_missing_header_to_binary() {
        assert_eq!(ContentKind::classify(None).unwrap(), ContentKind::Binary);
    }

    #[test]
    fn classify_recognizes_web_text_before_web_binary() {
        assert_eq!(
            ContentKind::classify(Some("application/grpc-web-text")).unwrap(),
            ContentKind::WebText
        );
        assert_eq!(
            ContentKind::classify(Some("application/grpc-web")).unwrap(),
            ContentKind::WebBinary
        );
        assert_eq!(
            ContentKind::classify(Some("application/grpc+proto")).unwrap(),
            ContentKind::Binary
        );
    }

    #[test]
    fn classify_rejects_unrelated_content_type() {
        let err = ContentKind::classify(Some("text/plain")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidContentType(_)));
    }

    #[test]
    fn base64_inbound_buffer_holds_partial_quartets() {
        let mut buf = Base64InboundBuffer::new();
        let encoded = BASE64.encode(b"hello world");
        let bytes = encoded.as_bytes();

        let mut decoded = Vec::new();
        decoded.extend(buf.push(&bytes[..5]).unwrap());
        decoded.extend(buf.push(&bytes[5..]).unwrap());
        assert!(buf.is_empty());
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn trailer_block_has_0x80_prefix_and_length() {
        let status = GrpcStatus::new(StatusCode::NotFound, Some("nope".to_string()));
        let block = encode_trailer_block(&Metadata::new(), &status);
        assert_eq!(block[0], 0x80);
        let len = u32::from_be_bytes([block[1], block[2], block[3], block[4]]) as usize;
        assert_eq!(len, block.len() - 5);
        let text = String::from_utf8(block[5..].to_vec()).unwrap();
        assert!(text.contains("grpc-status: 5\r\n"));
        assert!(text.contains("grpc-message: nope\r\n"));
    }
}
