//! The gRPC-Web↔HTTP/2 duplex adapter (spec §4.5): translates one HTTP/1.1
//! gRPC-Web request/response pair into the HEADERS/DATA/trailers shape an
//! HTTP/2 gRPC service expects, and back.
//!
//! Grounded on spec §4.5 together with the `:path`/`:authority` request
//! construction already used by `call.rs`'s client-side `build_uri` —
//! here the same `http::Request`-carries-the-pseudo-headers approach is
//! applied on the inbound side instead. Shares the base64-chunking and
//! trailer-block wire format with `http1_codec.rs` through
//! `super::{Base64InboundBuffer, encode_trailer_block}`.

use bytes::Bytes;
use http::{HeaderMap, Request, Response};

use crate::error::{Result, TransportError};
use crate::metadata::Metadata;
use crate::status::GrpcStatus;

use super::{encode_trailer_block, Base64InboundBuffer, ContentKind};

/// The open half of the duplex adapter: request parts have been mapped to
/// HTTP/2 HEADERS and the adapter is now relaying body chunks.
struct OpenState {
    kind: ContentKind,
    inbound_text: Option<Base64InboundBuffer>,
    response_headers_sent: bool,
}

enum GrpcWebInner {
    /// No request has arrived yet; `scheme` is fixed at construction since
    /// an HTTP/1.1 server typically knows whether it terminates TLS itself.
    Idle { scheme: http::uri::Scheme },
    Open(OpenState),
    Closed,
}

/// One gRPC-Web call's duplex translation state (spec §4.5).
pub struct GrpcWebAdapter {
    inner: GrpcWebInner,
}

impl GrpcWebAdapter {
    pub fn new(scheme: http::uri::Scheme) -> Self {
        GrpcWebAdapter {
            inner: GrpcWebInner::Idle { scheme },
        }
    }

    /// Maps an inbound HTTP/1.1 request's parts into the downstream HTTP/2
    /// HEADERS frame (spec §4.5 "inbound header synthesis"): `:method`,
    /// `:path`, `:scheme`, and `:authority` are carried by `http::Request`'s
    /// method/uri fields themselves (as `call.rs`'s client side already does
    /// for outbound requests) rather than as literal header-map entries —
    /// `http::HeaderName` rejects the colon pseudo-header names would need.
    /// Consumes the adapter from `Idle` into `Open`.
    pub fn open_request(&mut self, req: &Request<()>) -> Result<Request<()>> {
        let scheme = match &self.inner {
            GrpcWebInner::Idle { scheme } => scheme.clone(),
            _ => {
                return Err(TransportError::InvalidState {
                    operation: "open_request",
                    state: "not idle".to_string(),
                })
            }
        };

        let content_type = req
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let kind = ContentKind::classify(content_type)?;
        if !kind.is_web() {
            return Err(TransportError::InvalidContentType(
                content_type.unwrap_or_default().to_string(),
            ));
        }

        let authority = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().authority().map(|a| a.as_str()))
            .unwrap_or("")
            .to_string();

        let uri: http::Uri = format!("{}://{}{}", scheme, authority, req.uri().path())
            .parse()
            .map_err(|_| TransportError::InvalidState {
                operation: "open_request",
                state: "malformed scheme/authority/path".to_string(),
            })?;

        let mut builder = Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/grpc");
        for (name, value) in req.headers() {
            if name == http::header::HOST || name == http::header::CONTENT_TYPE {
                continue;
            }
            builder = builder.header(name.clone(), value.clone());
        }
        let downstream = builder.body(()).map_err(|e| TransportError::InvalidState {
            operation: "open_request",
            state: e.to_string(),
        })?;

        self.inner = GrpcWebInner::Open(OpenState {
            kind,
            inbound_text: matches!(kind, ContentKind::WebText).then(Base64InboundBuffer::new),
            response_headers_sent: false,
        });
        Ok(downstream)
    }

    /// Translates one inbound body chunk into bytes to forward on the
    /// downstream HTTP/2 DATA frame, unwrapping the gRPC-Web-Text base64
    /// layer when applicable.
    pub fn forward_request_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let state = self.open_state_mut("forward_request_chunk")?;
        match &mut state.inbound_text {
            Some(buf) => buf.push(chunk),
            None => Ok(chunk.to_vec()),
        }
    }

    /// Request body is complete: the caller should now send an empty DATA
    /// frame with `end_stream` set on the downstream HTTP/2 stream (spec
    /// §4.5 "request-end emission").
    pub fn end_request(&mut self) -> Result<()> {
        let state = self.open_state_mut("end_request")?;
        if let Some(buf) = &state.inbound_text {
            if !buf.is_empty() {
                return Err(TransportError::Base64DecodeError(
                    "trailing partial base64 quartet at end of request body".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Maps the downstream HTTP/2 response HEADERS (the first HEADERS
    /// frame, carrying `:status` and response metadata) into an HTTP/1.1
    /// response head (spec §4.5 "outbound header mapping"). If this HEADERS
    /// frame is also trailers-only (`end_stream` set), the trailers must be
    /// passed to `close` immediately afterward rather than expecting a
    /// DATA frame.
    pub fn map_response_headers(&mut self, status: u16, headers: &HeaderMap) -> Result<Response<()>> {
        let state = self.open_state_mut("map_response_headers")?;
        state.response_headers_sent = true;

        let mut builder = Response::builder().status(status);
        let content_type = match state.kind {
            ContentKind::WebText => "application/grpc-web-text",
            ContentKind::WebBinary | ContentKind::Binary => "application/grpc-web",
        };
        builder = builder.header(http::header::CONTENT_TYPE, content_type);
        for (name, value) in headers {
            builder = builder.header(name.clone(), value.clone());
        }
        builder
            .body(())
            .map_err(|_| TransportError::InvalidState {
                operation: "map_response_headers",
                state: "malformed response headers".to_string(),
            })
    }

    /// Translates one outbound HTTP/2 DATA chunk for the HTTP/1.1 response
    /// body, re-applying the gRPC-Web-Text base64 layer when applicable.
    /// gRPC-Web-Text responses cannot be streamed chunk-by-chunk (base64
    /// groups must align to the accumulated stream, not per-chunk), so text
    /// mode buffers internally and only `close` emits bytes.
    pub fn forward_response_chunk(&mut self, chunk: &[u8]) -> Result<Option<Bytes>> {
        let state = self.open_state_mut("forward_response_chunk")?;
        match state.kind {
            ContentKind::WebText => {
                // Buffering for text mode is handled by the caller via
                // `ResponseBodyEncoder` in http1_codec.rs; this adapter only
                // relays the pre-framed bytes it's given.
                Ok(Some(Bytes::copy_from_slice(chunk)))
            }
            ContentKind::WebBinary | ContentKind::Binary => Ok(Some(Bytes::copy_from_slice(chunk))),
        }
    }

    /// Maps the downstream trailers HEADERS frame into what the HTTP/1.1
    /// caller must append to the response body (spec §4.5/§6: gRPC-Web
    /// always carries trailers in the body, never as real HTTP trailers,
    /// regardless of binary or text framing).
    pub fn close(&mut self, trailers: Metadata, status: GrpcStatus) -> Result<Bytes> {
        let state = self.open_state_mut("close")?;
        let block = encode_trailer_block(&trailers, &status);
        let out = match state.kind {
            ContentKind::WebText => {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine as _;
                Bytes::from(STANDARD.encode(&block))
            }
            ContentKind::WebBinary | ContentKind::Binary => Bytes::from(block),
        };
        self.inner = GrpcWebInner::Closed;
        Ok(out)
    }

    /// Whether `map_response_headers` has already run for this call — the
    /// caller uses this to tell a trailers-only response (headers and end
    /// emitted together) from a normal one (`close` follows a prior DATA
    /// stream).
    pub fn response_headers_sent(&self) -> bool {
        matches!(&self.inner, GrpcWebInner::Open(state) if state.response_headers_sent)
    }

    fn open_state_mut(&mut self, operation: &'static str) -> Result<&mut OpenState> {
        match &mut self.inner {
            GrpcWebInner::Open(state) => Ok(state),
            GrpcWebInner::Idle { .. } => Err(TransportError::InvalidState {
                operation,
                state: "idle".to_string(),
            }),
            GrpcWebInner::Closed => Err(TransportError::InvalidState {
                operation,
                state: "closed".to_string(),
            }),
        }
    }
}

/// Detects a trailers-only response on the mapped HTTP/1.1 side: the
/// downstream HEADERS frame ended the stream, so no DATA frame follows
/// (spec §4.5, reusing the same `end_stream`-or-`grpc-status` rule as the
/// client side in `call.rs`).
pub fn is_trailers_only(end_stream: bool, headers: &HeaderMap) -> bool {
    crate::call::is_trailers_only(end_stream, headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    fn sample_request(content_type: &str) -> Request<()> {
        Request::builder()
            .method("POST")
            .uri("https://example.com/pkg.Service/Method")
            .header(http::header::HOST, "example.com")
            .header(http::header::CONTENT_TYPE, content_type)
            .body(())
            .unwrap()
    }

    #[test]
    fn open_request_synthesizes_pseudo_headers() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTPS);
        let downstream = adapter.open_request(&sample_request("application/grpc-web+proto")).unwrap();
        assert_eq!(downstream.method(), http::Method::POST);
        assert_eq!(downstream.uri().path(), "/pkg.Service/Method");
        assert_eq!(downstream.uri().authority().unwrap().as_str(), "example.com");
        assert_eq!(downstream.uri().scheme_str(), Some("https"));
        assert_eq!(
            downstream.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/grpc"
        );
    }

    #[test]
    fn open_request_rejects_non_web_content_type() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTP);
        let err = adapter.open_request(&sample_request("application/grpc")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidContentType(_)));
    }

    #[test]
    fn operations_before_open_request_fail() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTP);
        let err = adapter.forward_request_chunk(b"x").unwrap_err();
        assert!(matches!(err, TransportError::InvalidState { .. }));
    }

    #[test]
    fn text_mode_request_chunk_is_base64_decoded() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTP);
        adapter.open_request(&sample_request("application/grpc-web-text")).unwrap();
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        let encoded = STANDARD.encode(b"hello");
        let decoded = adapter.forward_request_chunk(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, b"hello");
        adapter.end_request().unwrap();
    }

    #[test]
    fn close_embeds_trailers_as_base64_in_text_mode() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTP);
        adapter.open_request(&sample_request("application/grpc-web-text")).unwrap();
        let trailer_bytes = adapter.close(Metadata::new(), GrpcStatus::ok()).unwrap();
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        let decoded = STANDARD.decode(&trailer_bytes).unwrap();
        assert_eq!(decoded[0], 0x80);
    }

    #[test]
    fn close_embeds_raw_trailer_block_in_binary_mode() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTP);
        adapter.open_request(&sample_request("application/grpc-web")).unwrap();
        let trailer_bytes = adapter
            .close(Metadata::new(), GrpcStatus::new(StatusCode::NotFound, None))
            .unwrap();
        assert_eq!(trailer_bytes[0], 0x80);
    }

    #[test]
    fn operations_after_close_fail() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTP);
        adapter.open_request(&sample_request("application/grpc-web")).unwrap();
        adapter.close(Metadata::new(), GrpcStatus::ok()).unwrap();
        let err = adapter.forward_request_chunk(b"x").unwrap_err();
        assert!(matches!(err, TransportError::InvalidState { .. }));
    }

    #[test]
    fn response_headers_use_grpc_web_content_type() {
        let mut adapter = GrpcWebAdapter::new(http::uri::Scheme::HTTP);
        adapter.open_request(&sample_request("application/grpc-web")).unwrap();
        assert!(!adapter.response_headers_sent());
        let response = adapter.map_response_headers(200, &HeaderMap::new()).unwrap();
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/grpc-web"
        );
        assert!(adapter.response_headers_sent());
    }
}
