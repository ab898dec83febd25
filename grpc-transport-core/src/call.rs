//! The client RPC state machine (spec §4.1): one instance per call.
//!
//! Grounded on the header/trailer assembly shape of
//! `other_examples/cbafeb08_hyperium-tonic__tonic-src-client-grpc.rs.rs`
//! (trailers-only detection, `:status`/`content-type` validation) and on
//! `grpcurl-core/src/codec.rs`'s `Codec` trait seam where message
//! (de)serialization — an explicit external collaborator per spec §1 —
//! plugs in.

use std::time::Duration;

use http::{HeaderMap, Method, Request, StatusCode as HttpStatusCode, Uri};

use crate::compression::{CompressionAlgorithm, DecompressionLimit, MessageEncoding};
use crate::error::{Result, TransportError};
use crate::framing::{FrameReader, FrameWriter, FramedOutput};
use crate::metadata::{percent_decode_message, percent_encode_message, Metadata};
use crate::status::{GrpcStatus, StatusCode};

/// How many messages may cross one direction of a call (spec §3 `Arity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    One,
    Many,
}

/// The four gRPC call shapes (spec §3 `CallType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidirectionalStreaming,
}

impl CallType {
    pub fn request_arity(self) -> Arity {
        match self {
            CallType::Unary | CallType::ServerStreaming => Arity::One,
            CallType::ClientStreaming | CallType::BidirectionalStreaming => Arity::Many,
        }
    }

    pub fn response_arity(self) -> Arity {
        match self {
            CallType::Unary | CallType::ClientStreaming => Arity::One,
            CallType::ServerStreaming | CallType::BidirectionalStreaming => Arity::Many,
        }
    }
}

/// A pluggable message (de)serializer (spec §1: serialization is an
/// external collaborator). Mirrors `grpcurl-core/src/codec.rs`'s
/// `Encoder`/`Decoder` split, collapsed into one trait since this crate
/// doesn't need tonic's buffer-settings seam.
pub trait Codec {
    type Encode;
    type Decode;

    fn encode(&mut self, item: &Self::Encode) -> Result<Vec<u8>>;
    fn decode(&mut self, bytes: &[u8]) -> Result<Self::Decode>;
}

/// Static per-call configuration, built once by the caller before the call
/// starts (spec §6 wire protocol fields).
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub call_type: CallType,
    /// `/<package>.<service>/<method>`.
    pub path: String,
    pub authority: Option<String>,
    pub scheme: &'static str,
    /// If true, use `:method: GET` (cacheable unary calls); else POST.
    pub cacheable: bool,
    pub timeout: Option<Duration>,
    pub user_agent: String,
    /// `+proto`, `+json`, etc. appended to `application/grpc`; `None` for
    /// the bare `application/grpc` content type.
    pub content_subtype: Option<String>,
    pub outbound_encoding: Option<CompressionAlgorithm>,
    /// Algorithms this client is able to decompress, advertised as
    /// `grpc-accept-encoding` and used to validate the server's chosen
    /// `grpc-encoding`.
    pub supported_decoders: Vec<CompressionAlgorithm>,
    pub decompression_limit: DecompressionLimit,
    pub custom_metadata: Metadata,
}

impl CallConfig {
    fn content_type(&self) -> String {
        match &self.content_subtype {
            Some(sub) => format!("application/grpc+{sub}"),
            None => "application/grpc".to_string(),
        }
    }

    fn accept_encoding_header(&self) -> String {
        let mut encoding = MessageEncoding {
            accept_encoding: self.supported_decoders.clone(),
            ..Default::default()
        };
        if encoding.accept_encoding.is_empty() {
            encoding.accept_encoding.push(CompressionAlgorithm::Identity);
        }
        encoding.accept_encoding_header()
    }
}

/// Encodes a timeout as a `grpc-timeout` header value: a positive integer
/// followed by a unit in `{H,M,S,m,u,n}` (spec §6), choosing the coarsest
/// unit that still fits in 8 digits, rounding up so the deadline is never
/// undershot.
pub fn encode_grpc_timeout(timeout: Duration) -> String {
    const UNITS: &[(char, u128)] = &[
        ('H', 3_600_000_000_000),
        ('M', 60_000_000_000),
        ('S', 1_000_000_000),
        ('m', 1_000_000),
        ('u', 1_000),
        ('n', 1),
    ];
    let nanos = timeout.as_nanos().max(1);
    for &(unit, unit_nanos) in UNITS {
        let value = nanos.div_ceil(unit_nanos);
        if value <= 99_999_999 {
            return format!("{value}{unit}");
        }
    }
    format!("{nanos}n")
}

/// Parses a `grpc-timeout` header value back into a `Duration`.
pub fn decode_grpc_timeout(value: &str) -> Option<Duration> {
    let (digits, unit) = value.split_at(value.len().checked_sub(1)?);
    let amount: u64 = digits.parse().ok()?;
    let unit_nanos: u64 = match unit {
        "H" => 3_600_000_000_000,
        "M" => 60_000_000_000,
        "S" => 1_000_000_000,
        "m" => 1_000_000,
        "u" => 1_000,
        "n" => 1,
        _ => return None,
    };
    Some(Duration::from_nanos(amount.checked_mul(unit_nanos)?))
}

#[derive(Debug)]
struct WriteState {
    arity: Arity,
    sent: usize,
}

impl WriteState {
    fn new(arity: Arity) -> Self {
        WriteState { arity, sent: 0 }
    }
}

#[derive(Debug)]
struct ReadState {
    arity: Arity,
    reader: FrameReader,
    received: usize,
}

/// The client state machine's sole state (spec §3 `RpcCallState`).
#[derive(Debug)]
enum RpcCallState {
    ClientIdleServerIdle { read_arity: Arity },
    ClientActiveServerIdle { write: WriteState, read_arity: Arity },
    ClientClosedServerIdle { read_arity: Arity },
    ClientActiveServerActive { write: WriteState, read: ReadState },
    ClientClosedServerActive { read: ReadState },
    ClientClosedServerClosed,
}

impl RpcCallState {
    fn label(&self) -> &'static str {
        match self {
            RpcCallState::ClientIdleServerIdle { .. } => "ClientIdleServerIdle",
            RpcCallState::ClientActiveServerIdle { .. } => "ClientActiveServerIdle",
            RpcCallState::ClientClosedServerIdle { .. } => "ClientClosedServerIdle",
            RpcCallState::ClientActiveServerActive { .. } => "ClientActiveServerActive",
            RpcCallState::ClientClosedServerActive { .. } => "ClientClosedServerActive",
            RpcCallState::ClientClosedServerClosed => "ClientClosedServerClosed",
        }
    }
}

fn invalid_state(operation: &'static str, state: &RpcCallState) -> TransportError {
    TransportError::InvalidState {
        operation,
        state: state.label().to_string(),
    }
}

/// Extracts non-pseudo-header metadata from an `http::HeaderMap`, skipping
/// the reserved `grpc-status`/`grpc-message`/`grpc-encoding` keys the state
/// machine already special-cases.
fn metadata_from_header_map(headers: &HeaderMap) -> Metadata {
    let mut metadata = Metadata::new();
    for (name, value) in headers.iter() {
        let name = name.as_str();
        if matches!(name, "grpc-status" | "grpc-message" | "grpc-encoding" | "content-type") {
            continue;
        }
        if name.ends_with("-bin") {
            metadata.append_binary(name, value.as_bytes().to_vec());
        } else {
            metadata.append_ascii(name, value.as_bytes().to_vec());
        }
    }
    metadata
}

fn parse_grpc_status_from_headers(headers: &HeaderMap) -> GrpcStatus {
    let code = headers
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i32>().ok())
        .map(StatusCode::from_i32)
        .unwrap_or(StatusCode::Unknown);
    let message = headers
        .get("grpc-message")
        .and_then(|v| v.to_str().ok())
        .map(percent_decode_message);
    GrpcStatus::new(code, message).with_trailers(metadata_from_header_map(headers))
}

fn content_type_is_grpc(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/grpc"))
        .unwrap_or(false)
}

/// Recognizes a trailers-only response: either `end_stream` on the HEADERS
/// frame, or `grpc-status` present in the same field block (spec §4.1).
pub fn is_trailers_only(end_stream: bool, headers: &HeaderMap) -> bool {
    end_stream || headers.contains_key("grpc-status")
}

/// One client call's state machine (spec §4.1), generic over the pluggable
/// message codec.
pub struct ClientCall<C: Codec> {
    state: RpcCallState,
    config: CallConfig,
    codec: C,
    writer: FrameWriter,
}

impl<C: Codec> ClientCall<C> {
    pub fn new(config: CallConfig, codec: C) -> Self {
        let writer = FrameWriter::new(config.outbound_encoding);
        let read_arity = config.call_type.response_arity();
        ClientCall {
            state: RpcCallState::ClientIdleServerIdle { read_arity },
            config,
            codec,
            writer,
        }
    }

    fn build_uri(&self) -> Result<Uri> {
        let authority = self.config.authority.clone().unwrap_or_default();
        format!("{}://{}{}", self.config.scheme, authority, self.config.path)
            .parse()
            .map_err(|_| TransportError::InvalidState {
                operation: "send_request_headers",
                state: "malformed authority/path".to_string(),
            })
    }

    /// spec §4.1 `send_request_headers`.
    pub fn send_request_headers(&mut self) -> Result<Request<()>> {
        match &self.state {
            RpcCallState::ClientIdleServerIdle { .. } => {}
            other => return Err(invalid_state("send_request_headers", other)),
        }

        let method = if self.config.cacheable { Method::GET } else { Method::POST };
        let mut builder = Request::builder()
            .method(method)
            .uri(self.build_uri()?)
            .header(http::header::CONTENT_TYPE, self.config.content_type())
            .header("te", "trailers")
            .header(http::header::USER_AGENT, self.config.user_agent.clone())
            .header("grpc-accept-encoding", self.config.accept_encoding_header());

        if let Some(algo) = self.config.outbound_encoding {
            builder = builder.header("grpc-encoding", algo.wire_name());
        }
        if let Some(timeout) = self.config.timeout {
            builder = builder.header("grpc-timeout", encode_grpc_timeout(timeout));
        }
        for (name, value) in self.config.custom_metadata.iter() {
            builder = builder.header(name, value.as_bytes());
        }

        let request = builder.body(()).map_err(|e| TransportError::InvalidState {
            operation: "send_request_headers",
            state: e.to_string(),
        })?;

        let read_arity = match &self.state {
            RpcCallState::ClientIdleServerIdle { read_arity } => *read_arity,
            _ => unreachable!(),
        };
        self.state = RpcCallState::ClientActiveServerIdle {
            write: WriteState::new(self.config.call_type.request_arity()),
            read_arity,
        };
        Ok(request)
    }

    /// spec §4.1 `send_request`.
    pub fn send_request(&mut self, msg: &C::Encode, compressed: bool) -> Result<FramedOutput> {
        let write = match &mut self.state {
            RpcCallState::ClientActiveServerIdle { write, .. } => write,
            RpcCallState::ClientActiveServerActive { write, .. } => write,
            RpcCallState::ClientClosedServerIdle { .. }
            | RpcCallState::ClientClosedServerActive { .. }
            | RpcCallState::ClientClosedServerClosed => {
                return Err(TransportError::CardinalityViolation)
            }
            other @ RpcCallState::ClientIdleServerIdle { .. } => {
                return Err(invalid_state("send_request", other))
            }
        };

        if write.arity == Arity::One && write.sent >= 1 {
            return Err(TransportError::CardinalityViolation);
        }

        let bytes = self
            .codec
            .encode(msg)
            .map_err(|_| TransportError::SerializationFailed("codec encode failed".to_string()))?;
        let framed = self.writer.encode(&bytes, compressed)?;
        write.sent += 1;
        Ok(framed)
    }

    /// spec §4.1 `send_end_of_request_stream`.
    pub fn send_end_of_request_stream(&mut self) -> Result<()> {
        self.state = match std::mem::replace(&mut self.state, RpcCallState::ClientClosedServerClosed) {
            RpcCallState::ClientActiveServerIdle { read_arity, .. } => {
                RpcCallState::ClientClosedServerIdle { read_arity }
            }
            RpcCallState::ClientActiveServerActive { read, .. } => {
                RpcCallState::ClientClosedServerActive { read }
            }
            other @ (RpcCallState::ClientClosedServerIdle { .. }
            | RpcCallState::ClientClosedServerActive { .. }
            | RpcCallState::ClientClosedServerClosed) => {
                let err = Err(TransportError::AlreadyClosed);
                self.state = other;
                return err;
            }
            other @ RpcCallState::ClientIdleServerIdle { .. } => {
                let err = Err(invalid_state("send_end_of_request_stream", &other));
                self.state = other;
                return err;
            }
        };
        Ok(())
    }

    /// spec §4.1 `receive_response_headers`. Callers must first check
    /// `is_trailers_only` and route to `receive_end_of_response_stream`
    /// instead when it returns true.
    pub fn receive_response_headers(
        &mut self,
        status: HttpStatusCode,
        headers: &HeaderMap,
    ) -> Result<Metadata> {
        let read_arity = match &self.state {
            RpcCallState::ClientActiveServerIdle { read_arity, .. }
            | RpcCallState::ClientClosedServerIdle { read_arity } => *read_arity,
            other => return Err(invalid_state("receive_response_headers", other)),
        };

        if status != HttpStatusCode::OK {
            return Err(TransportError::InvalidHttpStatus(status.as_u16()));
        }
        if !content_type_is_grpc(headers) {
            let ct = headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(TransportError::InvalidContentType(ct));
        }

        let decoder = match headers.get("grpc-encoding").and_then(|v| v.to_str().ok()) {
            Some(name) => {
                let algo = CompressionAlgorithm::from_wire_name(name)
                    .filter(|a| self.config.supported_decoders.contains(a) || *a == CompressionAlgorithm::Identity)
                    .ok_or_else(|| TransportError::UnsupportedMessageEncoding(name.to_string()))?;
                if algo == CompressionAlgorithm::Identity {
                    None
                } else {
                    Some(algo)
                }
            }
            None => None,
        };

        let metadata = metadata_from_header_map(headers);
        let reader = FrameReader::new(decoder, self.config.decompression_limit);
        let read = ReadState {
            arity: read_arity,
            reader,
            received: 0,
        };

        self.state = match std::mem::replace(&mut self.state, RpcCallState::ClientClosedServerClosed) {
            RpcCallState::ClientActiveServerIdle { write, .. } => {
                RpcCallState::ClientActiveServerActive { write, read }
            }
            RpcCallState::ClientClosedServerIdle { .. } => {
                RpcCallState::ClientClosedServerActive { read }
            }
            _ => unreachable!("checked above"),
        };

        Ok(metadata)
    }

    /// spec §4.1 `receive_response_buffer`.
    pub fn receive_response_buffer(&mut self, bytes: &[u8]) -> Result<Vec<C::Decode>> {
        let read = match &mut self.state {
            RpcCallState::ClientActiveServerActive { read, .. } => read,
            RpcCallState::ClientClosedServerActive { read } => read,
            other => return Err(invalid_state("receive_response_buffer", other)),
        };

        read.reader.append(bytes);
        let raw_messages = read.reader.drain_messages()?;

        let mut out = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            if read.arity == Arity::One && read.received >= 1 {
                return Err(TransportError::CardinalityViolation);
            }
            let decoded = self
                .codec
                .decode(&raw)
                .map_err(|_| TransportError::DeserializationFailed("codec decode failed".to_string()))?;
            read.received += 1;
            out.push(decoded);
        }
        Ok(out)
    }

    /// spec §4.1 `receive_end_of_response_stream`. `trailers_only` must be
    /// computed by the caller via `is_trailers_only` before the HEADERS
    /// frame is otherwise dispatched to `receive_response_headers`.
    pub fn receive_end_of_response_stream(
        &mut self,
        status: HttpStatusCode,
        headers: &HeaderMap,
        trailers_only: bool,
    ) -> Result<GrpcStatus> {
        if trailers_only {
            match &self.state {
                RpcCallState::ClientActiveServerIdle { .. }
                | RpcCallState::ClientClosedServerIdle { .. } => {}
                other => return Err(invalid_state("receive_end_of_response_stream", other)),
            }
        } else {
            match &self.state {
                RpcCallState::ClientActiveServerActive { .. }
                | RpcCallState::ClientClosedServerActive { .. } => {}
                other => return Err(invalid_state("receive_end_of_response_stream", other)),
            }
        }

        let result = if trailers_only {
            if status != HttpStatusCode::OK {
                let grpc_status = parse_grpc_status_from_headers(headers);
                if headers.contains_key("grpc-status") {
                    Err(TransportError::InvalidHttpStatusWithGrpcStatus(status.as_u16(), grpc_status))
                } else {
                    Err(TransportError::InvalidHttpStatus(status.as_u16()))
                }
            } else if !content_type_is_grpc(headers) {
                let ct = headers
                    .get(http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                Err(TransportError::InvalidContentType(ct))
            } else {
                Ok(parse_grpc_status_from_headers(headers))
            }
        } else {
            match &self.state {
                RpcCallState::ClientActiveServerActive { read, .. }
                | RpcCallState::ClientClosedServerActive { read } if !read.reader.is_idle() => {
                    Err(TransportError::LeftOverBytes(read.reader.buffered_len()))
                }
                _ => Ok(parse_grpc_status_from_headers(headers)),
            }
        };

        self.state = RpcCallState::ClientClosedServerClosed;
        result
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RpcCallState::ClientClosedServerClosed)
    }
}

/// Encodes a `grpc-message` value for the wire (percent-escaped).
pub fn encode_grpc_message(message: &str) -> String {
    percent_encode_message(message)
}
