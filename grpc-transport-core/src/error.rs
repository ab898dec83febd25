//! Transport-level errors (spec §7).
//!
//! Follows `grpcurl-core/src/error.rs`'s `GrpcurlError` texture: a plain
//! enum with hand-written `Display`/`std::error::Error`/`From` impls
//! rather than a `thiserror` derive.

use std::fmt;

use crate::status::{GrpcStatus, StatusCode};

/// The closed set of transport error kinds (spec §7).
#[derive(Debug)]
pub enum TransportError {
    // Protocol violations
    InvalidContentType(String),
    InvalidHttpStatus(u16),
    InvalidHttpStatusWithGrpcStatus(u16, GrpcStatus),
    UnsupportedMessageEncoding(String),
    UnexpectedCompression,
    Base64DecodeError(String),
    InvalidState { operation: &'static str, state: String },

    // Call-level
    CardinalityViolation,
    AlreadyClosed,
    SerializationFailed(String),
    DeserializationFailed(String),
    LeftOverBytes(usize),
    DecompressionLimitExceeded { limit: usize, actual: usize },
    RpcTimedOut,
    CancelledByClient,

    // Connection-level
    ConnectTimeout,
    UnexpectedConnectionDrop,
    AlreadyComplete,
    /// A channel-level waiter's reason for failing, carrying whatever
    /// `GrpcStatus` the connection manager last observed (a TLS handshake
    /// failure, a `channel_error` report, ...) rather than a fixed kind.
    ConnectionFailed(GrpcStatus),

    /// An underlying I/O error.
    Io(std::io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidContentType(ct) => write!(f, "invalid content-type: {ct}"),
            TransportError::InvalidHttpStatus(code) => write!(f, "invalid HTTP status: {code}"),
            TransportError::InvalidHttpStatusWithGrpcStatus(code, status) => {
                write!(f, "HTTP status {code} accompanied by gRPC status {status}")
            }
            TransportError::UnsupportedMessageEncoding(enc) => {
                write!(f, "unsupported message encoding: {enc}")
            }
            TransportError::UnexpectedCompression => {
                write!(f, "compressed flag set but no decompressor is configured")
            }
            TransportError::Base64DecodeError(msg) => write!(f, "base64 decode error: {msg}"),
            TransportError::InvalidState { operation, state } => {
                write!(f, "{operation} is invalid in state {state}")
            }
            TransportError::CardinalityViolation => {
                write!(f, "more messages were sent or received than the call's arity allows")
            }
            TransportError::AlreadyClosed => write!(f, "stream half is already closed"),
            TransportError::SerializationFailed(msg) => write!(f, "serialization failed: {msg}"),
            TransportError::DeserializationFailed(msg) => {
                write!(f, "deserialization failed: {msg}")
            }
            TransportError::LeftOverBytes(n) => {
                write!(f, "{n} leftover bytes after the final framed message")
            }
            TransportError::DecompressionLimitExceeded { limit, actual } => write!(
                f,
                "decompressed message size {actual} exceeds limit {limit}"
            ),
            TransportError::RpcTimedOut => write!(f, "RPC timed out"),
            TransportError::CancelledByClient => write!(f, "cancelled by client"),
            TransportError::ConnectTimeout => write!(f, "connect attempt timed out"),
            TransportError::UnexpectedConnectionDrop => {
                write!(f, "connection dropped without a prior status")
            }
            TransportError::AlreadyComplete => write!(f, "operation already completed"),
            TransportError::ConnectionFailed(status) => write!(f, "connection failed: {status}"),
            TransportError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err)
    }
}

impl TransportError {
    /// Maps a raw error kind to the `GrpcStatus` the application observes,
    /// per the table in spec §7.
    pub fn to_status(&self) -> GrpcStatus {
        let code = match self {
            TransportError::InvalidContentType(_) => StatusCode::Internal,
            TransportError::InvalidHttpStatus(_) => StatusCode::Internal,
            TransportError::InvalidHttpStatusWithGrpcStatus(_, status) => {
                return status.clone();
            }
            TransportError::UnsupportedMessageEncoding(_) => StatusCode::Unimplemented,
            TransportError::UnexpectedCompression => StatusCode::Internal,
            TransportError::Base64DecodeError(_) => StatusCode::Internal,
            TransportError::InvalidState { .. } => StatusCode::Internal,
            TransportError::CardinalityViolation => StatusCode::Internal,
            TransportError::AlreadyClosed => StatusCode::Internal,
            TransportError::SerializationFailed(_) => StatusCode::Internal,
            TransportError::DeserializationFailed(_) => StatusCode::Internal,
            TransportError::LeftOverBytes(_) => StatusCode::Internal,
            TransportError::DecompressionLimitExceeded { .. } => StatusCode::ResourceExhausted,
            TransportError::RpcTimedOut => StatusCode::DeadlineExceeded,
            TransportError::CancelledByClient => StatusCode::Cancelled,
            TransportError::ConnectTimeout => StatusCode::Unavailable,
            TransportError::UnexpectedConnectionDrop => StatusCode::Unavailable,
            TransportError::AlreadyComplete => StatusCode::Internal,
            TransportError::ConnectionFailed(status) => return status.clone(),
            TransportError::Io(_) => StatusCode::Unavailable,
        };
        GrpcStatus::new(code, Some(self.to_string()))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransportError>;
