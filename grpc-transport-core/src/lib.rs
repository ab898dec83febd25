//! gRPC-over-HTTP/2 and gRPC-Web transport core.
//!
//! This crate implements the mechanics between framed HTTP/2 (or HTTP/1
//! gRPC-Web) traffic and ordered gRPC call events: a client call state
//! machine, a connection manager with backoff-driven reconnection, the
//! length-prefixed message codec, and the server-side HTTP/1 and
//! gRPC-Web adapters. Message (de)serialization, service dispatch, and the
//! actual socket/`h2::client::Connection` plumbing are external
//! collaborators plugged in by the caller through the traits this crate
//! exposes (`call::Codec`) and the event methods `connection::ConnectionManager`
//! reports through.

pub mod backoff;
pub mod call;
pub mod compression;
pub mod connection;
pub mod error;
pub mod framing;
pub mod metadata;
pub mod server;
pub mod status;

pub use call::{CallConfig, CallType, ClientCall, Codec};
pub use compression::{CompressionAlgorithm, DecompressionLimit, MessageEncoding};
pub use connection::{ConnectionManager, ConnectionManagerConfig, ConnectionState};
pub use error::{Result, TransportError};
pub use framing::{FrameReader, FrameWriter, FramedOutput};
pub use metadata::{Metadata, MetadataValue};
pub use status::{GrpcStatus, StatusCode};
