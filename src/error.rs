//! Error taxonomy for the messaging framework.
//!
//! Mirrors the shape used for WS session and database errors in
//! `services/receiver` (`session.rs::SessionError`, `db.rs::DbError`):
//! one `thiserror` enum per
//! concern, `#[from]` conversions where a lower layer's error is always a
//! variant of the higher layer's, human `#[error(...)]` messages.

use thiserror::Error;
use transit_protocol::{DecodeError, EncodeError};

/// Errors surfaced by the Reader while parsing an inbound byte stream.
///
/// Both variants are fatal to the connection: a decode failure closes
/// the transport rather than trying to resynchronize.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("invalid framing: {0}")]
    InvalidFraming(#[from] FramingError),
    #[error("decode error: {0}")]
    Decode(DecodeErrorKind),
}

/// Specifically the "missing/wrong start marker" failure, broken out so
/// callers can match on it without reaching into `DecodeError`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("missing or invalid start marker")]
pub struct FramingError;

/// A decode failure that is not a framing failure (bad UTF-8, unknown
/// message kind, unsupported JSON format marker, malformed JSON, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeErrorKind(pub DecodeError);

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DecodeError> for ReaderError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::InvalidFraming => ReaderError::InvalidFraming(FramingError),
            other => ReaderError::Decode(DecodeErrorKind(other)),
        }
    }
}

/// Errors surfaced by the transport-agnostic layer (Writer/Controller).
#[derive(Debug, Error, Clone)]
pub enum NetworkError {
    /// An ack or operation deadline elapsed before the counterpart
    /// responded.
    #[error("operation timed out")]
    Timeout(#[from] NetworkTimeoutError),
    /// A request handler on the remote side reported a
    /// [`RequestError`](crate::emitter::RequestError), or an unhandled
    /// exception was mapped to the generic remote-error message.
    #[error("remote error: {0}")]
    Remote(String),
    /// The connection that owned this completion was closed
    /// (`Writer::set_connection_closed`) before it settled.
    #[error("connection closed before the message was acknowledged")]
    ConnectionClosed,
    /// The transport layer itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Encoding the outgoing message failed (e.g. payload too large).
    #[error("failed to encode outgoing message: {0}")]
    Encode(#[from] EncodeError),
    /// A local framing/decode failure while parsing the inbound byte
    /// stream (the `Reader`'s own failure, not a complaint from the
    /// remote side -- see [`NetworkError::Remote`]).
    #[error("failed to decode inbound message: {0}")]
    Decode(#[from] ReaderError),
}

/// An ack or operation deadline elapsed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("network timeout elapsed")]
pub struct NetworkTimeoutError;

/// Errors raised by a transport adapter (see `transport` module).
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to write to transport: {0}")]
    Write(String),
    #[error("failed to start server transport: {0}")]
    Start(String),
}

/// A request handler error meant to be forwarded verbatim to the
/// requester. Any other error returned by a handler is mapped by the
/// controller to a generic remote-error message instead of being
/// forwarded.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct RequestError(pub String);

impl RequestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
