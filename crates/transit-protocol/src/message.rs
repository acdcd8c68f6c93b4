//! Wire message model.
//!
//! A [`Message`] is the unit of exchange between a [`Writer`](crate) and a
//! [`Reader`](crate): an id, a [`MessageKind`], a channel name, and an
//! ordered list of [`Payload`]s. The model carries no transport- or
//! session-specific state -- that lives in the connection layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-direction, monotonically increasing message identifier.
///
/// IDs are assigned by the sending side's `Writer` and are never reused
/// within the lifetime of one logical session, including a resumed one.
pub type MessageId = u32;

/// Discriminates the purpose of a [`Message`].
///
/// Only `System`, `Event`, `Binary`, `Request`, and `Response` are
/// produced or consumed by this implementation. `Stream` is reserved by
/// the wire format (it must encode/decode losslessly) but nothing in this
/// crate constructs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    System = 0,
    Event = 1,
    Binary = 2,
    Request = 3,
    Response = 4,
    /// Reserved for future multiplexed-stream support. Never constructed
    /// by this implementation; preserved only so the wire format can
    /// round-trip values produced by other implementations.
    Stream = 5,
}

impl MessageKind {
    /// Converts a raw wire byte to a `MessageKind`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::System),
            1 => Some(Self::Event),
            2 => Some(Self::Binary),
            3 => Some(Self::Request),
            4 => Some(Self::Response),
            5 => Some(Self::Stream),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single tagged payload carried by a [`Message`].
///
/// The wire format's payload envelope (`type`, `size`, `data`) is a tagged
/// union over exactly these two shapes -- never a third, and never `any`
/// at the Rust level.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A JSON value, encoded on the wire as a one-byte format marker
    /// followed by its UTF-8 text serialization.
    Json(serde_json::Value),
    /// An opaque byte buffer, stored verbatim on the wire.
    Binary(bytes::Bytes),
}

impl Payload {
    /// Wire tag for a `Json` payload.
    pub const TAG_JSON: u8 = 0;
    /// Wire tag for a `Binary` payload.
    pub const TAG_BINARY: u8 = 1;

    /// Convenience constructor for a JSON payload from any `Serialize` value.
    pub fn json(value: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&bytes::Bytes> {
        match self {
            Self::Binary(b) => Some(b),
            Self::Json(_) => None,
        }
    }
}

/// A fully-decoded wire message.
///
/// See the crate-level docs for the encode/decode contract
/// ([`crate::codec`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub channel: String,
    pub payloads: Vec<Payload>,
}

impl Message {
    pub fn new(id: MessageId, kind: MessageKind, channel: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            channel: channel.into(),
            payloads: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payloads.push(payload);
        self
    }

    pub fn is_system(&self) -> bool {
        matches!(self.kind, MessageKind::System)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::Event => "event",
            Self::Binary => "binary",
            Self::Request => "request",
            Self::Response => "response",
            Self::Stream => "stream",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Request / Response envelope
// ---------------------------------------------------------------------------

/// The JSON object carried as the sole payload of a `Response` message.
///
/// Exactly one of `value` / `error` is meaningful, selected by `success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: MessageId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(request_id: MessageId, value: serde_json::Value) -> Self {
        Self {
            request_id,
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn err(request_id: MessageId, error: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }
}

/// Well-known system channel names.
pub mod system_channel {
    /// The only implemented system channel: payload is the acknowledged
    /// message's id as a JSON integer.
    pub const ACK: &str = "ack";
}
