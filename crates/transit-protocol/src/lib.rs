//! transit-protocol: wire message types and binary codec for the `transit`
//! messaging framework.
//!
//! This crate knows nothing about transports, reconnection, or timeouts --
//! it is the frozen data model and codec the rest of the framework builds
//! on, the way `rt-protocol` is to the forwarder/server/receiver services
//! it serializes messages for.

pub mod codec;
pub mod message;

pub use codec::{
    decode, decode_payload, encode, DecodeError, EncodeError, JSON_FORMAT_MARKER,
    MAX_PAYLOAD_SIZE, START_MARKER,
};
pub use message::{system_channel, Message, MessageId, MessageKind, Payload, ResponseEnvelope};
