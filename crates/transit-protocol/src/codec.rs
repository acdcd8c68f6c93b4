//! Binary wire codec.
//!
//! ```text
//! 0xDD 0xF0                      // 2-byte start marker
//! id : uint32 big-endian         // 4 bytes
//! type : uint8                   // 1 byte
//! channel_len : uint8            // 1 byte
//! channel : UTF-8 bytes          // channel_len bytes
//! payload_count : uint8          // 1 byte
//! payloads : payload_count x {
//!     type : uint8
//!     size : uint24 big-endian   // 3 bytes
//!     data : size bytes
//! }
//! ```
//!
//! `encode` never fails on a well-formed [`Message`] other than payload
//! sizes exceeding [`MAX_PAYLOAD_SIZE`]. `decode` is total over any byte
//! slice: malformed input produces a [`DecodeError`], never a panic.

use crate::message::{Message, MessageKind, Payload};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// The two bytes every message starts with.
pub const START_MARKER: [u8; 2] = [0xDD, 0xF0];

/// JSON payloads are tagged with this format marker. It is the only
/// format marker this implementation defines or accepts.
pub const JSON_FORMAT_MARKER: u8 = 0x00;

/// Largest payload `size` field representable by the 24-bit wire length.
pub const MAX_PAYLOAD_SIZE: usize = (1 << 24) - 1;

/// Errors raised while decoding a byte buffer known to be one complete
/// message (framing has already been established by the [`Reader`](crate)).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing or invalid start marker")]
    InvalidFraming,
    #[error("channel is not valid UTF-8")]
    InvalidChannelUtf8,
    #[error("unknown message type byte {0}")]
    UnknownMessageKind(u8),
    #[error("unknown payload tag byte {0}")]
    UnknownPayloadTag(u8),
    #[error("unknown JSON payload format marker {0:#x}")]
    UnknownFormatMarker(u8),
    #[error("payload JSON is not valid UTF-8")]
    InvalidPayloadUtf8,
    #[error("payload JSON failed to parse: {0}")]
    InvalidJson(String),
    #[error("buffer is shorter than the length the header declares")]
    Truncated,
}

/// Errors raised while encoding a [`Message`] to its wire representation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("channel is {0} bytes, which exceeds the 255-byte limit")]
    ChannelTooLong(usize),
    #[error("message has {0} payloads, which exceeds the 255 limit")]
    TooManyPayloads(usize),
    #[error("payload is {0} bytes, which exceeds the {MAX_PAYLOAD_SIZE}-byte limit")]
    PayloadTooLarge(usize),
    #[error("JSON payload failed to serialize: {0}")]
    JsonSerialize(String),
}

/// Encodes `message` to its on-wire byte representation.
pub fn encode(message: &Message) -> Result<Bytes, EncodeError> {
    let channel_bytes = message.channel.as_bytes();
    if channel_bytes.len() > u8::MAX as usize {
        return Err(EncodeError::ChannelTooLong(channel_bytes.len()));
    }
    if message.payloads.len() > u8::MAX as usize {
        return Err(EncodeError::TooManyPayloads(message.payloads.len()));
    }

    // Pre-encode payload bodies so we can validate sizes before writing
    // anything, keeping `encode` atomic (no half-written buffer on error).
    let mut encoded_payloads = Vec::with_capacity(message.payloads.len());
    for payload in &message.payloads {
        let (tag, body) = match payload {
            Payload::Binary(bytes) => (Payload::TAG_BINARY, bytes.clone()),
            Payload::Json(value) => {
                let text = serde_json::to_vec(value)
                    .map_err(|e| EncodeError::JsonSerialize(e.to_string()))?;
                let mut body = BytesMut::with_capacity(1 + text.len());
                body.put_u8(JSON_FORMAT_MARKER);
                body.put_slice(&text);
                (Payload::TAG_JSON, body.freeze())
            }
        };
        if body.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::PayloadTooLarge(body.len()));
        }
        encoded_payloads.push((tag, body));
    }

    let header_len = 10 + channel_bytes.len();
    let body_len: usize = encoded_payloads
        .iter()
        .map(|(_, body)| 4 + body.len())
        .sum();

    let mut buf = BytesMut::with_capacity(header_len + body_len);
    buf.put_slice(&START_MARKER);
    buf.put_u32(message.id);
    buf.put_u8(message.kind.as_u8());
    buf.put_u8(channel_bytes.len() as u8);
    buf.put_slice(channel_bytes);
    buf.put_u8(encoded_payloads.len() as u8);
    for (tag, body) in &encoded_payloads {
        buf.put_u8(*tag);
        put_u24(&mut buf, body.len() as u32);
        buf.put_slice(body);
    }

    Ok(buf.freeze())
}

/// Decodes one complete message from `bytes`.
///
/// This function assumes `bytes` is exactly one frame (the [`Reader`](crate)
/// is responsible for establishing frame boundaries from a byte stream);
/// it does not tolerate trailing garbage past the declared payload
/// lengths, but neither does it require the slice to be framed by anyone
/// else -- it is also suitable for one-shot decode-what-you-have-buffered
/// use in tests.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let mut cursor = Cursor::new(bytes);

    let marker = cursor.take(2)?;
    if marker != START_MARKER {
        return Err(DecodeError::InvalidFraming);
    }

    let id = u32::from_be_bytes(cursor.take(4)?.try_into().unwrap());
    let kind_byte = cursor.take(1)?[0];
    let kind = MessageKind::from_u8(kind_byte).ok_or(DecodeError::UnknownMessageKind(kind_byte))?;

    let channel_len = cursor.take(1)?[0] as usize;
    let channel_bytes = cursor.take(channel_len)?;
    let channel =
        std::str::from_utf8(channel_bytes).map_err(|_| DecodeError::InvalidChannelUtf8)?;

    let payload_count = cursor.take(1)?[0] as usize;
    let mut payloads = Vec::with_capacity(payload_count);
    for _ in 0..payload_count {
        let tag = cursor.take(1)?[0];
        let size = read_u24(cursor.take(3)?) as usize;
        let data = cursor.take(size)?;
        payloads.push(decode_payload(tag, data)?);
    }

    Ok(Message {
        id,
        kind,
        channel: channel.to_owned(),
        payloads,
    })
}

/// Decodes a single payload envelope's tag + body, given the tag byte and
/// the already-length-delimited body bytes.
///
/// Exposed so the [`Reader`](crate) can decode payloads as they arrive
/// one at a time, without duplicating the tag/format-marker rules kept
/// here.
pub fn decode_payload(tag: u8, data: &[u8]) -> Result<Payload, DecodeError> {
    match tag {
        Payload::TAG_BINARY => Ok(Payload::Binary(Bytes::copy_from_slice(data))),
        Payload::TAG_JSON => {
            let (marker, text) = data.split_first().unwrap_or((&0xFF, &[]));
            if *marker != JSON_FORMAT_MARKER {
                return Err(DecodeError::UnknownFormatMarker(*marker));
            }
            let text = std::str::from_utf8(text).map_err(|_| DecodeError::InvalidPayloadUtf8)?;
            let value: serde_json::Value =
                serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
            Ok(Payload::Json(value))
        }
        other => Err(DecodeError::UnknownPayloadTag(other)),
    }
}

fn put_u24(buf: &mut BytesMut, value: u32) {
    debug_assert!(value <= MAX_PAYLOAD_SIZE as u32);
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

fn read_u24(bytes: &[u8]) -> u32 {
    (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
}

/// Tiny bounds-checked cursor used only by [`decode`]; every read fails
/// loudly with [`DecodeError::Truncated`] rather than panicking or
/// silently returning a short slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn sample_message() -> Message {
        Message::new(42, MessageKind::Event, "ping")
            .with_payload(Payload::json(vec![1, 2, 3]).unwrap())
    }

    #[test]
    fn round_trip_preserves_fields() {
        let msg = sample_message();
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn binary_payload_round_trips_verbatim() {
        let msg = Message::new(1, MessageKind::Binary, "data")
            .with_payload(Payload::json(Vec::<i32>::new()).unwrap())
            .with_payload(Payload::Binary(Bytes::from_static(b"\x00\x01\xff\xfe")));
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn empty_channel_round_trips() {
        let msg = Message::new(1, MessageKind::System, "");
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap().channel, "");
    }

    #[test]
    fn max_channel_length_round_trips() {
        let channel = "a".repeat(255);
        let msg = Message::new(1, MessageKind::Event, channel.clone());
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap().channel, channel);
    }

    #[test]
    fn channel_over_255_bytes_is_rejected() {
        let channel = "a".repeat(256);
        let msg = Message::new(1, MessageKind::Event, channel);
        assert_eq!(
            encode(&msg),
            Err(EncodeError::ChannelTooLong(256))
        );
    }

    #[test]
    fn zero_size_payload_round_trips() {
        let msg = Message::new(1, MessageKind::Binary, "x")
            .with_payload(Payload::Binary(Bytes::new()));
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.payloads[0], Payload::Binary(Bytes::new()));
    }

    #[test]
    fn stream_kind_round_trips_even_though_unused() {
        let msg = Message::new(9, MessageKind::Stream, "reserved");
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap().kind, MessageKind::Stream);
    }

    #[test]
    fn missing_start_marker_is_invalid_framing() {
        let mut bytes = encode(&sample_message()).unwrap().to_vec();
        bytes[0] = 0x00;
        assert_eq!(decode(&bytes), Err(DecodeError::InvalidFraming));
    }

    #[test]
    fn truncated_buffer_fails_loudly_not_silently() {
        let bytes = encode(&sample_message()).unwrap();
        for cut in 1..bytes.len() {
            let truncated = &bytes[..cut];
            assert!(decode(truncated).is_err(), "cut at {cut} should fail");
        }
    }

    #[test]
    fn unsupported_json_format_marker_is_a_decode_error() {
        let mut bytes = encode(&sample_message()).unwrap().to_vec();
        // Locate the JSON payload's format-marker byte: header (10 + "ping".len())
        // + payload header (4 bytes: tag + 3-byte size).
        let payload_header_start = 10 + "ping".len();
        let format_marker_pos = payload_header_start + 4;
        bytes[format_marker_pos] = 0x7F;
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::UnknownFormatMarker(0x7F))
        );
    }

    #[test]
    fn unknown_message_kind_byte_is_rejected() {
        let mut bytes = encode(&sample_message()).unwrap().to_vec();
        bytes[6] = 0xAB; // type byte, right after the 4-byte id
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownMessageKind(0xAB)));
    }
}
