//! Incremental parser atop a byte queue.
//!
//! A coroutine that suspends at each "need N bytes" request and resumes
//! when `write()` delivers enough is one way to model this; Rust has no
//! implicit continuation to capture, so this is rendered as an explicit
//! state machine instead: each call to [`Reader::write`] advances the
//! machine as far as the newly available bytes allow and returns however
//! many whole messages (or a single fatal error) it produced, leaving any
//! partial message buffered for the next call. Because the whole advance
//! happens inside one `write()` call with no suspension in between, a
//! reentrancy guard and generation counter (needed in a callback-driven
//! model to survive a `clear()` invoked while a parse is in-flight)
//! collapse to a single invariant that holds by construction: a
//! `write()` call either returns before `clear()` can run, or doesn't
//! run at all. See `DESIGN.md` for the recorded decision. The
//! `generation` field is kept so the type still exposes the epoch a
//! future caller wanting cooperative, callback-driven parsing
//! (re-entrant `clear()` from inside a handler) could build on.

use crate::error::ReaderError;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use transit_protocol::{codec, Message, MessageKind, Payload};

/// An ordered queue of byte buffers with O(1) amortized `push` and exact,
/// bounds-checked `take(n)` that never returns fewer than `n` bytes.
///
/// Grounded on the "queue of buffers + head offset" shape used by
/// low-level incremental readers in the corpus (e.g. the Concordium
/// node's `ConnectionLowLevel`, which tracks `pending_bytes` across a
/// `VecDeque` of buffers) rather than re-copying the whole backlog on
/// every partial read.
#[derive(Debug, Default)]
struct ByteQueue {
    buffers: VecDeque<Bytes>,
    len: usize,
    head_offset: usize,
}

impl ByteQueue {
    fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.buffers.push_back(chunk);
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Removes and returns exactly `n` bytes, or `None` (leaving the
    /// queue untouched) if fewer than `n` bytes are buffered.
    fn take(&mut self, n: usize) -> Option<Bytes> {
        if self.len < n {
            return None;
        }
        if n == 0 {
            return Some(Bytes::new());
        }

        let front_len = self.buffers.front().map_or(0, |b| b.len() - self.head_offset);
        if front_len >= n {
            let front = self.buffers.front_mut().expect("front_len > 0 implies a front buffer");
            let start = self.head_offset;
            let out = front.slice(start..start + n);
            self.head_offset += n;
            self.len -= n;
            if self.head_offset == front.len() {
                self.buffers.pop_front();
                self.head_offset = 0;
            }
            return Some(out);
        }

        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let front = self.buffers.front().expect("len invariant guarantees enough buffers");
            let avail = front.len() - self.head_offset;
            let take = avail.min(remaining);
            out.extend_from_slice(&front[self.head_offset..self.head_offset + take]);
            self.head_offset += take;
            remaining -= take;
            if self.head_offset == front.len() {
                self.buffers.pop_front();
                self.head_offset = 0;
            }
        }
        self.len -= n;
        Some(out.freeze())
    }

    fn clear(&mut self) {
        self.buffers.clear();
        self.len = 0;
        self.head_offset = 0;
    }
}

/// A message under construction, carried between `write()` calls while
/// its payloads are still arriving.
#[derive(Debug)]
struct InProgress {
    id: u32,
    kind: MessageKind,
    channel: String,
    total_payloads: usize,
    payloads: Vec<Payload>,
}

/// What the parser is waiting for next.
#[derive(Debug)]
enum Step {
    /// Waiting for the 2-byte start marker.
    Marker,
    /// Waiting for the 6-byte `id + type + channel_len` header.
    Header,
    /// Waiting for `1 + channel_len` bytes: channel text + payload_count.
    /// `id`/`kind` were already parsed out of the header and are carried
    /// here rather than in a stray struct field, so the whole parse state
    /// lives in one `Step` value.
    ChannelAndCount {
        id: u32,
        kind: MessageKind,
        channel_len: usize,
    },
    /// Waiting for the next payload's 4-byte `type + size` header.
    PayloadHeader(InProgress),
    /// Waiting for `size` bytes of payload data.
    PayloadData {
        ctx: InProgress,
        tag: u8,
        size: usize,
    },
}

impl Default for Step {
    fn default() -> Self {
        Step::Marker
    }
}

/// Incremental parser: buffers inbound chunks and yields whole
/// [`Message`]s (or a single fatal [`ReaderError`]) in arrival order.
///
/// See the module docs for how this renders a suspend/resume coroutine
/// as an explicit state machine.
#[derive(Debug, Default)]
pub struct Reader {
    queue: ByteQueue,
    step: Step,
    generation: u64,
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current clear-epoch. Bumped by [`Reader::clear`]; see module
    /// docs for why this cannot diverge from the parser's own state in
    /// this synchronous rendering.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Appends `chunk` and parses as many whole messages as the buffered
    /// bytes allow. An empty chunk is a no-op. A
    /// [`ReaderError`] is fatal: parsing does not continue past it, even
    /// if further whole messages happen to be buffered.
    pub fn write(&mut self, chunk: &[u8]) -> Vec<Result<Message, ReaderError>> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.queue.push(Bytes::copy_from_slice(chunk));
        self.drive()
    }

    /// Discards all buffered bytes, drops any in-progress parse, and
    /// bumps the generation counter. No message or error is emitted for
    /// bytes written before this call, even ones that would otherwise
    /// now be a complete message.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.step = Step::Marker;
        self.generation += 1;
    }

    fn drive(&mut self) -> Vec<Result<Message, ReaderError>> {
        let mut out = Vec::new();
        loop {
            match self.advance() {
                Ok(Some(message)) => out.push(Ok(message)),
                Ok(None) => break, // not enough bytes buffered; suspend until next write()
                Err(e) => {
                    out.push(Err(e));
                    break; // fatal: stop, even if more bytes are queued
                }
            }
        }
        out
    }

    /// Attempts one step of the state machine. Returns `Ok(Some(msg))`
    /// when a full message completed, `Ok(None)` when the queue ran out
    /// of bytes before the current step could complete (state is
    /// preserved for the next call), or `Err` on a fatal parse failure.
    fn advance(&mut self) -> Result<Option<Message>, ReaderError> {
        loop {
            match std::mem::take(&mut self.step) {
                Step::Marker => {
                    let Some(bytes) = self.queue.take(2) else {
                        self.step = Step::Marker;
                        return Ok(None);
                    };
                    if bytes.as_ref() != codec::START_MARKER {
                        return Err(transit_protocol::DecodeError::InvalidFraming.into());
                    }
                    self.step = Step::Header;
                }
                Step::Header => {
                    let Some(bytes) = self.queue.take(6) else {
                        self.step = Step::Header;
                        return Ok(None);
                    };
                    let id = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
                    let kind_byte = bytes[4];
                    let kind = transit_protocol::MessageKind::from_u8(kind_byte)
                        .ok_or(transit_protocol::DecodeError::UnknownMessageKind(kind_byte))?;
                    let channel_len = bytes[5] as usize;
                    self.step = Step::ChannelAndCount { id, kind, channel_len };
                }
                Step::ChannelAndCount { id, kind, channel_len } => {
                    let Some(bytes) = self.queue.take(1 + channel_len) else {
                        self.step = Step::ChannelAndCount { id, kind, channel_len };
                        return Ok(None);
                    };
                    let channel = std::str::from_utf8(&bytes[..channel_len])
                        .map_err(|_| transit_protocol::DecodeError::InvalidChannelUtf8)?
                        .to_owned();
                    let payload_count = bytes[channel_len] as usize;
                    let ctx = InProgress {
                        id,
                        kind,
                        channel,
                        total_payloads: payload_count,
                        payloads: Vec::with_capacity(payload_count),
                    };
                    self.step = if ctx.payloads.len() < ctx.total_payloads {
                        Step::PayloadHeader(ctx)
                    } else {
                        return Ok(Some(Message {
                            id: ctx.id,
                            kind: ctx.kind,
                            channel: ctx.channel,
                            payloads: ctx.payloads,
                        }));
                    };
                }
                Step::PayloadHeader(ctx) => {
                    let Some(bytes) = self.queue.take(4) else {
                        self.step = Step::PayloadHeader(ctx);
                        return Ok(None);
                    };
                    let tag = bytes[0];
                    let size = (u32::from(bytes[1]) << 16) | (u32::from(bytes[2]) << 8) | u32::from(bytes[3]);
                    self.step = Step::PayloadData {
                        ctx,
                        tag,
                        size: size as usize,
                    };
                }
                Step::PayloadData { mut ctx, tag, size } => {
                    let Some(data) = self.queue.take(size) else {
                        self.step = Step::PayloadData { ctx, tag, size };
                        return Ok(None);
                    };
                    let payload = decode_payload(tag, &data)?;
                    ctx.payloads.push(payload);
                    self.step = if ctx.payloads.len() < ctx.total_payloads {
                        Step::PayloadHeader(ctx)
                    } else {
                        return Ok(Some(Message {
                            id: ctx.id,
                            kind: ctx.kind,
                            channel: ctx.channel,
                            payloads: ctx.payloads,
                        }));
                    };
                }
            }
        }
    }
}

fn decode_payload(tag: u8, data: &[u8]) -> Result<Payload, transit_protocol::DecodeError> {
    codec::decode_payload(tag, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_protocol::encode;

    fn sample(id: u32, channel: &str) -> Message {
        Message::new(id, MessageKind::Event, channel)
            .with_payload(Payload::json(serde_json::json!([1, 2])).unwrap())
    }

    #[test]
    fn write_with_empty_chunk_is_a_no_op() {
        let mut reader = Reader::new();
        assert!(reader.write(&[]).is_empty());
    }

    #[test]
    fn one_shot_and_byte_at_a_time_feeds_agree() {
        let messages = vec![sample(1, "a"), sample(2, "bb"), sample(3, "")];
        let mut all_bytes = Vec::new();
        for m in &messages {
            all_bytes.extend_from_slice(&encode(m).unwrap());
        }

        let mut whole = Reader::new();
        let from_whole: Vec<Message> = whole
            .write(&all_bytes)
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let mut chunked = Reader::new();
        let mut from_chunks = Vec::new();
        for byte in &all_bytes {
            from_chunks.extend(chunked.write(std::slice::from_ref(byte)).into_iter().map(Result::unwrap));
        }

        assert_eq!(from_whole, messages);
        assert_eq!(from_chunks, messages);
    }

    #[test]
    fn partial_message_suspends_until_more_bytes_arrive() {
        let msg = sample(7, "ping");
        let bytes = encode(&msg).unwrap();
        let mut reader = Reader::new();

        assert!(reader.write(&bytes[..bytes.len() - 1]).is_empty());
        let results: Vec<_> = reader.write(&bytes[bytes.len() - 1..]).into_iter().map(Result::unwrap).collect();
        assert_eq!(results, vec![msg]);
    }

    #[test]
    fn invalid_start_marker_is_fatal_and_reported() {
        let mut reader = Reader::new();
        let results = reader.write(&[0x00, 0x00, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ReaderError::InvalidFraming(_))));
    }

    #[test]
    fn error_is_fatal_even_if_more_bytes_are_already_queued() {
        let mut bad = vec![0x00, 0x00];
        bad.extend_from_slice(&encode(&sample(1, "a")).unwrap());
        let mut reader = Reader::new();
        let results = reader.write(&bad);
        assert_eq!(results.len(), 1, "parsing stops at the first fatal error");
        assert!(results[0].is_err());
    }

    #[test]
    fn clear_suppresses_messages_from_bytes_written_before_it() {
        let msg = sample(1, "a");
        let bytes = encode(&msg).unwrap();
        let mut reader = Reader::new();

        let gen_before = reader.generation();
        assert!(reader.write(&bytes[..bytes.len() - 1]).is_empty());
        reader.clear();
        assert_ne!(reader.generation(), gen_before);

        // Completing the message that was in flight before `clear()` must
        // not surface: the suspended parse is abandoned, not resumed.
        let results = reader.write(&bytes[bytes.len() - 1..]);
        assert!(results.is_empty());
    }

    #[test]
    fn clear_then_write_parses_cleanly_from_the_next_marker() {
        let mut reader = Reader::new();
        reader.clear();
        let msg = sample(9, "after-clear");
        let results: Vec<_> = reader
            .write(&encode(&msg).unwrap())
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(results, vec![msg]);
    }
}
