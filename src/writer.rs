//! Outbound message register.
//!
//! `Writer` owns the per-connection monotonic id counter, the map of
//! in-flight outgoing records, and their ack/operation timers. It never
//! touches the transport directly -- it is handed a narrow outbound-bytes
//! channel instead of the whole transport, and reports its own failures
//! (encode errors, timeouts) on a second channel the connection
//! controller polls. This breaks what would otherwise be a Controller
//! <-> Writer <-> transport reference cycle.

use crate::completion::Completion;
use crate::error::{NetworkError, NetworkTimeoutError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;
use transit_protocol::{encode, Message, MessageId, MessageKind, Payload};

/// Fired when a record's ack or operation timer elapses. Routed back
/// into `Writer::on_ack_timeout`/`on_operation_timeout` by whichever
/// task owns the receiving end (the connection controller).
#[derive(Debug, Clone, Copy)]
pub enum TimerEvent {
    Ack(MessageId),
    Operation(MessageId),
}

/// Per-call overrides for [`Writer::queue`].
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// `Duration::ZERO` disables the ack timer for this message.
    pub ack_timeout: Duration,
    /// `Duration::ZERO` disables the operation timer (meaningful only
    /// for `Request` messages).
    pub operation_timeout: Duration,
    /// `true` for event/binary messages (resolved on ack); `false` for
    /// requests (resolved on response, never on ack alone).
    pub resolve_on_ack: bool,
}

struct OutgoingRecord {
    message: Message,
    sent: bool,
    acknowledged: bool,
    resolve_on_ack: bool,
    completion: Option<oneshot::Sender<Result<serde_json::Value, NetworkError>>>,
    ack_timeout: Duration,
    operation_timeout: Duration,
    ack_timer: Option<JoinHandle<()>>,
    operation_timer: Option<JoinHandle<()>>,
}

impl Drop for OutgoingRecord {
    fn drop(&mut self) {
        if let Some(h) = self.ack_timer.take() {
            h.abort();
        }
        if let Some(h) = self.operation_timer.take() {
            h.abort();
        }
    }
}

/// The outbound message register for one connection.
pub struct Writer {
    next_id: MessageId,
    connected: bool,
    resumption_enabled: bool,
    messages: HashMap<MessageId, OutgoingRecord>,
    outbound_tx: mpsc::UnboundedSender<bytes::Bytes>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    error_tx: mpsc::UnboundedSender<NetworkError>,
}

impl Writer {
    pub fn new(
        outbound_tx: mpsc::UnboundedSender<bytes::Bytes>,
        timer_tx: mpsc::UnboundedSender<TimerEvent>,
        error_tx: mpsc::UnboundedSender<NetworkError>,
    ) -> Self {
        Self::with_resumption(outbound_tx, timer_tx, error_tx, true)
    }

    /// Like [`Writer::new`], but with `resumption_enabled` explicit --
    /// when `false`, [`Writer::set_connection_lost`] drops every retained
    /// record instead of keeping it for a later resume.
    pub fn with_resumption(
        outbound_tx: mpsc::UnboundedSender<bytes::Bytes>,
        timer_tx: mpsc::UnboundedSender<TimerEvent>,
        error_tx: mpsc::UnboundedSender<NetworkError>,
        resumption_enabled: bool,
    ) -> Self {
        Self {
            next_id: 0,
            connected: false,
            resumption_enabled,
            messages: HashMap::new(),
            outbound_tx,
            timer_tx,
            error_tx,
        }
    }

    fn next_id(&mut self) -> MessageId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of outgoing records currently retained (sent-and-pending
    /// plus not-yet-sent). Exposed for tests exercising resume/drop
    /// behavior.
    pub fn pending_count(&self) -> usize {
        self.messages.len()
    }

    /// Fire-and-forget send: stamps a fresh id, encodes, and forwards to
    /// the transport if connected. No record is kept -- used for acks
    /// and, at the controller's discretion, for responses.
    pub fn send(&mut self, kind: MessageKind, channel: impl Into<String>, payloads: Vec<Payload>) -> bool {
        if !self.connected {
            return false;
        }
        let id = self.next_id();
        let message = build_message(id, kind, channel, payloads);
        match encode(&message) {
            Ok(bytes) => self.outbound_tx.send(bytes).is_ok(),
            Err(e) => {
                let _ = self.error_tx.send(NetworkError::Encode(e));
                false
            }
        }
    }

    /// Reliable send: stamps a fresh id, registers a record, and returns
    /// a [`Completion`] settled by a later ack/response/timeout.
    pub fn queue(
        &mut self,
        kind: MessageKind,
        channel: impl Into<String>,
        payloads: Vec<Payload>,
        options: QueueOptions,
    ) -> (MessageId, Completion<serde_json::Value>) {
        let id = self.next_id();
        let message = build_message(id, kind, channel, payloads);
        trace!(id, kind = %message.kind, channel = %message.channel, "queue");
        let (tx, rx) = oneshot::channel();
        self.messages.insert(
            id,
            OutgoingRecord {
                message,
                sent: false,
                acknowledged: false,
                resolve_on_ack: options.resolve_on_ack,
                completion: Some(tx),
                ack_timeout: options.ack_timeout,
                operation_timeout: options.operation_timeout,
                ack_timer: None,
                operation_timer: None,
            },
        );
        self.send_message(id);
        (id, Completion::from_receiver(rx))
    }

    /// (Re)sends an already-registered record if connected, starting its
    /// timers. No-op if disconnected (the record is simply left for a
    /// later `set_connection_opened` to flush) or if the id is unknown.
    fn send_message(&mut self, id: MessageId) {
        if !self.connected {
            return;
        }
        let Some((message, ack_timeout, operation_timeout)) = self
            .messages
            .get(&id)
            .map(|r| (r.message.clone(), r.ack_timeout, r.operation_timeout))
        else {
            return;
        };
        let is_request = matches!(message.kind, MessageKind::Request);

        if let Some(record) = self.messages.get_mut(&id) {
            record.sent = true;
            record.acknowledged = false;
            if let Some(h) = record.ack_timer.take() {
                h.abort();
            }
            if let Some(h) = record.operation_timer.take() {
                h.abort();
            }
        }

        if !ack_timeout.is_zero() {
            let timer_tx = self.timer_tx.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(ack_timeout).await;
                let _ = timer_tx.send(TimerEvent::Ack(id));
            });
            if let Some(record) = self.messages.get_mut(&id) {
                record.ack_timer = Some(handle);
            }
        }
        if is_request && !operation_timeout.is_zero() {
            let timer_tx = self.timer_tx.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(operation_timeout).await;
                let _ = timer_tx.send(TimerEvent::Operation(id));
            });
            if let Some(record) = self.messages.get_mut(&id) {
                record.operation_timer = Some(handle);
            }
        }

        match encode(&message) {
            Ok(bytes) => {
                if self.outbound_tx.send(bytes).is_err() {
                    let _ = self.error_tx.send(NetworkError::ConnectionClosed);
                }
            }
            Err(e) => {
                let _ = self.error_tx.send(NetworkError::Encode(e));
            }
        }
    }

    /// Acknowledges `id`. Idempotent: re-acking an already-acked id does
    /// nothing (no second completion resolution). Non-request records
    /// are removed once their completion resolves; request records
    /// remain until their response arrives.
    pub fn on_ack(&mut self, id: MessageId) {
        let remove = {
            let Some(record) = self.messages.get_mut(&id) else {
                return;
            };
            if record.acknowledged {
                return;
            }
            record.acknowledged = true;
            if let Some(h) = record.ack_timer.take() {
                h.abort();
            }
            if record.resolve_on_ack {
                if let Some(tx) = record.completion.take() {
                    let _ = tx.send(Ok(serde_json::Value::Bool(true)));
                }
                true
            } else {
                false
            }
        };
        if remove {
            self.messages.remove(&id);
        }
    }

    /// Completes a request with the decoded response, removing its
    /// record and both timers. `Ok` resolves the completion with the
    /// response value; `Err` rejects it with [`NetworkError::Remote`].
    pub fn on_response(&mut self, id: MessageId, result: Result<serde_json::Value, String>) {
        let Some(mut record) = self.messages.remove(&id) else {
            return;
        };
        if let Some(h) = record.ack_timer.take() {
            h.abort();
        }
        if let Some(h) = record.operation_timer.take() {
            h.abort();
        }
        if let Some(tx) = record.completion.take() {
            let _ = tx.send(result.map_err(NetworkError::Remote));
        }
    }

    /// An ack timer elapsed without an ack: surface an error, but keep
    /// the record (it may still be acked, or resent on resume).
    pub fn on_ack_timeout(&mut self, id: MessageId) {
        let Some(record) = self.messages.get_mut(&id) else {
            return;
        };
        if record.acknowledged {
            return;
        }
        record.ack_timer = None;
        let _ = self.error_tx.send(NetworkError::Timeout(NetworkTimeoutError));
    }

    /// An operation timer elapsed without a response: reject the
    /// completion and drop the record.
    pub fn on_operation_timeout(&mut self, id: MessageId) {
        let Some(mut record) = self.messages.remove(&id) else {
            return;
        };
        if let Some(h) = record.ack_timer.take() {
            h.abort();
        }
        record.operation_timer = None;
        if let Some(tx) = record.completion.take() {
            let _ = tx.send(Err(NetworkError::Timeout(NetworkTimeoutError)));
        }
    }

    /// Connection dropped unexpectedly. Cancels all timers; retains
    /// every record for a later resume if `resumption_enabled`, otherwise
    /// drops them all (same effect as [`Writer::set_connection_closed`]
    /// but without forcing `connected` false twice).
    pub fn set_connection_lost(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if !self.resumption_enabled {
            self.messages.clear();
            return;
        }
        for record in self.messages.values_mut() {
            if let Some(h) = record.ack_timer.take() {
                h.abort();
            }
            if let Some(h) = record.operation_timer.take() {
                h.abort();
            }
        }
    }

    /// Connection (re)established. Flushes every retained record with
    /// `!sent || is_resumed`, in ascending id order (which coincides
    /// with send order, since ids are assigned monotonically).
    ///
    /// `is_resumed` reproduces a source ambiguity deliberately: the
    /// connection controller always passes `true` here (see
    /// `DESIGN.md`), so already-sent pending records are resent on
    /// every reconnect, not only on a true session resumption.
    pub fn set_connection_opened(&mut self, is_resumed: bool) {
        if self.connected {
            return;
        }
        self.connected = true;
        let mut ids: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|(_, r)| !r.sent || is_resumed)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            self.send_message(id);
        }
    }

    /// Connection intentionally closed without resumption: cancel all
    /// timers and drop every record. Completions are left pending --
    /// dropping the `oneshot::Sender` resolves each caller's
    /// [`Completion`] to `NetworkError::ConnectionClosed`.
    pub fn set_connection_closed(&mut self) {
        self.connected = false;
        self.messages.clear();
    }
}

fn build_message(id: MessageId, kind: MessageKind, channel: impl Into<String>, payloads: Vec<Payload>) -> Message {
    let mut message = Message::new(id, kind, channel);
    message.payloads = payloads;
    message
}
