//! Connection controller.
//!
//! Wires a transport to a [`Reader`]/[`Writer`]/[`Emitter`] trio and owns
//! the per-connection event loop: one `tokio::select!` over the
//! transport's events, the Writer's outbound bytes, its timer firings,
//! and its error reports, in the shape of `run_session_loop`
//! (`services/receiver/src/session.rs`) and `UplinkSession` reconnect
//! handling (`services/forwarder/src/uplink.rs`).
//!
//! [`ClientController`] adds the persistent-reconnect loop; server-side
//! connections use [`ServerConnectionController`], identical otherwise.

use crate::config::Config;
use crate::emitter::{Emitter, RequestOutcome};
use crate::error::{NetworkError, RequestError};
use crate::observer::Observer;
use crate::reader::Reader;
use crate::transport::{ClientTransport, ServerConnectionTransport, TransportEvent};
use crate::writer::{TimerEvent, Writer};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, instrument, warn};
use transit_protocol::{system_channel, Message, MessageKind, Payload, ResponseEnvelope};

/// Events observers can subscribe to via [`ClientController::events`] /
/// [`ServerConnectionController::events`].
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Connected,
    Disconnected { intentional: bool, error: Option<String> },
    /// A fully-decoded non-system inbound message, after dispatch.
    Message(Message),
    Error(NetworkError),
}

enum Command {
    Start,
    Connect,
    Disconnect,
}

/// Shared per-connection state, independent of which side (client or
/// server) owns the transport.
struct Shared {
    writer: Arc<AsyncMutex<Writer>>,
    emitter: Emitter,
    events: Arc<Observer<ControllerEvent>>,
    config: Arc<Config>,
}

fn emit(events: &Observer<ControllerEvent>, event: ControllerEvent) {
    if matches!(event, ControllerEvent::Error(_)) && events.listener_count() == 0 {
        error!(?event, "error event has no listeners");
    }
    events.emit(&event);
}

fn extract_args(message: &Message) -> Vec<Value> {
    message
        .payloads
        .first()
        .and_then(Payload::as_json)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Routes one decoded inbound message: auto-ack, system/response
/// handling, or dispatch to the [`Emitter`]'s registered handlers.
#[instrument(level = "debug", skip(shared, message), fields(id = message.id, kind = %message.kind, channel = %message.channel))]
async fn dispatch_inbound(shared: &Shared, message: Message) {
    if matches!(message.kind, MessageKind::Event | MessageKind::Binary | MessageKind::Request) {
        shared.writer.lock().await.send(
            MessageKind::System,
            system_channel::ACK,
            vec![Payload::Json(Value::from(message.id))],
        );
    }

    match message.kind {
        MessageKind::System => {
            if message.channel == system_channel::ACK {
                let ack_id = message
                    .payloads
                    .first()
                    .and_then(Payload::as_json)
                    .and_then(Value::as_u64)
                    .map(|v| v as u32);
                if let Some(id) = ack_id {
                    shared.writer.lock().await.on_ack(id);
                } else {
                    warn!("received ack message with a non-numeric or missing payload");
                }
            }
            // Other system channels are reserved; ignored.
        }
        MessageKind::Response => {
            match message.payloads.first().and_then(Payload::as_json) {
                Some(value) => match serde_json::from_value::<ResponseEnvelope>(value.clone()) {
                    Ok(envelope) => {
                        let result = if envelope.success {
                            Ok(envelope.value.unwrap_or(Value::Null))
                        } else {
                            Err(envelope.error.unwrap_or_default())
                        };
                        shared.writer.lock().await.on_response(envelope.request_id, result);
                    }
                    Err(e) => warn!(error = %e, "malformed response envelope"),
                },
                None => warn!("response message carried no payload"),
            }
        }
        MessageKind::Event => {
            let args = extract_args(&message);
            let errors = shared.emitter.dispatch_event(&message.channel, args);
            for msg in errors {
                emit(&shared.events, ControllerEvent::Error(NetworkError::Remote(msg)));
            }
        }
        MessageKind::Binary => {
            let args = extract_args(&message);
            let bytes = message.payloads.get(1).and_then(Payload::as_binary).cloned().unwrap_or_default();
            let errors = shared.emitter.dispatch_binary(&message.channel, bytes, args);
            for msg in errors {
                emit(&shared.events, ControllerEvent::Error(NetworkError::Remote(msg)));
            }
        }
        MessageKind::Request => {
            let args = extract_args(&message);
            let id = message.id;
            let channel = message.channel.clone();
            let outcome = shared.emitter.dispatch_request(&channel, args).await;
            let envelope = match outcome {
                Some(RequestOutcome::Value(value)) => ResponseEnvelope::ok(id, value),
                Some(RequestOutcome::Declined(RequestError(msg))) => ResponseEnvelope::err(id, msg),
                Some(RequestOutcome::Panicked(msg)) => {
                    emit(
                        &shared.events,
                        ControllerEvent::Error(NetworkError::Remote(format!(
                            "request handler for channel {channel:?} panicked: {msg}"
                        ))),
                    );
                    ResponseEnvelope::err(id, "An error occurred when handling this request")
                }
                None => {
                    emit(
                        &shared.events,
                        ControllerEvent::Error(NetworkError::Remote(format!(
                            "no request handler registered for channel {channel:?}"
                        ))),
                    );
                    ResponseEnvelope::err(id, "An error occurred when handling this request")
                }
            };
            match Payload::json(&envelope) {
                Ok(payload) => {
                    shared.writer.lock().await.send(MessageKind::Response, channel, vec![payload]);
                }
                Err(e) => error!(error = %e, "failed to encode response envelope"),
            }
        }
        MessageKind::Stream => {}
    }

    if !matches!(message.kind, MessageKind::System) {
        emit(&shared.events, ControllerEvent::Message(message));
    }
}

/// A single ack/operation timer firing, routed back into the `Writer`.
async fn handle_timer(writer: &AsyncMutex<Writer>, event: TimerEvent) {
    let mut writer = writer.lock().await;
    match event {
        TimerEvent::Ack(id) => writer.on_ack_timeout(id),
        TimerEvent::Operation(id) => writer.on_operation_timeout(id),
    }
}

fn spawn_reconnect(reconnect_tx: &mpsc::UnboundedSender<()>, delay: std::time::Duration) {
    let reconnect_tx = reconnect_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = reconnect_tx.send(());
    });
}

// ---------------------------------------------------------------------------
// Client controller
// ---------------------------------------------------------------------------

/// Client-side connection controller: owns a [`ClientTransport`] and
/// drives its reconnect loop. Cloning the [`Emitter`] returned by
/// [`ClientController::emitter`] is the normal way application code talks
/// to the connection; [`ClientController`] itself is the lifecycle
/// handle.
pub struct ClientController {
    command_tx: mpsc::UnboundedSender<Command>,
    emitter: Emitter,
    events: Arc<Observer<ControllerEvent>>,
}

impl ClientController {
    /// Spawns the connection's driving task and returns a handle to it.
    /// The task runs until every clone of the returned handle (and the
    /// `Emitter` it hands out) is dropped.
    pub fn new<T: ClientTransport + 'static>(mut transport: T, config: Config) -> Self {
        let config = Arc::new(config);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let writer = Arc::new(AsyncMutex::new(Writer::with_resumption(
            outbound_tx,
            timer_tx,
            error_tx,
            config.resumption_enabled,
        )));
        let emitter = Emitter::new(writer.clone(), config.clone());
        let events: Arc<Observer<ControllerEvent>> = Arc::new(Observer::new());
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();

        let shared = Shared {
            writer: writer.clone(),
            emitter: emitter.clone(),
            events: events.clone(),
            config: config.clone(),
        };

        tokio::spawn(async move {
            let mut reader = Reader::new();
            let mut transport_events = transport.take_events();
            let persistent = AtomicBool::new(false);
            let (reconnect_tx, mut reconnect_rx) = mpsc::unbounded_channel::<()>();

            macro_rules! attempt_connect {
                () => {{
                    match transport.connect().await {
                        Ok(()) => debug!("connect attempt dispatched"),
                        Err(e) => {
                            warn!(error = %e, "connect attempt failed");
                            emit(&shared.events, ControllerEvent::Error(NetworkError::Transport(e)));
                            if persistent.load(Ordering::SeqCst) {
                                spawn_reconnect(&reconnect_tx, shared.config.reconnect_delay);
                            }
                        }
                    }
                }};
            }

            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        match command {
                            Some(Command::Start) => {
                                persistent.store(true, Ordering::SeqCst);
                                attempt_connect!();
                            }
                            Some(Command::Connect) => attempt_connect!(),
                            Some(Command::Disconnect) => {
                                persistent.store(false, Ordering::SeqCst);
                                if let Err(e) = transport.disconnect().await {
                                    warn!(error = %e, "disconnect failed");
                                }
                            }
                            None => break,
                        }
                    }
                    _ = reconnect_rx.recv() => {
                        if persistent.load(Ordering::SeqCst) {
                            attempt_connect!();
                        }
                    }
                    event = transport_events.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            TransportEvent::Connected => {
                                info!("transport connected");
                                shared.writer.lock().await.set_connection_opened(true);
                                emit(&shared.events, ControllerEvent::Connected);
                            }
                            TransportEvent::Disconnected { intentional, error } => {
                                info!(intentional, error = ?error, "transport disconnected");
                                reader.clear();
                                if error.is_some() || !intentional {
                                    shared.writer.lock().await.set_connection_lost();
                                    if persistent.load(Ordering::SeqCst) {
                                        spawn_reconnect(&reconnect_tx, shared.config.reconnect_delay);
                                    }
                                } else {
                                    shared.writer.lock().await.set_connection_closed();
                                }
                                emit(&shared.events, ControllerEvent::Disconnected { intentional, error });
                            }
                            TransportEvent::Data(bytes) => {
                                for result in reader.write(&bytes) {
                                    match result {
                                        Ok(message) => dispatch_inbound(&shared, message).await,
                                        Err(e) => {
                                            error!(error = %e, "fatal parse error, closing transport");
                                            emit(&shared.events, ControllerEvent::Error(NetworkError::Decode(e.clone())));
                                            transport.close(Some(e.to_string())).await;
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Some(bytes) = outbound_rx.recv() => {
                        if let Err(e) = transport.send(bytes).await {
                            warn!(error = %e, "outbound send failed, closing transport");
                            transport.close(Some(e.to_string())).await;
                        }
                    }
                    Some(timer_event) = timer_rx.recv() => {
                        handle_timer(&shared.writer, timer_event).await;
                    }
                    Some(net_error) = error_rx.recv() => {
                        emit(&shared.events, ControllerEvent::Error(net_error));
                    }
                }
            }
        });

        Self { command_tx, emitter, events }
    }

    /// The send/on facade for this connection. Cheaply cloneable.
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Lifecycle/message/error events. See [`ControllerEvent`].
    pub fn events(&self) -> &Observer<ControllerEvent> {
        &self.events
    }

    /// Enters persistent mode and attempts an initial connection; on
    /// failure, reattempts every `reconnect_delay` until connected or
    /// [`ClientController::disconnect`] is called.
    pub fn start(&self) {
        let _ = self.command_tx.send(Command::Start);
    }

    /// A single connection attempt, outside persistent mode.
    pub fn connect(&self) {
        let _ = self.command_tx.send(Command::Connect);
    }

    /// Exits persistent mode (if entered) and gracefully disconnects.
    pub fn disconnect(&self) {
        let _ = self.command_tx.send(Command::Disconnect);
    }
}

// ---------------------------------------------------------------------------
// Server-side per-connection controller
// ---------------------------------------------------------------------------

/// Per-accepted-connection controller on the server side. Identical to
/// [`ClientController`] minus the outbound reconnect loop: once the
/// underlying transport disconnects, this controller's task ends (the
/// server accepts a fresh [`ServerConnectionTransport`] for the next
/// connection instead of retrying this one).
pub struct ServerConnectionController {
    emitter: Emitter,
    events: Arc<Observer<ControllerEvent>>,
}

impl ServerConnectionController {
    pub fn new<T: ServerConnectionTransport + 'static>(mut transport: T, config: Config) -> Self {
        let config = Arc::new(config);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let writer = Arc::new(AsyncMutex::new(Writer::with_resumption(
            outbound_tx,
            timer_tx,
            error_tx,
            config.resumption_enabled,
        )));
        let emitter = Emitter::new(writer.clone(), config.clone());
        let events: Arc<Observer<ControllerEvent>> = Arc::new(Observer::new());

        let shared = Shared {
            writer: writer.clone(),
            emitter: emitter.clone(),
            events: events.clone(),
            config,
        };

        tokio::spawn(async move {
            let mut reader = Reader::new();
            let mut transport_events = transport.take_events();
            let remote = transport.remote_address();

            loop {
                tokio::select! {
                    event = transport_events.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            TransportEvent::Connected => {
                                info!(remote = %remote, "connection accepted");
                                shared.writer.lock().await.set_connection_opened(true);
                                emit(&shared.events, ControllerEvent::Connected);
                            }
                            TransportEvent::Disconnected { intentional, error } => {
                                info!(remote = %remote, intentional, error = ?error, "connection closed");
                                reader.clear();
                                if error.is_some() || !intentional {
                                    shared.writer.lock().await.set_connection_lost();
                                } else {
                                    shared.writer.lock().await.set_connection_closed();
                                }
                                emit(&shared.events, ControllerEvent::Disconnected { intentional, error });
                                break;
                            }
                            TransportEvent::Data(bytes) => {
                                for result in reader.write(&bytes) {
                                    match result {
                                        Ok(message) => dispatch_inbound(&shared, message).await,
                                        Err(e) => {
                                            error!(remote = %remote, error = %e, "fatal parse error, closing connection");
                                            emit(&shared.events, ControllerEvent::Error(NetworkError::Decode(e.clone())));
                                            transport.close(Some(e.to_string())).await;
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Some(bytes) = outbound_rx.recv() => {
                        if let Err(e) = transport.send(bytes).await {
                            warn!(remote = %remote, error = %e, "outbound send failed, closing connection");
                            transport.close(Some(e.to_string())).await;
                        }
                    }
                    Some(timer_event) = timer_rx.recv() => {
                        handle_timer(&shared.writer, timer_event).await;
                    }
                    Some(net_error) = error_rx.recv() => {
                        emit(&shared.events, ControllerEvent::Error(net_error));
                    }
                }
            }
        });

        Self { emitter, events }
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    pub fn events(&self) -> &Observer<ControllerEvent> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_args_reads_the_first_payload_as_an_array() {
        let message = Message::new(1, MessageKind::Event, "chat")
            .with_payload(Payload::json(serde_json::json!(["hi", 2])).unwrap());
        assert_eq!(extract_args(&message), vec![Value::from("hi"), Value::from(2)]);
    }

    #[test]
    fn extract_args_defaults_to_empty_when_payload_is_missing_or_not_an_array() {
        let message = Message::new(1, MessageKind::Event, "chat");
        assert_eq!(extract_args(&message), Vec::<Value>::new());

        let message = Message::new(1, MessageKind::Event, "chat")
            .with_payload(Payload::json(serde_json::json!("not an array")).unwrap());
        assert_eq!(extract_args(&message), Vec::<Value>::new());
    }
}
