//! Abstract transport contract.
//!
//! `transit` is transport-agnostic: everything above this module talks
//! to a `dyn ClientTransport` / `dyn ServerConnectionTransport`, never a
//! concrete socket type. A WebSocket (or any other ordered byte-stream)
//! adapter lives outside this crate and is plugged in by the host
//! application, the same way `rt-protocol` knows nothing
//! about `tokio_tungstenite` -- transports live in `services/*`, not in
//! the protocol crate.
//!
//! Event delivery (`connected`, `disconnected`, `data`) is modeled as an
//! `UnboundedReceiver<TransportEvent>` owned by the connection
//! controller rather than a callback registered on the transport, so the
//! controller can `tokio::select!` over transport events, inbound
//! timers, and writer errors from a single task.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// An event pushed by a transport to its owning controller.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport finished connecting (client) or accepted a new
    /// per-connection transport (server).
    Connected,
    /// The transport is no longer usable.
    ///
    /// `intentional` is true only when the disconnect was requested by
    /// this side via `disconnect()`, as opposed to a remote close or
    /// network failure.
    Disconnected {
        intentional: bool,
        error: Option<String>,
    },
    /// A chunk of bytes arrived, in stream order. May be any non-empty
    /// size; `transit`'s `Reader` reassembles whole messages regardless
    /// of how the transport chooses to chunk its deliveries.
    Data(Bytes),
}

/// Narrow handle to a transport's event stream. Owned by the
/// connection controller so it can be polled inside one `tokio::select!`
/// alongside timers and writer errors.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// The client side of a pluggable stream transport.
///
/// Implementors deliver events (connected/disconnected/data) through the
/// [`TransportEventReceiver`] returned by [`ClientTransport::events`]
/// rather than invoking callbacks directly, keeping the controller the
/// sole driver of connection state.
#[async_trait]
pub trait ClientTransport: Send {
    /// Attempts to establish the underlying connection. On success, a
    /// [`TransportEvent::Connected`] should also be emitted on the event
    /// channel (some adapters may emit it from a background task rather
    /// than synchronously here).
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Gracefully closes the connection. Should result in a
    /// [`TransportEvent::Disconnected`] with `intentional: true`.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Forcibly closes the connection after an internal error (e.g. a
    /// failed `send`, or a fatal decode error from the `Reader`).
    /// Should result in a [`TransportEvent::Disconnected`] with
    /// `intentional: false`.
    async fn close(&mut self, error: Option<String>);

    /// Writes `bytes` to the wire. Rejection with
    /// [`TransportError::Write`] causes the transport to close itself;
    /// the caller does not call `close` separately in that case.
    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError>;

    /// The channel this transport's events arrive on. Taken once by the
    /// owning controller at construction time.
    fn take_events(&mut self) -> TransportEventReceiver;
}

/// The per-accepted-connection side of a server transport. Mirrors
/// [`ClientTransport`]'s event surface (minus `connect`, since the
/// connection already exists by construction) plus a remote address for
/// diagnostics/logging.
#[async_trait]
pub trait ServerConnectionTransport: Send {
    async fn disconnect(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self, error: Option<String>);
    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError>;
    fn take_events(&mut self) -> TransportEventReceiver;
    fn remote_address(&self) -> String;
}

/// Server-level lifecycle events, distinct from a single connection's
/// [`TransportEvent`]s.
pub enum ServerTransportEvent<C: ServerConnectionTransport> {
    Started,
    Stopped { error: Option<String> },
    Connection(C),
}

/// The listening side of a server transport: accepts connections and
/// hands each one off as its own [`ServerConnectionTransport`].
#[async_trait]
pub trait ServerTransport: Send {
    type Connection: ServerConnectionTransport + 'static;

    async fn start(&mut self) -> Result<(), TransportError>;
    async fn stop(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self, error: Option<String>);

    /// The channel new-connection (and start/stop) events arrive on.
    /// Taken once by the owning server loop at construction time.
    fn take_events(&mut self) -> mpsc::UnboundedReceiver<ServerTransportEvent<Self::Connection>>;
}
