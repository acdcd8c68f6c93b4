// transit-test-support: In-memory transport pair for exercising the
// `transit` connection controllers without a real socket.
//
// In the spirit of `rt-test-utils` (`MockWsServer` / `MockWsClient`):
// the same idea of a harness-owned, loopback stand-in for the real
// transport, scaled down to an in-process byte pipe since `transit` only
// needs something that satisfies the `ClientTransport` /
// `ServerConnectionTransport` contracts, not a real WebSocket handshake.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use transit::transport::{ClientTransport, ServerConnectionTransport};
use transit::{TransportError, TransportEvent, TransportEventReceiver, TransportEventSender};

/// Lets a test flip whether one side of a [`TransportPair`] silently
/// swallows outbound bytes instead of delivering them to its peer,
/// used to exercise ack-timeout behavior without a real network
/// partition.
#[derive(Clone)]
pub struct SwallowHandle(Arc<AtomicBool>);

impl SwallowHandle {
    pub fn set(&self, swallow: bool) {
        self.0.store(swallow, Ordering::SeqCst);
    }
}

/// Pushes raw, unframed bytes directly onto one side's transport-event
/// stream, bypassing `send()`/encoding entirely.
///
/// Used to feed a message's wire bytes one at a time (exercising
/// chunked framing) without needing a connected peer on the other end
/// of the pipe.
#[derive(Clone)]
pub struct RawInjector(TransportEventSender);

impl RawInjector {
    pub fn push_data(&self, bytes: impl Into<Bytes>) {
        let _ = self.0.send(TransportEvent::Data(bytes.into()));
    }

    pub fn push_disconnected(&self, intentional: bool, error: Option<String>) {
        let _ = self.0.send(TransportEvent::Disconnected { intentional, error });
    }
}

/// The client side of an in-memory transport pair.
pub struct InMemoryClientTransport {
    own_events_tx: TransportEventSender,
    own_events_rx: Option<TransportEventReceiver>,
    peer_events_tx: TransportEventSender,
    swallow_outbound: Arc<AtomicBool>,
    connected: bool,
}

impl InMemoryClientTransport {
    /// Whether `connect()` has been called more recently than
    /// `disconnect()`/`close()`. Exposed for tests asserting on transport
    /// state directly rather than through a `ClientController`.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

#[async_trait]
impl ClientTransport for InMemoryClientTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        let _ = self.own_events_tx.send(TransportEvent::Connected);
        let _ = self.peer_events_tx.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        let _ = self.own_events_tx.send(TransportEvent::Disconnected {
            intentional: true,
            error: None,
        });
        Ok(())
    }

    async fn close(&mut self, error: Option<String>) {
        self.connected = false;
        let _ = self.own_events_tx.send(TransportEvent::Disconnected {
            intentional: false,
            error,
        });
    }

    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        if self.swallow_outbound.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.peer_events_tx.send(TransportEvent::Data(bytes));
        Ok(())
    }

    fn take_events(&mut self) -> TransportEventReceiver {
        self.own_events_rx.take().expect("take_events called twice")
    }
}

/// The server side of an in-memory transport pair: the per-connection
/// transport a `ServerConnectionController` would be handed after a real
/// listener accepted a socket.
pub struct InMemoryServerConnectionTransport {
    own_events_tx: TransportEventSender,
    own_events_rx: Option<TransportEventReceiver>,
    peer_events_tx: TransportEventSender,
    swallow_outbound: Arc<AtomicBool>,
    remote_address: String,
}

#[async_trait]
impl ServerConnectionTransport for InMemoryServerConnectionTransport {
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let _ = self.own_events_tx.send(TransportEvent::Disconnected {
            intentional: true,
            error: None,
        });
        Ok(())
    }

    async fn close(&mut self, error: Option<String>) {
        let _ = self.own_events_tx.send(TransportEvent::Disconnected {
            intentional: false,
            error,
        });
    }

    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        if self.swallow_outbound.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.peer_events_tx.send(TransportEvent::Data(bytes));
        Ok(())
    }

    fn take_events(&mut self) -> TransportEventReceiver {
        self.own_events_rx.take().expect("take_events called twice")
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }
}

/// A connected pair of in-memory transports plus the handles tests need to
/// simulate failures: swallowing outbound bytes, or feeding raw bytes
/// straight onto one side's event stream.
pub struct TransportPair {
    pub client: InMemoryClientTransport,
    pub server: InMemoryServerConnectionTransport,
    pub client_swallow: SwallowHandle,
    pub server_swallow: SwallowHandle,
    pub client_injector: RawInjector,
    pub server_injector: RawInjector,
}

/// Builds an unconnected [`TransportPair`]. Neither side emits
/// [`TransportEvent::Connected`] until the client's `connect()` is called
/// (by a `ClientController` or directly in a test), at which point both
/// sides see it -- modeling the handshake completing on both ends of one
/// logical socket at once.
pub fn transport_pair(remote_address: impl Into<String>) -> TransportPair {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let client_swallow = Arc::new(AtomicBool::new(false));
    let server_swallow = Arc::new(AtomicBool::new(false));

    let client = InMemoryClientTransport {
        own_events_tx: client_tx.clone(),
        own_events_rx: Some(client_rx),
        peer_events_tx: server_tx.clone(),
        swallow_outbound: client_swallow.clone(),
        connected: false,
    };
    let server = InMemoryServerConnectionTransport {
        own_events_tx: server_tx.clone(),
        own_events_rx: Some(server_rx),
        peer_events_tx: client_tx.clone(),
        swallow_outbound: server_swallow.clone(),
        remote_address: remote_address.into(),
    };

    TransportPair {
        client,
        server,
        client_swallow: SwallowHandle(client_swallow),
        server_swallow: SwallowHandle(server_swallow),
        client_injector: RawInjector(client_tx),
        server_injector: RawInjector(server_tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit::ClientTransport as _;

    #[tokio::test]
    async fn connect_emits_connected_on_both_sides() {
        let pair = transport_pair("peer");
        let TransportPair { mut client, mut server, .. } = pair;
        let mut client_events = client.take_events();
        let mut server_events = server.take_events();

        client.connect().await.unwrap();

        assert!(matches!(client_events.recv().await, Some(TransportEvent::Connected)));
        assert!(matches!(server_events.recv().await, Some(TransportEvent::Connected)));
    }

    #[tokio::test]
    async fn swallowed_sends_never_reach_the_peer() {
        let pair = transport_pair("peer");
        let TransportPair { mut client, mut server, client_swallow, .. } = pair;
        let mut server_events = server.take_events();
        client_swallow.set(true);

        client.send(Bytes::from_static(b"hello")).await.unwrap();

        assert!(server_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn raw_injector_delivers_bytes_without_a_connected_peer() {
        let pair = transport_pair("peer");
        let mut server = pair.server;
        let mut server_events = server.take_events();

        pair.client_injector.push_data(Bytes::from_static(b"x"));
        // client_injector targets the client's own stream, not the server's.
        assert!(server_events.try_recv().is_err());

        pair.server_injector.push_data(Bytes::from_static(b"y"));
        match server_events.recv().await {
            Some(TransportEvent::Data(bytes)) => assert_eq!(&bytes[..], b"y"),
            other => panic!("expected Data, got {other:?}"),
        }
    }
}
