//! End-to-end test: messages queued while disconnected are retained and
//! flushed once the transport (re)connects, and an intentional disconnect
//! instead drops them for good.

use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use transit::{ClientController, Config, ServerConnectionController};
use transit_test_support::transport_pair;

#[tokio::test]
async fn a_message_queued_before_connect_is_flushed_once_connected() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let server = ServerConnectionController::new(pair.server, config.clone());
    let client = ClientController::new(pair.client, config);

    let (server_got_tx, mut server_got_rx) = mpsc::unbounded_channel();
    server.emitter().on_event("queued-before-connect", move |args| {
        let _ = server_got_tx.send(args);
    });

    // Queued while the transport is still disconnected: the record is
    // retained rather than sent, and flushed once `connect()` completes.
    let completion = client
        .emitter()
        .send_event("queued-before-connect", vec![json!("hi")])
        .await;

    client.connect();

    tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("ack should arrive once the connection opens and flushes the record")
        .expect("ack completion should resolve Ok");

    let got = tokio::time::timeout(Duration::from_secs(1), server_got_rx.recv())
        .await
        .expect("server should have dispatched the flushed event")
        .expect("channel should still be open");
    assert_eq!(got, vec![json!("hi")]);
}

#[tokio::test]
async fn an_intentional_disconnect_drops_pending_records() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let client = ClientController::new(pair.client, config);

    let completion = client.emitter().send_event("never-delivered", vec![json!(1)]).await;

    // Disconnecting before the record is ever flushed: `set_connection_closed`
    // runs (transport reports an intentional, error-free disconnect), which
    // drops every retained record rather than keeping it for a later resume.
    client.disconnect();

    let result = tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("the completion should settle once the record is dropped");
    assert!(
        matches!(result, Err(transit::NetworkError::ConnectionClosed)),
        "expected ConnectionClosed, got {result:?}"
    );
}
