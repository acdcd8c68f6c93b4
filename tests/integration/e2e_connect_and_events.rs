//! End-to-end test: connecting a client controller to a server connection
//! controller over an in-memory transport pair, and exchanging events in
//! both directions.

use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use transit::{Config, ClientController, ServerConnectionController};
use transit_test_support::transport_pair;

#[tokio::test]
async fn connect_and_event_round_trip() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let server = ServerConnectionController::new(pair.server, config.clone());
    let client = ClientController::new(pair.client, config);

    let (server_got_tx, mut server_got_rx) = mpsc::unbounded_channel();
    server
        .emitter()
        .on_event("ping", move |args| {
            let _ = server_got_tx.send(args);
        });

    let (client_got_tx, mut client_got_rx) = mpsc::unbounded_channel();
    client
        .emitter()
        .on_event("pong", move |args| {
            let _ = client_got_tx.send(args);
        });

    client.connect();

    let completion = client.emitter().send_event("ping", vec![json!(1)]).await;
    tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("ack should arrive before the timeout")
        .expect("ack completion should resolve Ok");

    let got = tokio::time::timeout(Duration::from_secs(1), server_got_rx.recv())
        .await
        .expect("server should have dispatched the event")
        .expect("channel should still be open");
    assert_eq!(got, vec![json!(1)]);

    let completion = server.emitter().send_event("pong", vec![json!(2)]).await;
    tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("ack should arrive before the timeout")
        .expect("ack completion should resolve Ok");

    let got = tokio::time::timeout(Duration::from_secs(1), client_got_rx.recv())
        .await
        .expect("client should have dispatched the event")
        .expect("channel should still be open");
    assert_eq!(got, vec![json!(2)]);
}

#[tokio::test]
async fn connected_event_fires_on_both_controllers() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let server = ServerConnectionController::new(pair.server, config.clone());
    let client = ClientController::new(pair.client, config);

    let (server_connected_tx, server_connected_rx) = tokio::sync::oneshot::channel();
    server.events().once(move |event| {
        if matches!(event, transit::ControllerEvent::Connected) {
            let _ = server_connected_tx.send(());
        }
    });

    let (client_connected_tx, client_connected_rx) = tokio::sync::oneshot::channel();
    client.events().once(move |event| {
        if matches!(event, transit::ControllerEvent::Connected) {
            let _ = client_connected_tx.send(());
        }
    });

    client.connect();

    tokio::time::timeout(Duration::from_secs(1), server_connected_rx)
        .await
        .expect("server should observe Connected")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), client_connected_rx)
        .await
        .expect("client should observe Connected")
        .unwrap();
}
