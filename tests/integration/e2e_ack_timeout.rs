//! End-to-end test: a message whose bytes never reach the peer (the
//! transport silently swallows them) must surface as a `NetworkError::Timeout`
//! once its ack deadline elapses, without crashing the connection.

use serde_json::json;
use std::time::Duration;
use transit::{ClientController, ConfigBuilder, ControllerEvent, NetworkError};
use transit_test_support::transport_pair;

#[tokio::test]
async fn swallowed_outbound_bytes_time_out_waiting_for_an_ack() {
    let pair = transport_pair("test-peer");
    let config = ConfigBuilder::new()
        .ack_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let client = ClientController::new(pair.client, config);
    pair.client_swallow.set(true);

    let (error_tx, mut error_rx) = tokio::sync::mpsc::unbounded_channel();
    client.events().on(move |event| {
        if let ControllerEvent::Error(err) = event {
            let _ = error_tx.send(err.clone());
        }
    });

    client.connect();

    // Fire-and-forget: the completion resolves on ack, which never comes
    // because the transport is swallowing outbound bytes. The test only
    // cares about the timeout surfacing as a controller error event.
    let _completion = client.emitter().send_event("ping", vec![json!(1)]).await;

    let error = tokio::time::timeout(Duration::from_secs(1), error_rx.recv())
        .await
        .expect("an error event should fire once the ack timer elapses")
        .expect("channel should still be open");
    assert!(matches!(error, NetworkError::Timeout(_)), "expected Timeout, got {error:?}");
}
