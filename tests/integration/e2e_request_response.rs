//! End-to-end test: request/response round trips, including both ways a
//! handler can fail a request -- declining explicitly with a
//! `RequestError`, and panicking (the generic path).

use serde_json::json;
use std::time::Duration;
use transit::{ClientController, Config, NetworkError, RequestError, ServerConnectionController};
use transit_test_support::transport_pair;

#[tokio::test]
async fn request_resolves_with_the_handler_return_value() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let server = ServerConnectionController::new(pair.server, config.clone());
    let client = ClientController::new(pair.client, config);

    server.emitter().on_request("add", |args| {
        Box::pin(async move {
            let a = args.first().and_then(serde_json::Value::as_i64).unwrap_or(0);
            let b = args.get(1).and_then(serde_json::Value::as_i64).unwrap_or(0);
            Ok(json!(a + b))
        })
    });

    client.connect();

    let completion = client
        .emitter()
        .send_request("add", vec![json!(2), json!(3)], None)
        .await;
    let value = tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("response should arrive before the timeout")
        .expect("request should succeed");
    assert_eq!(value, json!(5));
}

#[tokio::test]
async fn a_declined_request_forwards_its_message_verbatim() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let server = ServerConnectionController::new(pair.server, config.clone());
    let client = ClientController::new(pair.client, config);

    server
        .emitter()
        .on_request("reject-me", |_args| Box::pin(async { Err(RequestError::new("not allowed")) }));

    client.connect();

    let completion = client.emitter().send_request("reject-me", vec![], None).await;
    let result = tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("response should arrive before the timeout");
    match result {
        Err(NetworkError::Remote(msg)) => assert_eq!(msg, "not allowed"),
        other => panic!("expected Remote(\"not allowed\"), got {other:?}"),
    }
}

#[tokio::test]
async fn a_panicking_handler_forwards_a_generic_message_not_the_panic_payload() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let server = ServerConnectionController::new(pair.server, config.clone());
    let client = ClientController::new(pair.client, config);

    server
        .emitter()
        .on_request("boom", |_args| Box::pin(async { panic!("sensitive internal detail") }));

    client.connect();

    let completion = client.emitter().send_request("boom", vec![], None).await;
    let result = tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("response should arrive before the timeout");
    match result {
        Err(NetworkError::Remote(msg)) => {
            assert_eq!(msg, "An error occurred when handling this request");
        }
        other => panic!("expected a generic Remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn a_request_to_an_unregistered_channel_gets_a_generic_error() {
    let pair = transport_pair("test-peer");
    let config = Config::default();

    let server = ServerConnectionController::new(pair.server, config.clone());
    let client = ClientController::new(pair.client, config);

    client.connect();

    let completion = client.emitter().send_request("nobody-home", vec![], None).await;
    let result = tokio::time::timeout(Duration::from_secs(1), completion)
        .await
        .expect("response should arrive before the timeout");
    match result {
        Err(NetworkError::Remote(msg)) => {
            assert_eq!(msg, "An error occurred when handling this request");
        }
        other => panic!("expected a generic Remote error, got {other:?}"),
    }
}
