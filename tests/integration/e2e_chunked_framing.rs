//! End-to-end test: wire bytes for several messages arriving one byte at a
//! time must still be reassembled into the right messages, in order,
//! without any framing byte being dropped or misattributed.

use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use transit::{Config, ServerConnectionController};
use transit_protocol::{encode, Message, MessageKind, Payload};
use transit_test_support::transport_pair;

#[tokio::test]
async fn messages_fed_one_byte_at_a_time_decode_in_order() {
    let pair = transport_pair("test-peer");
    let config = Config::default();
    let server = ServerConnectionController::new(pair.server, config);

    let (got_tx, mut got_rx) = mpsc::unbounded_channel();
    server.emitter().on_event("chunked", move |args| {
        let _ = got_tx.send(args);
    });

    let messages: Vec<Message> = (1..=3u32)
        .map(|id| {
            Message::new(id, MessageKind::Event, "chunked")
                .with_payload(Payload::json(json!([id])).unwrap())
        })
        .collect();

    let mut all_bytes = Vec::new();
    for message in &messages {
        all_bytes.extend_from_slice(&encode(message).unwrap());
    }

    for byte in all_bytes {
        pair.server_injector.push_data(vec![byte]);
    }

    for expected_id in 1..=3u64 {
        let got = tokio::time::timeout(Duration::from_secs(1), got_rx.recv())
            .await
            .unwrap_or_else(|_| panic!("message {expected_id} should have been dispatched"))
            .expect("channel should still be open");
        assert_eq!(got, vec![json!(expected_id)]);
    }

    assert!(
        tokio::time::timeout(Duration::from_millis(100), got_rx.recv())
            .await
            .is_err(),
        "no further events should be dispatched once all three messages are consumed"
    );
}
