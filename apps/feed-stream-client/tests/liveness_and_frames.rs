//! Liveness and Inbound Frame Integration Tests
//!
//! Tests heartbeat-driven failure detection and how malformed or
//! server-reported error frames are surfaced.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{FakeLink, OpenOutcome, record, settle, test_config};
use feed_stream_client::{ClientEvent, ConnectionState, EventKind, NoAuth, StreamClient, StreamError};
use serde_json::json;
use tokio::time::Instant;

async fn connected_client() -> (StreamClient, FakeLink) {
    let link = FakeLink::new(OpenOutcome::Open);
    let client = StreamClient::spawn(test_config(), link.clone(), NoAuth);
    client.connect();
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    (client, link)
}

#[tokio::test(start_paused = true)]
async fn silent_link_is_dropped_without_transport_close() {
    let (client, link) = connected_client().await;
    let connected_at = Instant::now();
    link.set_fallback(OpenOutcome::Hang);

    client
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();

    // Two silent 30s intervals, detected within one more
    let detected_after = connected_at.elapsed();
    assert!(detected_after >= Duration::from_secs(60), "{detected_after:?}");
    assert!(detected_after <= Duration::from_secs(90), "{detected_after:?}");

    assert_eq!(link.sent_commands(), vec![("ping".to_string(), None)]);
    assert_eq!(link.close_codes(), vec![4000]);
    client.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn inbound_traffic_keeps_link_alive() {
    let (client, link) = connected_client().await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    link.push(&json!({"type": "heartbeat"}));
    tokio::time::sleep(Duration::from_secs(30)).await;
    link.push(&json!({"type": "pong"}));
    tokio::time::sleep(Duration::from_secs(30)).await;
    link.push(&json!({"type": "data", "channel": "nobody-listens", "data": 1}));
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert_eq!(client.get_state(), ConnectionState::Connected);
    assert!(link.sent_commands().is_empty());
    assert_eq!(link.open_count(), 1);
    client.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn pong_after_ping_resets_detection() {
    let (client, link) = connected_client().await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(link.sent_commands(), vec![("ping".to_string(), None)]);

    link.push(&json!({"type": "pong"}));
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(client.get_state(), ConnectionState::Connected);
    client.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_protocol_errors() {
    let (client, link) = connected_client().await;
    let errors = record(&client, EventKind::Error);

    let received = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&received);
    let _handle = client.subscribe("AAPL", move |payload| {
        sink.lock().push(payload.clone());
        Ok(())
    });
    settle().await;

    link.push_raw("not json");
    link.push_raw("[1, 2, 3]");
    link.push(&json!({"type": "mystery"}));
    link.push(&json!({"type": "data", "data": {"missing": "channel"}}));
    link.push(&json!({"type": "data", "channel": "AAPL", "data": {"bid": 150.0}}));
    settle().await;

    let errors = errors.lock().clone();
    assert_eq!(errors.len(), 4);
    assert!(
        errors
            .iter()
            .all(|e| matches!(e, ClientEvent::Error(StreamError::Protocol(_))))
    );
    assert_eq!(*received.lock(), vec![json!({"bid": 150.0})]);
    assert_eq!(client.get_state(), ConnectionState::Connected);
    client.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn server_error_frames_are_reported() {
    let (client, link) = connected_client().await;
    let errors = record(&client, EventKind::Error);

    link.push(&json!({"type": "subscription_confirmed", "channel": "orders:user-1"}));
    link.push(&json!({"type": "error", "channel": "orders:user-1", "error": "not authorized"}));
    link.push(&json!({"type": "error"}));
    settle().await;

    assert_eq!(
        *errors.lock(),
        vec![
            ClientEvent::Error(StreamError::Feed {
                channel: Some("orders:user-1".to_string()),
                message: "not authorized".to_string(),
            }),
            ClientEvent::Error(StreamError::Feed {
                channel: None,
                message: "unspecified error".to_string(),
            }),
        ]
    );
    assert_eq!(client.get_state(), ConnectionState::Connected);
    client.teardown().await;
}
