//! Integration tests for the shadow client
//!
//! Runs the full engine against the in-memory transport: the test plays the
//! cloud by injecting replies and deltas, and asserts on what the engine
//! publishes and delivers to callbacks.

use device_shadow::testing::MockTransport;
use device_shadow::{
    DeltaRejection, SessionState, ShadowAck, ShadowAction, ShadowClient, ShadowConfig,
    TransportEvent,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

fn test_config() -> ShadowConfig {
    ShadowConfig::new("mqtt://localhost:1883")
}

async fn ready_client(device_name: &str) -> (ShadowClient<MockTransport>, MockTransport) {
    ready_client_with(device_name, test_config()).await
}

async fn ready_client_with(
    device_name: &str,
    config: ShadowConfig,
) -> (ShadowClient<MockTransport>, MockTransport) {
    let mock = MockTransport::new();
    let client = ShadowClient::with_transport(device_name, config, mock.clone())
        .await
        .expect("client creation should succeed");
    client.connect().await.expect("connect should succeed");
    (client, mock)
}

/// Pull the request id out of the most recent publish.
fn last_request_id(mock: &MockTransport) -> String {
    let published = mock.published();
    let (_, payload) = published.last().expect("nothing published");
    let body: Value = serde_json::from_slice(payload).unwrap();
    body["requestId"].as_str().expect("no requestId").to_string()
}

async fn wait_until_ready(client: &ShadowClient<MockTransport>) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !client.is_ready() {
        assert!(Instant::now() < deadline, "session never became ready");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_happy_update() {
    let (client, mock) = ready_client("dev1").await;

    let (tx, rx) = oneshot::channel();
    client
        .update(json!({"power": "on"}), 5, move |action, ack| {
            let _ = tx.send((action, ack));
        })
        .await
        .unwrap();

    // The request went out on the update topic with the reported state.
    let published = mock.published();
    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(topic, "baidu/iot/shadow/dev1/update");
    let body: Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(body["reported"], json!({"power": "on"}));

    // The cloud accepts.
    let request_id = last_request_id(&mock);
    let reply = json!({"requestId": request_id, "reported": {"power": "on"}});
    mock.inject_message(
        "baidu/iot/shadow/dev1/update/accepted",
        serde_json::to_vec(&reply).unwrap(),
    )
    .await;

    let (action, ack) = rx.await.unwrap();
    assert_eq!(action, ShadowAction::Update);
    match ack {
        ShadowAck::Accepted { document } => assert_eq!(document, reply),
        other => panic!("expected accepted, got {other:?}"),
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_rejected_get() {
    let (client, mock) = ready_client("dev2").await;

    let (tx, rx) = oneshot::channel();
    client
        .get(5, move |action, ack| {
            let _ = tx.send((action, ack));
        })
        .await
        .unwrap();

    let request_id = last_request_id(&mock);
    let reply = json!({
        "requestId": request_id,
        "code": "E_NOT_FOUND",
        "message": "no shadow"
    });
    mock.inject_message(
        "baidu/iot/shadow/dev2/get/rejected",
        serde_json::to_vec(&reply).unwrap(),
    )
    .await;

    let (action, ack) = rx.await.unwrap();
    assert_eq!(action, ShadowAction::Get);
    assert_eq!(
        ack,
        ShadowAck::Rejected {
            code: "E_NOT_FOUND".to_string(),
            message: "no shadow".to_string()
        }
    );
}

#[tokio::test]
async fn test_delete_round_trip() {
    let (client, mock) = ready_client("dev3").await;

    let (tx, rx) = oneshot::channel();
    client
        .delete(5, move |action, ack| {
            let _ = tx.send((action, ack));
        })
        .await
        .unwrap();

    let published = mock.published();
    assert_eq!(published[0].0, "baidu/iot/shadow/dev3/delete");

    let request_id = last_request_id(&mock);
    mock.inject_message(
        "baidu/iot/shadow/dev3/delete/accepted",
        serde_json::to_vec(&json!({"requestId": request_id})).unwrap(),
    )
    .await;

    let (action, ack) = rx.await.unwrap();
    assert_eq!(action, ShadowAction::Delete);
    assert!(matches!(ack, ShadowAck::Accepted { .. }));
}

#[tokio::test]
async fn test_silent_broker_times_out() {
    let (client, _mock) = ready_client("dev4").await;

    let (tx, rx) = oneshot::channel();
    let published_at = Instant::now();
    client
        .update(json!({"power": "on"}), 1, move |action, ack| {
            let _ = tx.send((action, ack));
        })
        .await
        .unwrap();

    // No reply ever arrives; the reaper must deliver a timeout. Deadline
    // resolution is the 1 s reaper tick, so a 1 s timeout lands in 1..2 s.
    let (action, ack) = tokio::time::timeout(Duration::from_secs(4), rx)
        .await
        .expect("timeout callback never fired")
        .unwrap();

    let elapsed = published_at.elapsed();
    assert_eq!(action, ShadowAction::Update);
    assert_eq!(ack, ShadowAck::Timeout);
    assert!(elapsed >= Duration::from_secs(1), "fired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "fired too late: {elapsed:?}");
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_failed_publish_still_times_out() {
    let (client, mock) = ready_client("dev5").await;
    mock.fail_publishes();

    let (tx, rx) = oneshot::channel();
    client
        .update(json!({"power": "on"}), 1, move |_, ack| {
            let _ = tx.send(ack);
        })
        .await
        .expect("a failed publish is not a synchronous error");

    // The entry stays in flight and resolves through the reaper.
    assert_eq!(client.pending_requests(), 1);
    let ack = tokio::time::timeout(Duration::from_secs(4), rx)
        .await
        .expect("timeout callback never fired")
        .unwrap();
    assert_eq!(ack, ShadowAck::Timeout);
}

#[tokio::test]
async fn test_keyed_delta_handler() {
    let (client, mock) = ready_client("dev6").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .register_delta(Some("brightness"), move |key, value| {
            tx.send((key.map(str::to_string), value.clone())).ok();
            Ok(())
        })
        .unwrap();

    let delta = json!({
        "requestId": "d-1",
        "desired": {"brightness": 80, "color": "red"}
    });
    mock.inject_message(
        "baidu/iot/shadow/dev6/delta",
        serde_json::to_vec(&delta).unwrap(),
    )
    .await;

    let (key, value) = rx.recv().await.unwrap();
    assert_eq!(key.as_deref(), Some("brightness"));
    assert_eq!(value, json!(80));

    // Only the matching property was delivered.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_delta_handlers_run_in_registration_order() {
    let (client, mock) = ready_client("dev7").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for name in ["first", "second"] {
        let tx = tx.clone();
        client
            .register_delta(None, move |_, _| {
                tx.send(name).ok();
                Ok(())
            })
            .unwrap();
    }

    mock.inject_message(
        "baidu/iot/shadow/dev7/delta",
        serde_json::to_vec(&json!({"requestId": "d-2", "desired": {}})).unwrap(),
    )
    .await;

    assert_eq!(rx.recv().await, Some("first"));
    assert_eq!(rx.recv().await, Some("second"));
}

#[tokio::test]
async fn test_delta_rejection_reaches_the_cloud() {
    let (client, mock) = ready_client("dev8").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .register_delta(None, |_, _| {
            Err(DeltaRejection::new("E_RANGE", "out of range"))
        })
        .unwrap();
    // Registered after the failing handler: must never run.
    client
        .register_delta(None, move |_, _| {
            tx.send(()).ok();
            Ok(())
        })
        .unwrap();

    mock.inject_message(
        "baidu/iot/shadow/dev8/delta",
        serde_json::to_vec(&json!({"requestId": "d-3", "desired": {"brightness": 300}})).unwrap(),
    )
    .await;

    // The rejection goes out on delta/rejected with the delta's request id.
    let deadline = Instant::now() + Duration::from_secs(2);
    let rejection = loop {
        if let Some(entry) = mock
            .published()
            .iter()
            .find(|(topic, _)| topic == "baidu/iot/shadow/dev8/delta/rejected")
            .cloned()
        {
            break entry;
        }
        assert!(Instant::now() < deadline, "delta rejection never published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let body: Value = serde_json::from_slice(&rejection.1).unwrap();
    assert_eq!(
        body,
        json!({"requestId": "d-3", "code": "E_RANGE", "message": "out of range"})
    );
    assert!(rx.try_recv().is_err(), "short-circuited handler ran");
}

#[tokio::test]
async fn test_in_flight_overflow() {
    let mut config = test_config();
    config.max_in_flight_messages = 2;
    let (client, mock) = ready_client_with("dev9", config).await;

    for _ in 0..2 {
        client
            .update(json!({"power": "on"}), 60, |_, _| {})
            .await
            .unwrap();
    }
    assert_eq!(client.pending_requests(), 2);
    assert_eq!(mock.published().len(), 2);

    let overflow = client.update(json!({"power": "off"}), 60, |_, _| {}).await;
    assert!(matches!(
        overflow,
        Err(device_shadow::ShadowError::TooManyInFlightMessages { capacity: 2 })
    ));
    // Nothing extra went out.
    assert_eq!(mock.published().len(), 2);
}

#[tokio::test]
async fn test_replies_do_not_cross_requests() {
    let (client, mock) = ready_client("dev10").await;

    let (tx_a, rx_a) = oneshot::channel();
    client
        .update(json!({"a": 1}), 30, move |_, ack| {
            let _ = tx_a.send(ack);
        })
        .await
        .unwrap();
    let id_a = last_request_id(&mock);

    let (tx_b, mut rx_b) = oneshot::channel();
    client
        .update(json!({"b": 2}), 30, move |_, ack| {
            let _ = tx_b.send(ack);
        })
        .await
        .unwrap();

    // Answer only the first request.
    mock.inject_message(
        "baidu/iot/shadow/dev10/update/accepted",
        serde_json::to_vec(&json!({"requestId": id_a})).unwrap(),
    )
    .await;

    assert!(matches!(
        rx_a.await.unwrap(),
        ShadowAck::Accepted { .. }
    ));
    assert!(rx_b.try_recv().is_err(), "wrong request completed");
    assert_eq!(client.pending_requests(), 1);
}

#[tokio::test]
async fn test_unknown_topic_and_unmatched_reply_are_dropped() {
    let (client, mock) = ready_client("dev11").await;

    mock.inject_message(
        "baidu/iot/shadow/other-device/update/accepted",
        serde_json::to_vec(&json!({"requestId": "x"})).unwrap(),
    )
    .await;
    mock.inject_message(
        "baidu/iot/shadow/dev11/update/accepted",
        serde_json::to_vec(&json!({"requestId": "never-sent"})).unwrap(),
    )
    .await;

    // Engine is unaffected.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.is_ready());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_connection_loss_and_reconnect() {
    let (client, mock) = ready_client("dev12").await;

    // A request in flight when the connection drops.
    let (tx, rx) = oneshot::channel();
    client
        .update(json!({"power": "on"}), 30, move |_, ack| {
            let _ = tx.send(ack);
        })
        .await
        .unwrap();
    let request_id = last_request_id(&mock);

    mock.inject(TransportEvent::ConnectionLost {
        reason: "broker went away".to_string(),
    })
    .await;

    // Down: operations are refused, the in-flight entry survives.
    let deadline = Instant::now() + Duration::from_secs(2);
    while client.state() != SessionState::Down {
        assert!(Instant::now() < deadline, "session never went down");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let refused = client.get(5, |_, _| {}).await;
    assert!(matches!(
        refused,
        Err(device_shadow::ShadowError::NotConnected)
    ));
    assert_eq!(client.pending_requests(), 1);

    // Reconnect: the subscription set is re-established before ready.
    mock.inject(TransportEvent::Connected).await;
    wait_until_ready(&client).await;
    assert_eq!(mock.subscriptions().len(), 14);

    // The late reply is still honored.
    mock.inject_message(
        "baidu/iot/shadow/dev12/update/accepted",
        serde_json::to_vec(&json!({"requestId": request_id})).unwrap(),
    )
    .await;
    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap(),
        ShadowAck::Accepted { .. }
    ));
}

#[tokio::test]
async fn test_disconnect_stops_the_client() {
    let (mut client, mock) = ready_client("dev13").await;

    client
        .update(json!({"power": "on"}), 60, |_, _| {
            panic!("no callback may fire after disconnect");
        })
        .await
        .unwrap();

    client.disconnect().await.unwrap();
    assert!(mock.is_disconnected());
    assert!(!client.is_ready());

    // Give a stray reply a chance to misfire; it must not.
    tokio::time::sleep(Duration::from_millis(100)).await;
}
