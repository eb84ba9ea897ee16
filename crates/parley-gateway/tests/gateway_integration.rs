#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures_util::{SinkExt, StreamExt};
use parley_core::{
    BridgeConfig, CollectOutcome, CollectRequest, FeedbackCollector, SessionId,
};
use parley_gateway::{FeedbackBridge, GatewayServer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: build a test server on a random port, returning the address.
async fn start_test_server(config: BridgeConfig) -> (String, Arc<FeedbackBridge>) {
    let bridge = FeedbackBridge::new(config);
    let app = GatewayServer::build(bridge.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let addr_str = format!("127.0.0.1:{}", addr.port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Small yield to let the server task start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr_str, bridge)
}

fn multi_shot() -> BridgeConfig {
    BridgeConfig {
        single_shot: false,
        ..BridgeConfig::default()
    }
}

async fn connect(addr: &str, session: &str, last_seen: u64) -> Ws {
    let url = format!("ws://{addr}/ws/{session}?last_seen={last_seen}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

/// Next frame within a generous bound.
async fn next_frame(ws: &mut Ws) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("frame within 5s")
        .expect("stream open")
        .expect("frame ok")
}

async fn next_envelope(ws: &mut Ws) -> serde_json::Value {
    match next_frame(ws).await {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn next_close_code(ws: &mut Ws) -> u16 {
    match next_frame(ws).await {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected close frame, got {other:?}"),
    }
}

fn feedback_frame(draft: &str, text: &str) -> Message {
    Message::Text(
        serde_json::json!({
            "type": "user_feedback",
            "payload": {"draft_id": draft, "text": text, "attachments": []},
        })
        .to_string(),
    )
}

async fn wait_for_waiter(bridge: &FeedbackBridge) {
    while bridge.waiting_count().await == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _bridge) = start_test_server(BridgeConfig::default()).await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "parley");
}

#[tokio::test]
async fn test_summary_reply_complete_round_trip() {
    let (addr, bridge) = start_test_server(BridgeConfig::default()).await;

    let b = bridge.clone();
    let waiting = tokio::spawn(async move {
        b.collect_feedback(
            CollectRequest::new("build finished", Duration::from_secs(10)).with_session("s1"),
        )
        .await
    });
    wait_for_waiter(&bridge).await;

    let mut ws = connect(&addr, "s1", 0).await;
    let summary = next_envelope(&mut ws).await;
    assert_eq!(summary["type"], "agent_message");
    assert_eq!(summary["sequence"], 1);
    assert_eq!(summary["payload"]["content"], "build finished");

    ws.send(feedback_frame("d1", "looks good")).await.unwrap();

    let ack = next_envelope(&mut ws).await;
    assert_eq!(ack["type"], "feedback_received");
    assert_eq!(ack["sequence"], 2);
    let done = next_envelope(&mut ws).await;
    assert_eq!(done["type"], "session_complete");
    assert_eq!(done["sequence"], 3);
    assert_eq!(next_close_code(&mut ws).await, 1000);

    match waiting.await.unwrap().unwrap() {
        CollectOutcome::Feedback(result) => {
            assert_eq!(result.text, "looks good");
            assert_eq!(result.session_id.as_str(), "s1");
        }
        other => panic!("expected feedback, got {other:?}"),
    }

    // A late transport is refused.
    let mut late = connect(&addr, "s1", 0).await;
    assert_eq!(next_close_code(&mut late).await, 4409);
}

#[tokio::test]
async fn test_reconnect_replays_only_unseen() {
    let (addr, bridge) = start_test_server(multi_shot()).await;

    let mut ws = connect(&addr, "resume", 0).await;
    bridge
        .collect_feedback(
            CollectRequest::new("first", Duration::from_secs(30))
                .with_session("resume")
                .fire_and_forget(),
        )
        .await
        .unwrap();
    assert_eq!(next_envelope(&mut ws).await["sequence"], 1);

    ws.send(feedback_frame("d1", "noted")).await.unwrap();
    assert_eq!(next_envelope(&mut ws).await["sequence"], 2);
    drop(ws);

    // Queued while disconnected; replaces the first summary.
    bridge
        .collect_feedback(
            CollectRequest::new("second", Duration::from_secs(30))
                .with_session("resume")
                .fire_and_forget(),
        )
        .await
        .unwrap();

    let mut ws = connect(&addr, "resume", 2).await;
    let env = next_envelope(&mut ws).await;
    assert_eq!(env["sequence"], 3);
    assert_eq!(env["payload"]["content"], "second");

    // Nothing else is pending for this transport.
    let quiet = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn test_second_transport_supersedes_first() {
    let (addr, bridge) = start_test_server(multi_shot()).await;

    let mut first = connect(&addr, "twice", 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut second = connect(&addr, "twice", 0).await;

    assert_eq!(next_close_code(&mut first).await, 4001);

    bridge
        .collect_feedback(
            CollectRequest::new("hello", Duration::from_secs(30))
                .with_session("twice")
                .fire_and_forget(),
        )
        .await
        .unwrap();
    assert_eq!(next_envelope(&mut second).await["type"], "agent_message");
}

#[tokio::test]
async fn test_timeout_then_session_expired() {
    let (addr, bridge) = start_test_server(BridgeConfig::default()).await;

    let started = Instant::now();
    let outcome = bridge
        .collect_feedback(
            CollectRequest::new("anyone?", Duration::from_secs(2)).with_session("quiet"),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(outcome, CollectOutcome::Timeout { .. }));
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2500), "{elapsed:?}");

    let info: serde_json::Value = reqwest::get(format!("http://{addr}/api/session/quiet"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["status"], "EXPIRED");

    let mut ws = connect(&addr, "quiet", 0).await;
    assert_eq!(next_close_code(&mut ws).await, 4409);
}

#[tokio::test]
async fn test_http_feedback_completes_session() {
    let (addr, bridge) = start_test_server(BridgeConfig::default()).await;

    let b = bridge.clone();
    let waiting = tokio::spawn(async move {
        b.collect_feedback(
            CollectRequest::new("please review", Duration::from_secs(10)).with_session("web"),
        )
        .await
    });
    wait_for_waiter(&bridge).await;
    let mut ws = connect(&addr, "web", 0).await;
    assert_eq!(next_envelope(&mut ws).await["type"], "agent_message");

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/api/session/web/feedback"))
        .json(&serde_json::json!({
            "text": "  approved  ",
            "attachments": [
                {"name": "shot.png", "byte_size": 10, "mime_hint": "image/png", "content_handle": "h1"}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["completed"], true);

    assert_eq!(next_envelope(&mut ws).await["type"], "feedback_received");
    assert_eq!(next_envelope(&mut ws).await["type"], "session_complete");

    match waiting.await.unwrap().unwrap() {
        CollectOutcome::Feedback(result) => {
            assert_eq!(result.text, "approved");
            assert_eq!(result.image_count(), 1);
        }
        other => panic!("expected feedback, got {other:?}"),
    }

    let info: serde_json::Value = client
        .get(format!("http://{addr}/api/session/web"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["status"], "COMPLETE");
    assert_eq!(info["question"], "please review");
    assert_eq!(info["response"], "approved");
    assert_eq!(info["images_count"], 1);
    assert_eq!(info["files_count"], 0);

    // A second reply is refused.
    let resp = client
        .post(format!("http://{addr}/api/session/web/feedback"))
        .json(&serde_json::json!({"text": "again"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_http_feedback_rejects_empty_reply() {
    let (addr, _bridge) = start_test_server(multi_shot()).await;
    let _ws = connect(&addr, "blank", 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/session/blank/feedback"))
        .json(&serde_json::json!({"text": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_feedback");
}

#[tokio::test]
async fn test_duplicate_draft_acknowledged_once() {
    let (addr, _bridge) = start_test_server(multi_shot()).await;
    let mut ws = connect(&addr, "dedupe", 0).await;

    ws.send(feedback_frame("same", "hi")).await.unwrap();
    ws.send(feedback_frame("same", "hi")).await.unwrap();
    ws.send(feedback_frame("other", "there")).await.unwrap();

    let a = next_envelope(&mut ws).await;
    let b = next_envelope(&mut ws).await;
    assert_eq!(a["type"], "feedback_received");
    assert_eq!(b["type"], "feedback_received");
    assert_eq!(a["sequence"], 1);
    assert_eq!(b["sequence"], 2);

    let quiet = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn test_garbage_frame_gets_error_envelope() {
    let (addr, _bridge) = start_test_server(multi_shot()).await;
    let mut ws = connect(&addr, "noisy", 0).await;

    ws.send(Message::Text("just plain text".to_string()))
        .await
        .unwrap();
    let err = next_envelope(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["kind"], "protocol");

    // The transport stays usable.
    ws.send(feedback_frame("d1", "still here")).await.unwrap();
    assert_eq!(next_envelope(&mut ws).await["type"], "feedback_received");
}

#[tokio::test]
async fn test_invalid_session_id_rejected_before_upgrade() {
    let (addr, bridge) = start_test_server(BridgeConfig::default()).await;
    let long = "x".repeat(200);
    let url = format!("ws://{addr}/ws/{long}");
    let err = tokio_tungstenite::connect_async(&url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 400),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert!(bridge.store().is_empty().await);
}

#[tokio::test]
async fn test_sessions_do_not_interfere() {
    let (addr, bridge) = start_test_server(BridgeConfig::default()).await;
    let mut a = connect(&addr, "alpha", 0).await;
    let mut b = connect(&addr, "beta", 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    for (id, text) in [("alpha", "for a"), ("beta", "for b")] {
        bridge
            .collect_feedback(
                CollectRequest::new(text, Duration::from_secs(30))
                    .with_session(id)
                    .fire_and_forget(),
            )
            .await
            .unwrap();
    }
    assert_eq!(next_envelope(&mut a).await["payload"]["content"], "for a");
    assert_eq!(next_envelope(&mut b).await["payload"]["content"], "for b");
    assert!(bridge
        .connections()
        .is_connected(&SessionId::parse("alpha").unwrap())
        .await);
}
