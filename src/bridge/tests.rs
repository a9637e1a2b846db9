use std::time::Duration;

use futures_util::stream;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::{BridgeError, GATEWAY_NOT_RUNNING};
use crate::gateway::event::ClientChat;
use crate::gateway::{GatewayConnection, HandshakeError, authenticate};
use crate::test_support::{
    FakeGateway, chat_final, delta, health, lifecycle_end, refused_ws_url, settings_for,
};

use super::*;

fn done(run: &str) -> ClientNotice {
    ClientNotice::Done {
        run_id: Some(run.to_string()),
    }
}

fn delta_notice(run: &str, text: &str) -> ClientNotice {
    ClientNotice::Delta {
        content: text.to_string(),
        run_id: Some(run.to_string()),
    }
}

fn message(text: &str) -> ClientNotice {
    ClientNotice::Message {
        content: text.to_string(),
        role: "assistant".to_string(),
    }
}

/// Client input that stays open until the sender is dropped.
fn client_channel() -> (mpsc::Sender<String>, impl Stream<Item = String>) {
    let (tx, rx) = mpsc::channel::<String>(8);
    let input = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|m| (m, rx)) });
    (tx, input)
}

async fn next_notice(rx: &mut mpsc::Receiver<ClientNotice>) -> ClientNotice {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("notice in time")
        .expect("notice channel open")
}

#[test]
fn turn_tracker_lifecycle_then_final_emits_one_done() {
    let mut t = TurnTracker::new();
    t.begin();
    t.observe(Some("r1"));
    assert!(t.close(Some("r1")));
    assert!(!t.close(Some("r1")));
    assert!(!t.is_open());
}

#[test]
fn turn_tracker_final_without_run_id_then_lifecycle() {
    let mut t = TurnTracker::new();
    t.begin();
    assert!(t.close(None));
    assert!(!t.close(Some("r9")));
    // The next turn closes normally.
    t.begin();
    t.observe(Some("r10"));
    assert!(t.close(Some("r10")));
}

#[test]
fn turn_tracker_inherits_run_id_from_activity() {
    let mut t = TurnTracker::new();
    t.observe(Some("r1"));
    assert!(t.close(None));
    assert!(!t.close(Some("r1")));
    // A late delta for the closed run does not reopen it.
    t.observe(Some("r1"));
    assert!(!t.close(None));
}

#[test]
fn translate_covers_both_termination_orders() {
    let lifecycle = GatewayEvent::LifecycleEnd {
        run_id: Some("r1".into()),
    };
    let fin = GatewayEvent::ChatFinal {
        run_id: Some("r1".into()),
        text: "Hello".into(),
    };

    let mut t = TurnTracker::new();
    t.begin();
    let mut out = translate(&lifecycle, &mut t);
    out.extend(translate(&fin, &mut t));
    assert_eq!(out, vec![done("r1"), message("Hello")]);

    let mut t = TurnTracker::new();
    t.begin();
    let mut out = translate(&fin, &mut t);
    out.extend(translate(&lifecycle, &mut t));
    assert_eq!(out, vec![message("Hello"), done("r1")]);
}

#[test]
fn empty_final_still_ends_turn() {
    let mut t = TurnTracker::new();
    t.begin();
    let out = translate(
        &GatewayEvent::ChatFinal {
            run_id: Some("r1".into()),
            text: String::new(),
        },
        &mut t,
    );
    assert_eq!(out, vec![done("r1")]);
    assert!(translate(&GatewayEvent::Health, &mut t).is_empty());
}

#[test]
fn notices_serialize_to_client_protocol() {
    assert_eq!(
        serde_json::to_value(delta_notice("r1", "Hi")).unwrap(),
        json!({"type":"delta","content":"Hi","runId":"r1"})
    );
    assert_eq!(
        serde_json::to_value(ClientNotice::ConnectionError {
            error: "x".into()
        })
        .unwrap(),
        json!({"type":"connection_error","error":"x"})
    );
    assert_eq!(
        serde_json::to_value(message("ok")).unwrap(),
        json!({"type":"message","content":"ok","role":"assistant"})
    );
}

#[tokio::test]
async fn handshake_rejects_non_challenge_without_sending_connect() {
    let fake = FakeGateway::accepting(Vec::new()).opening_with(Some(health()));
    let url = fake.spawn();
    let settings = settings_for(&url);

    let mut conn = GatewayConnection::connect(&settings.endpoint)
        .await
        .expect("connect");
    let err = authenticate(&mut conn, Some("t"), &settings.client, settings.handshake_timeout)
        .await
        .expect_err("must fail");
    assert_eq!(err, HandshakeError::UnexpectedFirstMessage("health".into()));
    conn.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fake.methods_seen().is_empty());
}

#[tokio::test]
async fn handshake_times_out_on_silence() {
    let fake = FakeGateway::accepting(Vec::new()).opening_with(None);
    let url = fake.spawn();
    let settings = settings_for(&url);

    let mut conn = GatewayConnection::connect(&settings.endpoint)
        .await
        .expect("connect");
    let err = authenticate(&mut conn, None, &settings.client, Duration::from_millis(150))
        .await
        .expect_err("must time out");
    assert_eq!(err, HandshakeError::Timeout);
    assert!(fake.methods_seen().is_empty());
}

#[tokio::test]
async fn handshake_sends_operator_connect_with_origin() {
    let fake = FakeGateway::accepting(Vec::new());
    let url = fake.spawn();
    let settings = settings_for(&url);

    let mut conn = GatewayConnection::connect(&settings.endpoint)
        .await
        .expect("connect");
    authenticate(&mut conn, Some("secret"), &settings.client, settings.handshake_timeout)
        .await
        .expect("handshake ok");
    conn.close().await;

    let connects = fake.requests_for("connect");
    assert_eq!(connects.len(), 1);
    let params = &connects[0]["params"];
    assert_eq!(params["auth"]["token"], "secret");
    assert_eq!(params["role"], "operator");
    assert_eq!(params["scopes"], json!(["operator.admin"]));
    assert_eq!(
        fake.origin.lock().unwrap().as_deref(),
        Some("http://localhost:8765")
    );
}

#[tokio::test]
async fn rejected_connect_maps_to_handshake_failure() {
    let fake = FakeGateway::rejecting();
    let url = fake.spawn();
    let err = one_shot(&settings_for(&url), "main", "hi")
        .await
        .expect_err("rejected");
    assert!(matches!(
        err,
        BridgeError::Handshake(HandshakeError::Rejected(ref m)) if m == "invalid token"
    ));
    assert_eq!(err.code(), "handshake_failed");
    assert!(fake.requests_for("chat.send").is_empty());
}

#[tokio::test]
async fn one_shot_accumulates_deltas_until_lifecycle_end() {
    let fake = FakeGateway::accepting(vec![
        health(),
        delta("r1", "Hel"),
        json!("{not json"),
        delta("r1", "lo"),
        lifecycle_end("r1"),
        delta("r1", " ignored"),
    ]);
    let url = fake.spawn();
    let reply = one_shot(&settings_for(&url), "s-42", "  hi  ")
        .await
        .expect("reply");
    assert_eq!(reply, "Hello");

    let sends = fake.requests_for("chat.send");
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["params"]["sessionKey"], "s-42");
    assert_eq!(sends[0]["params"]["message"], "hi");
    assert_eq!(sends[0]["params"]["deliver"], false);
}

#[tokio::test]
async fn one_shot_final_text_replaces_deltas() {
    let fake = FakeGateway::accepting(vec![
        delta("r1", "draft"),
        chat_final("r1", "Hello world"),
    ]);
    let url = fake.spawn();
    let reply = one_shot(&settings_for(&url), "main", "hi")
        .await
        .expect("reply");
    assert_eq!(reply, "Hello world");
}

#[tokio::test]
async fn one_shot_without_text_is_no_response() {
    let fake = FakeGateway::accepting(vec![lifecycle_end("r1")]);
    let url = fake.spawn();
    let err = one_shot(&settings_for(&url), "main", "hi")
        .await
        .expect_err("no text");
    assert!(matches!(err, BridgeError::NoResponse));

    // Silence until the receive timeout counts the same way.
    let quiet = FakeGateway::accepting(Vec::new());
    let url = quiet.spawn();
    let mut settings = settings_for(&url);
    settings.receive_timeout = Duration::from_millis(100);
    let err = one_shot(&settings, "main", "hi").await.expect_err("no text");
    assert!(matches!(err, BridgeError::NoResponse));
}

#[tokio::test]
async fn empty_input_is_rejected_before_connecting() {
    let settings = settings_for("ws://10.255.255.1:9/");
    let started = std::time::Instant::now();
    let err = one_shot(&settings, "main", "   ").await.expect_err("empty");
    assert!(matches!(err, BridgeError::EmptyInput));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn refused_connection_is_upstream_unavailable() {
    let settings = settings_for(&refused_ws_url());
    let err = one_shot(&settings, "main", "hi").await.expect_err("refused");
    assert!(matches!(err, BridgeError::UpstreamUnavailable(_)));
    assert_eq!(err.client_message(), GATEWAY_NOT_RUNNING);
}

#[tokio::test]
async fn interactive_reports_connection_error_to_client() {
    let settings = settings_for(&refused_ws_url());
    let (notice_tx, mut notice_rx) = mpsc::channel(8);
    let result = run_interactive(&settings, stream::empty::<String>(), notice_tx).await;
    assert!(matches!(result, Err(BridgeError::UpstreamUnavailable(_))));
    assert_eq!(
        next_notice(&mut notice_rx).await,
        ClientNotice::ConnectionError {
            error: GATEWAY_NOT_RUNNING.to_string()
        }
    );
}

#[tokio::test]
async fn interactive_bridge_forwards_one_turn() {
    let fake = FakeGateway::accepting(vec![
        health(),
        delta("r1", "Hel"),
        delta("r1", "lo"),
        lifecycle_end("r1"),
        chat_final("r1", "Hello"),
    ]);
    let url = fake.spawn();
    let settings = settings_for(&url);
    let (client_tx, client_input) = client_channel();
    let (notice_tx, mut notice_rx) = mpsc::channel(32);

    let bridge = tokio::spawn(async move {
        run_interactive(&settings, client_input, notice_tx).await
    });

    assert_eq!(
        next_notice(&mut notice_rx).await,
        ClientNotice::System {
            content: CONNECTED_NOTICE.to_string()
        }
    );
    client_tx
        .send(r#"{"content":"   "}"#.to_string())
        .await
        .expect("client send");
    client_tx
        .send(r#"{"content":"hi","sessionKey":"desk"}"#.to_string())
        .await
        .expect("client send");

    let mut got = Vec::new();
    for _ in 0..4 {
        got.push(next_notice(&mut notice_rx).await);
    }
    assert_eq!(
        got,
        vec![
            delta_notice("r1", "Hel"),
            delta_notice("r1", "lo"),
            done("r1"),
            message("Hello"),
        ]
    );

    // Client leaves: the bridge tears down the gateway side and returns.
    drop(client_tx);
    let summary = tokio::time::timeout(Duration::from_secs(3), bridge)
        .await
        .expect("bridge ends")
        .expect("join")
        .expect("bridge ok");
    assert_eq!(summary.closed_by, ClosedBy::Client);
    assert_eq!(summary.messages_sent, 1);
    assert_eq!(summary.turns_completed, 1);
    assert_eq!(summary.session_key.as_deref(), Some("desk"));

    let sends = fake.requests_for("chat.send");
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["params"]["sessionKey"], "desk");
}

#[tokio::test]
async fn stream_exchange_emits_frames_until_turn_ends() {
    let other = json!({"type":"event","event":"presence","payload":{"who":"x"}});
    let fake = FakeGateway::accepting(vec![
        delta("r1", "Hi"),
        other.clone(),
        chat_final("r1", "Hi there"),
        lifecycle_end("r1"),
    ]);
    let url = fake.spawn();
    let settings = settings_for(&url);
    let (tx, mut rx) = mpsc::channel(32);
    let chat = ClientChat {
        session_key: "main".into(),
        text: "hello".into(),
    };

    let summary = run_stream(&settings, &chat, tx).await.expect("stream ok");
    assert!(summary.completed);
    assert_eq!(summary.response_chars, "Hi there".len());

    let mut names = Vec::new();
    while let Some(frame) = rx.recv().await {
        if let StreamFrame::Gateway(v) = &frame
            && v.get("type").and_then(Value::as_str) == Some("event")
        {
            assert_eq!(v, &other);
        }
        names.push(frame.event_name());
    }
    assert_eq!(names, vec!["gateway", "delta", "gateway", "message", "done"]);
}

#[tokio::test]
async fn stream_exchange_reports_unavailable_gateway_as_error_frame() {
    let settings = settings_for(&refused_ws_url());
    let (tx, mut rx) = mpsc::channel(4);
    let chat = ClientChat {
        session_key: "main".into(),
        text: "hello".into(),
    };
    let err = run_stream(&settings, &chat, tx).await.expect_err("refused");
    assert_eq!(err.code(), "gateway_unavailable");
    let frame = rx.recv().await.expect("error frame");
    assert_eq!(frame.event_name(), "error");
    assert!(frame.data().contains("gateway_unavailable"));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn stream_exchange_stops_when_consumer_leaves_mid_turn() {
    // Only heartbeats after the ack: nothing the consumer would ever be sent.
    let fake = FakeGateway::accepting(vec![health(), health(), health()]);
    let url = fake.spawn();
    let mut settings = settings_for(&url);
    settings.receive_timeout = Duration::from_secs(5);
    let (tx, mut rx) = mpsc::channel(32);
    let chat = ClientChat {
        session_key: "main".into(),
        text: "hello".into(),
    };

    let exchange = tokio::spawn(async move { run_stream(&settings, &chat, tx).await });
    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("first frame in time")
        .expect("first frame");
    assert_eq!(first.event_name(), "gateway");
    drop(rx);

    let summary = tokio::time::timeout(Duration::from_secs(2), exchange)
        .await
        .expect("exchange ends well before the receive timeout")
        .expect("join")
        .expect("stream ok");
    assert!(!summary.completed);
    assert!(fake.wait_disconnected(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn interactive_client_leaving_closes_gateway_socket() {
    let fake = FakeGateway::accepting(Vec::new());
    let url = fake.spawn();
    let settings = settings_for(&url);
    let (client_tx, client_input) = client_channel();
    let (notice_tx, mut notice_rx) = mpsc::channel(8);

    let bridge = tokio::spawn(async move {
        run_interactive(&settings, client_input, notice_tx).await
    });
    assert!(matches!(
        next_notice(&mut notice_rx).await,
        ClientNotice::System { .. }
    ));
    assert!(!fake.disconnected.load(std::sync::atomic::Ordering::SeqCst));

    // The downstream half is parked on a receive when the client goes away.
    drop(client_tx);
    let summary = tokio::time::timeout(Duration::from_secs(2), bridge)
        .await
        .expect("bridge ends")
        .expect("join")
        .expect("bridge ok");
    assert_eq!(summary.closed_by, ClosedBy::Client);
    assert_eq!(summary.session_key, None);
    assert!(fake.wait_disconnected(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn interactive_gateway_hang_up_is_reported_as_gateway_close() {
    let fake = FakeGateway::accepting(Vec::new()).hanging_up();
    let url = fake.spawn();
    let settings = settings_for(&url);
    let (client_tx, client_input) = client_channel();
    let (notice_tx, mut notice_rx) = mpsc::channel(8);

    let bridge = tokio::spawn(async move {
        run_interactive(&settings, client_input, notice_tx).await
    });
    assert!(matches!(
        next_notice(&mut notice_rx).await,
        ClientNotice::System { .. }
    ));
    let _ = client_tx.send(r#"{"content":"hi"}"#.to_string()).await;

    let summary = tokio::time::timeout(Duration::from_secs(2), bridge)
        .await
        .expect("bridge ends")
        .expect("join")
        .expect("bridge ok");
    assert_eq!(summary.closed_by, ClosedBy::Gateway);
    drop(client_tx);
}
