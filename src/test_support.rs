//! Fake OpenClaw gateway for async tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use serde_json::{Value, json};

use crate::bridge::BridgeSettings;
use crate::gateway::{ClientDescriptor, GatewayEndpoint};

pub fn spawn_axum_server(app: Router) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    listener.set_nonblocking(true).expect("nonblocking");
    let listener = tokio::net::TcpListener::from_std(listener).expect("to tokio listener");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, handle)
}

/// Scripted gateway: sends `opening` on connect, answers `connect` with `accept`, and replays
/// `replies` after every `chat.send`. With `hang_up` set it closes right after accepting.
#[derive(Clone)]
pub struct FakeGateway {
    pub opening: Option<Value>,
    pub accept: bool,
    pub replies: Vec<Value>,
    pub hang_up: bool,
    pub seen: Arc<Mutex<Vec<Value>>>,
    pub origin: Arc<Mutex<Option<String>>>,
    /// Set once the server side of the socket is gone.
    pub disconnected: Arc<AtomicBool>,
}

impl FakeGateway {
    pub fn accepting(replies: Vec<Value>) -> Self {
        Self {
            opening: Some(json!({
                "type": "event",
                "event": "connect.challenge",
                "payload": { "nonce": "n1", "ts": 0 }
            })),
            accept: true,
            replies,
            hang_up: false,
            seen: Arc::new(Mutex::new(Vec::new())),
            origin: Arc::new(Mutex::new(None)),
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            ..Self::accepting(Vec::new())
        }
    }

    pub fn opening_with(mut self, opening: Option<Value>) -> Self {
        self.opening = opening;
        self
    }

    pub fn hanging_up(mut self) -> Self {
        self.hang_up = true;
        self
    }

    /// Polls until the fake's socket is gone or `within` elapses.
    pub async fn wait_disconnected(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.disconnected.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn methods_seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .filter_map(|v| v.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .filter(|v| v.get("method").and_then(Value::as_str) == Some(method))
            .cloned()
            .collect()
    }

    /// Returns the `ws://` url of the running fake.
    pub fn spawn(&self) -> String {
        let app = Router::new()
            .route("/", get(upgrade))
            .with_state(self.clone());
        let (addr, _handle) = spawn_axum_server(app);
        format!("ws://{addr}/")
    }

    async fn serve(self, socket: WebSocket) {
        let disconnected = self.disconnected.clone();
        self.converse(socket).await;
        disconnected.store(true, Ordering::SeqCst);
    }

    async fn converse(self, mut socket: WebSocket) {
        if let Some(opening) = &self.opening
            && socket
                .send(Message::Text(opening.to_string().into()))
                .await
                .is_err()
        {
            return;
        }
        while let Some(Ok(msg)) = socket.recv().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                continue;
            };
            self.seen.lock().expect("seen lock").push(value.clone());
            let id = value.get("id").cloned().unwrap_or(Value::Null);
            match value.get("method").and_then(Value::as_str) {
                Some("connect") => {
                    let reply = if self.accept {
                        json!({ "type": "res", "id": id, "ok": true, "payload": { "protocol": 3 } })
                    } else {
                        json!({ "type": "res", "id": id, "ok": false, "error": { "code": "UNAUTHORIZED", "message": "invalid token" } })
                    };
                    if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                    if self.accept && self.hang_up {
                        let _ = socket.send(Message::Close(None)).await;
                        return;
                    }
                }
                Some("chat.send") => {
                    let ack = json!({ "type": "res", "id": id, "ok": true, "payload": { "status": "accepted" } });
                    if socket.send(Message::Text(ack.to_string().into())).await.is_err() {
                        return;
                    }
                    for frame in &self.replies {
                        let text = match frame {
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(fake): State<FakeGateway>,
) -> Response {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *fake.origin.lock().expect("origin lock") = origin;
    ws.on_upgrade(move |socket| fake.serve(socket))
}

pub fn settings_for(ws_url: &str) -> BridgeSettings {
    BridgeSettings {
        endpoint: GatewayEndpoint {
            ws_url: ws_url.to_string(),
            origin: Some("http://localhost:8765".to_string()),
            connect_timeout: Duration::from_secs(2),
        },
        client: ClientDescriptor::default(),
        token: Some("test-token".to_string()),
        handshake_timeout: Duration::from_millis(500),
        receive_timeout: Duration::from_millis(500),
        max_receive_attempts: 50,
    }
}

/// A loopback port with nothing listening on it.
pub fn refused_ws_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    drop(listener);
    format!("ws://{addr}/")
}

pub fn delta(run_id: &str, text: &str) -> Value {
    json!({ "type": "event", "event": "agent", "payload": { "runId": run_id, "stream": "assistant", "data": { "delta": text } } })
}

pub fn lifecycle_end(run_id: &str) -> Value {
    json!({ "type": "event", "event": "agent", "payload": { "runId": run_id, "stream": "lifecycle", "data": { "phase": "end" } } })
}

pub fn chat_final(run_id: &str, text: &str) -> Value {
    json!({ "type": "event", "event": "chat", "payload": { "runId": run_id, "state": "final", "message": { "role": "assistant", "content": [ { "type": "text", "text": text } ] } } })
}

pub fn health() -> Value {
    json!({ "type": "event", "event": "health", "payload": { "ok": true } })
}
