//! Session bridge between dashboard clients and the OpenClaw gateway.
//!
//! Every exchange owns one gateway socket and walks `Handshaking -> Bridging -> Closed`.
//! Three front-ends share the same translation rules:
//!
//! - [`run_interactive`] forwards both directions until either side ends,
//! - [`one_shot`] sends one message and collects the reply into a string,
//! - [`run_stream`] sends one message and emits SSE-ready frames until the turn ends.

use std::pin::pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::DashConfig;
use crate::error::BridgeError;
use crate::gateway::event::chat_send_request;
use crate::gateway::{
    ClientChat, ClientDescriptor, GatewayConnection, GatewayEndpoint, GatewayEvent, GatewaySink,
    GatewayStream, WireError, authenticate, classify,
};

#[cfg(test)]
mod tests;

pub const CONNECTED_NOTICE: &str = "Connected to OpenClaw gateway";

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub endpoint: GatewayEndpoint,
    pub client: ClientDescriptor,
    pub token: Option<String>,
    pub handshake_timeout: Duration,
    pub receive_timeout: Duration,
    pub max_receive_attempts: u32,
}

impl BridgeSettings {
    pub fn from_config(cfg: &DashConfig) -> Self {
        let gw = &cfg.gateway;
        let (token, _source) = cfg.resolve_gateway_token();
        Self {
            endpoint: GatewayEndpoint {
                ws_url: gw.ws_url.clone(),
                origin: Some(gw.origin.clone()).filter(|o| !o.trim().is_empty()),
                connect_timeout: Duration::from_millis(gw.connect_timeout_ms),
            },
            client: ClientDescriptor {
                id: gw.client_id.clone(),
                version: gw.client_version.clone(),
                mode: gw.client_mode.clone(),
                ..Default::default()
            },
            token,
            handshake_timeout: Duration::from_millis(gw.handshake_timeout_ms),
            receive_timeout: Duration::from_millis(gw.receive_timeout_ms),
            max_receive_attempts: gw.max_receive_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Handshaking,
    Bridging,
    Closed,
}

/// Messages pushed to the dashboard client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientNotice {
    System {
        content: String,
    },
    Delta {
        content: String,
        #[serde(rename = "runId")]
        run_id: Option<String>,
    },
    Message {
        content: String,
        role: String,
    },
    Done {
        #[serde(rename = "runId")]
        run_id: Option<String>,
    },
    ConnectionError {
        error: String,
    },
}

impl ClientNotice {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientNotice::System { .. } => "system",
            ClientNotice::Delta { .. } => "delta",
            ClientNotice::Message { .. } => "message",
            ClientNotice::Done { .. } => "done",
            ClientNotice::ConnectionError { .. } => "connection_error",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Decides when a turn is over so that `done` goes out once per turn.
///
/// Either a lifecycle end or a chat final closes the turn; whichever arrives second is
/// swallowed. A turn is identified by its run id, or, when the gateway omits one, by "activity
/// happened since the last close".
#[derive(Debug, Default)]
pub struct TurnTracker {
    open: bool,
    run_id: Option<String>,
    last_closed: Option<String>,
    closed_anonymously: bool,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chat.send went out; whatever follows belongs to a new turn.
    pub fn begin(&mut self) {
        self.open = true;
        self.run_id = None;
        self.closed_anonymously = false;
    }

    pub fn observe(&mut self, run_id: Option<&str>) {
        if let Some(id) = run_id {
            if !self.open && self.last_closed.as_deref() == Some(id) {
                // Late frame of a turn that already ended.
                return;
            }
            self.run_id = Some(id.to_string());
        }
        self.open = true;
    }

    /// Returns `true` when this end signal is the first for its turn.
    pub fn close(&mut self, run_id: Option<&str>) -> bool {
        let id = run_id.map(str::to_string).or_else(|| self.run_id.clone());
        let duplicate = match id.as_deref() {
            Some(id) => {
                self.last_closed.as_deref() == Some(id) || (!self.open && self.closed_anonymously)
            }
            None => !self.open,
        };
        if duplicate {
            if id.is_some() && self.closed_anonymously {
                self.last_closed = id;
                self.closed_anonymously = false;
            }
            return false;
        }
        self.open = false;
        self.run_id = None;
        self.closed_anonymously = id.is_none();
        self.last_closed = id;
        true
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Client notices for one gateway event. Unclassified events produce nothing.
pub fn translate(event: &GatewayEvent, tracker: &mut TurnTracker) -> Vec<ClientNotice> {
    match event {
        GatewayEvent::AssistantDelta { run_id, delta } => {
            tracker.observe(run_id.as_deref());
            vec![ClientNotice::Delta {
                content: delta.clone(),
                run_id: run_id.clone(),
            }]
        }
        GatewayEvent::LifecycleEnd { run_id } => {
            if tracker.close(run_id.as_deref()) {
                vec![ClientNotice::Done {
                    run_id: run_id.clone(),
                }]
            } else {
                Vec::new()
            }
        }
        GatewayEvent::ChatFinal { run_id, text } => {
            let mut out = Vec::with_capacity(2);
            if !text.is_empty() {
                out.push(ClientNotice::Message {
                    content: text.clone(),
                    role: "assistant".to_string(),
                });
            }
            if tracker.close(run_id.as_deref()) {
                out.push(ClientNotice::Done {
                    run_id: run_id.clone(),
                });
            }
            out
        }
        GatewayEvent::Health
        | GatewayEvent::Challenge
        | GatewayEvent::Response { .. }
        | GatewayEvent::Other => Vec::new(),
    }
}

/// Connect and authenticate. On failure the socket is already closed.
async fn open_session(settings: &BridgeSettings) -> Result<GatewayConnection, BridgeError> {
    debug!(phase = ?BridgePhase::Handshaking, url = %settings.endpoint.ws_url, "opening gateway session");
    let mut conn = match GatewayConnection::connect(&settings.endpoint).await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(url = %settings.endpoint.ws_url, "gateway connect failed: {}", err);
            return Err(err);
        }
    };
    if let Err(err) = authenticate(
        &mut conn,
        settings.token.as_deref(),
        &settings.client,
        settings.handshake_timeout,
    )
    .await
    {
        warn!(url = %settings.endpoint.ws_url, "gateway handshake failed: {}", err);
        conn.close().await;
        return Err(err.into());
    }
    debug!(phase = ?BridgePhase::Bridging, "gateway session ready");
    Ok(conn)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Client,
    Gateway,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveSummary {
    pub closed_by: ClosedBy,
    pub messages_sent: u64,
    pub turns_completed: u64,
    /// Session key of the last message forwarded upstream.
    pub session_key: Option<String>,
}

#[derive(Default)]
struct BridgeCounters {
    sent: AtomicU64,
    turns: AtomicU64,
    last_session: Mutex<Option<String>>,
}

impl BridgeCounters {
    fn record_sent(&self, session_key: &str) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        let mut last = match self.last_session.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        *last = Some(session_key.to_string());
    }

    fn last_session(&self) -> Option<String> {
        match self.last_session.lock() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }
}

/// Full-duplex bridge. `client_messages` yields raw client frames; `notices` goes back to the
/// client. Returns once either side ends; the gateway socket is closed before returning.
#[instrument(skip_all, fields(url = %settings.endpoint.ws_url))]
pub async fn run_interactive<S>(
    settings: &BridgeSettings,
    client_messages: S,
    notices: mpsc::Sender<ClientNotice>,
) -> Result<InteractiveSummary, BridgeError>
where
    S: Stream<Item = String>,
{
    let conn = match open_session(settings).await {
        Ok(conn) => conn,
        Err(err) => {
            let _ = notices
                .send(ClientNotice::ConnectionError {
                    error: err.client_message(),
                })
                .await;
            return Err(err);
        }
    };
    if notices
        .send(ClientNotice::System {
            content: CONNECTED_NOTICE.to_string(),
        })
        .await
        .is_err()
    {
        conn.close().await;
        return Ok(InteractiveSummary {
            closed_by: ClosedBy::Client,
            messages_sent: 0,
            turns_completed: 0,
            session_key: None,
        });
    }

    let (mut sink, mut stream) = conn.split();
    let turn_started = AtomicBool::new(false);
    let counters = BridgeCounters::default();

    let closed_by = {
        let downstream = forward_downstream(&mut stream, &notices, &turn_started, &counters);
        let upstream = forward_upstream(client_messages, &mut sink, &turn_started, &counters);
        tokio::select! {
            _ = downstream => ClosedBy::Gateway,
            closed_by = upstream => closed_by,
        }
    };

    drop(stream);
    sink.close().await;
    let summary = InteractiveSummary {
        closed_by,
        messages_sent: counters.sent.load(Ordering::Relaxed),
        turns_completed: counters.turns.load(Ordering::Relaxed),
        session_key: counters.last_session(),
    };
    info!(
        phase = ?BridgePhase::Closed,
        closed_by = ?summary.closed_by,
        sent = summary.messages_sent,
        turns = summary.turns_completed,
        "chat bridge closed"
    );
    Ok(summary)
}

async fn forward_downstream(
    stream: &mut GatewayStream,
    notices: &mpsc::Sender<ClientNotice>,
    turn_started: &AtomicBool,
    counters: &BridgeCounters,
) {
    let mut tracker = TurnTracker::new();
    loop {
        let envelope = match stream.next_json().await {
            Ok(v) => v,
            Err(WireError::Malformed(err)) => {
                debug!("skipping malformed gateway frame: {}", err);
                continue;
            }
            Err(err) => {
                debug!("gateway stream ended: {}", err);
                return;
            }
        };
        if turn_started.swap(false, Ordering::SeqCst) {
            tracker.begin();
        }
        let event = classify(&envelope);
        if matches!(event, GatewayEvent::Other | GatewayEvent::Response { .. }) {
            debug!(event = ?envelope.get("event"), "dropping unhandled gateway frame");
        }
        for notice in translate(&event, &mut tracker) {
            if matches!(notice, ClientNotice::Done { .. }) {
                counters.turns.fetch_add(1, Ordering::Relaxed);
            }
            if notices.send(notice).await.is_err() {
                return;
            }
        }
    }
}

async fn forward_upstream<S>(
    client_messages: S,
    sink: &mut GatewaySink,
    turn_started: &AtomicBool,
    counters: &BridgeCounters,
) -> ClosedBy
where
    S: Stream<Item = String>,
{
    let mut client_messages = pin!(client_messages);
    while let Some(raw) = client_messages.next().await {
        let Some(chat) = ClientChat::parse(&raw) else {
            debug!("ignoring client frame without text");
            continue;
        };
        turn_started.store(true, Ordering::SeqCst);
        let request = chat_send_request(&chat.session_key, &chat.text);
        if let Err(err) = sink.send_json(&request).await {
            debug!("gateway send failed: {}", err);
            return ClosedBy::Gateway;
        }
        counters.record_sent(&chat.session_key);
    }
    ClosedBy::Client
}

/// Sends one message and waits for the reply text.
#[instrument(skip_all, fields(session_key = %session_key))]
pub async fn one_shot(
    settings: &BridgeSettings,
    session_key: &str,
    message: &str,
) -> Result<String, BridgeError> {
    if message.trim().is_empty() {
        return Err(BridgeError::EmptyInput);
    }
    let mut conn = open_session(settings).await?;
    let request = chat_send_request(session_key, message.trim());
    let send_id = request.get("id").and_then(Value::as_str).map(str::to_string);
    if let Err(err) = conn.send_json(&request).await {
        conn.close().await;
        return Err(BridgeError::Transport(err.to_string()));
    }

    let text = collect_reply(&mut conn, settings, send_id.as_deref()).await;
    conn.close().await;
    debug!(phase = ?BridgePhase::Closed, chars = text.len(), "one-shot exchange finished");
    if text.is_empty() {
        Err(BridgeError::NoResponse)
    } else {
        Ok(text)
    }
}

async fn collect_reply(
    conn: &mut GatewayConnection,
    settings: &BridgeSettings,
    send_id: Option<&str>,
) -> String {
    let mut text = String::new();
    for _ in 0..settings.max_receive_attempts {
        let envelope = match conn.recv_json(settings.receive_timeout).await {
            Ok(v) => v,
            Err(WireError::Malformed(err)) => {
                debug!("skipping malformed gateway frame: {}", err);
                continue;
            }
            Err(err) => {
                debug!("stopped collecting reply: {}", err);
                break;
            }
        };
        match classify(&envelope) {
            GatewayEvent::AssistantDelta { delta, .. } => text.push_str(&delta),
            GatewayEvent::LifecycleEnd { .. } => break,
            GatewayEvent::ChatFinal { text: final_text, .. } => {
                if !final_text.is_empty() {
                    text = final_text;
                }
                break;
            }
            GatewayEvent::Response {
                id,
                ok: false,
                error,
            } if id.is_some() && id.as_deref() == send_id => {
                warn!(error = ?error, "gateway rejected chat.send");
                break;
            }
            _ => {}
        }
    }
    text
}

/// Frames of a streamed exchange, ready to be rendered as server-sent events.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Notice(ClientNotice),
    /// An event the bridge does not interpret, passed through as received.
    Gateway(Value),
    Error { code: &'static str, error: String },
}

impl StreamFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Notice(n) => n.kind(),
            StreamFrame::Gateway(_) => "gateway",
            StreamFrame::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> String {
        match self {
            StreamFrame::Notice(n) => n.to_json(),
            StreamFrame::Gateway(v) => v.to_string(),
            StreamFrame::Error { code, error } => {
                serde_json::json!({ "code": code, "error": error }).to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: u64,
    pub response_chars: usize,
    pub completed: bool,
}

/// Streams one exchange into `frames`. Failures are reported as a single `error` frame and also
/// returned. A closed `frames` channel ends the exchange early.
#[instrument(skip_all, fields(session_key = %chat.session_key))]
pub async fn run_stream(
    settings: &BridgeSettings,
    chat: &ClientChat,
    frames: mpsc::Sender<StreamFrame>,
) -> Result<StreamSummary, BridgeError> {
    let mut conn = match open_session(settings).await {
        Ok(conn) => conn,
        Err(err) => {
            let _ = frames
                .send(StreamFrame::Error {
                    code: err.code(),
                    error: err.client_message(),
                })
                .await;
            return Err(err);
        }
    };
    let request = chat_send_request(&chat.session_key, &chat.text);
    let send_id = request.get("id").and_then(Value::as_str).map(str::to_string);
    if let Err(err) = conn.send_json(&request).await {
        conn.close().await;
        let err = BridgeError::Transport(err.to_string());
        let _ = frames
            .send(StreamFrame::Error {
                code: err.code(),
                error: err.client_message(),
            })
            .await;
        return Err(err);
    }

    let mut tracker = TurnTracker::new();
    tracker.begin();
    let mut summary = StreamSummary::default();
    'recv: for _ in 0..settings.max_receive_attempts {
        let received = tokio::select! {
            _ = frames.closed() => {
                debug!("stream consumer went away");
                break 'recv;
            }
            r = conn.recv_json(settings.receive_timeout) => r,
        };
        let envelope = match received {
            Ok(v) => v,
            Err(WireError::Malformed(err)) => {
                debug!("skipping malformed gateway frame: {}", err);
                continue;
            }
            Err(err) => {
                debug!("stream ended: {}", err);
                break;
            }
        };
        let event = classify(&envelope);
        let rejected = matches!(
            &event,
            GatewayEvent::Response { id, ok: false, .. } if id.is_some() && *id == send_id
        );
        let out: Vec<StreamFrame> = match &event {
            GatewayEvent::Other | GatewayEvent::Response { .. } => {
                vec![StreamFrame::Gateway(envelope)]
            }
            _ => translate(&event, &mut tracker)
                .into_iter()
                .map(StreamFrame::Notice)
                .collect(),
        };
        for frame in out {
            match &frame {
                StreamFrame::Notice(ClientNotice::Delta { content, .. }) => {
                    summary.response_chars += content.chars().count();
                }
                StreamFrame::Notice(ClientNotice::Message { content, .. }) => {
                    summary.response_chars = content.chars().count();
                }
                _ => {}
            }
            summary.frames += 1;
            if frames.send(frame).await.is_err() {
                debug!("stream consumer went away");
                break 'recv;
            }
        }
        if event.is_terminal() {
            summary.completed = true;
            break;
        }
        if rejected {
            warn!("gateway rejected chat.send");
            break;
        }
    }
    conn.close().await;
    debug!(phase = ?BridgePhase::Closed, frames = summary.frames, "stream exchange finished");
    Ok(summary)
}
