use std::convert::Infallible;
use std::future::ready;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt, stream};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use super::DashService;
use crate::bridge::{self, ClientNotice, ClosedBy, StreamFrame};
use crate::error::BridgeError;
use crate::gateway::ClientChat;
use crate::gateway::event::DEFAULT_SESSION_KEY;
use crate::logging::{ChatLogEntry, ChatMode, log_chat_exchange};

const STATUS_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct ChatReply {
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatErrorBody {
    error: String,
    code: &'static str,
}

fn error_response(err: &BridgeError) -> Response {
    (
        err.status(),
        Json(ChatErrorBody {
            error: err.client_message(),
            code: err.code(),
        }),
    )
        .into_response()
}

/// Body `{message, sessionKey?|sessionId?}`. Anything without usable text is empty input.
fn parse_chat_body(body: &[u8]) -> Result<ClientChat, BridgeError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| BridgeError::EmptyInput)?;
    ClientChat::from_value(&value).ok_or(BridgeError::EmptyInput)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

pub async fn chat_once(svc: DashService, body: Bytes) -> Response {
    let started = Instant::now();
    let chat = match parse_chat_body(&body) {
        Ok(chat) => chat,
        Err(err) => return error_response(&err),
    };

    let result = bridge::one_shot(&svc.bridge, &chat.session_key, &chat.text).await;
    let (outcome, chars) = match &result {
        Ok(text) => ("ok", text.chars().count()),
        Err(err) => (err.code(), 0),
    };
    log_chat_exchange(&ChatLogEntry::new(
        ChatMode::OneShot,
        &chat.session_key,
        outcome,
        elapsed_ms(started),
        chars,
    ));

    match result {
        Ok(response) => Json(ChatReply { response }).into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn chat_stream(svc: DashService, body: Bytes) -> Response {
    let chat = match parse_chat_body(&body) {
        Ok(chat) => chat,
        Err(err) => return error_response(&err),
    };

    let (tx, rx) = mpsc::channel::<StreamFrame>(64);
    let settings = svc.bridge.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let result = bridge::run_stream(&settings, &chat, tx).await;
        let (outcome, chars) = match &result {
            Ok(summary) if summary.completed => ("ok", summary.response_chars),
            Ok(summary) => ("incomplete", summary.response_chars),
            Err(err) => (err.code(), 0),
        };
        log_chat_exchange(&ChatLogEntry::new(
            ChatMode::Stream,
            &chat.session_key,
            outcome,
            elapsed_ms(started),
            chars,
        ));
    });

    let events = stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        let event = Event::default()
            .event(frame.event_name())
            .data(frame.data());
        Some((Ok::<Event, Infallible>(event), rx))
    });
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub async fn chat_status(svc: DashService) -> Json<Value> {
    let available = svc.probe_gateway(STATUS_TIMEOUT).await == Some(200);
    Json(json!({
        "available": available,
        "gateway": svc.gateway_http_url.to_string(),
    }))
}

pub async fn chat_ws(svc: DashService, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_chat_socket(svc, socket))
}

#[instrument(skip_all)]
async fn handle_chat_socket(svc: DashService, socket: WebSocket) {
    let started = Instant::now();
    let (mut ws_sender, ws_receiver) = socket.split();
    let (notice_tx, mut notice_rx) = mpsc::channel::<ClientNotice>(64);
    let writer = tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            if ws_sender
                .send(Message::Text(notice.to_json().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let client_messages = ws_receiver
        .take_while(|frame| ready(matches!(frame, Ok(msg) if !matches!(msg, Message::Close(_)))))
        .filter_map(|frame| {
            ready(match frame {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                _ => None,
            })
        });

    let result = bridge::run_interactive(&svc.bridge, client_messages, notice_tx).await;
    let _ = writer.await;

    let (outcome, session) = match &result {
        Ok(summary) => {
            debug!(
                sent = summary.messages_sent,
                turns = summary.turns_completed,
                "chat socket finished"
            );
            let outcome = match summary.closed_by {
                ClosedBy::Client => "client_closed",
                ClosedBy::Gateway => "gateway_closed",
            };
            (outcome, summary.session_key.as_deref())
        }
        Err(err) => (err.code(), None),
    };
    log_chat_exchange(&ChatLogEntry::new(
        ChatMode::Interactive,
        session.unwrap_or(DEFAULT_SESSION_KEY),
        outcome,
        elapsed_ms(started),
        0,
    ));
}
