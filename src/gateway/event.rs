//! Gateway envelope classification and request builders.
//!
//! Envelopes arrive as `{type:"event", event, payload}` or `{type:"res", id, ok, ...}` and are
//! handled as raw JSON; only the shapes the bridge reacts to are lifted into [`GatewayEvent`].

use serde_json::{Value, json};
use uuid::Uuid;

use super::handshake::ClientDescriptor;

pub const PROTOCOL_VERSION: u32 = 3;
pub const OPERATOR_ROLE: &str = "operator";
pub const OPERATOR_SCOPES: [&str; 1] = ["operator.admin"];
pub const DEFAULT_SESSION_KEY: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Health,
    Challenge,
    AssistantDelta {
        run_id: Option<String>,
        delta: String,
    },
    LifecycleEnd {
        run_id: Option<String>,
    },
    ChatFinal {
        run_id: Option<String>,
        text: String,
    },
    Response {
        id: Option<String>,
        ok: bool,
        error: Option<String>,
    },
    Other,
}

impl GatewayEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GatewayEvent::LifecycleEnd { .. } | GatewayEvent::ChatFinal { .. }
        )
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn run_id(payload: &Value) -> Option<String> {
    str_field(payload, "runId").map(str::to_string)
}

pub fn classify(envelope: &Value) -> GatewayEvent {
    if str_field(envelope, "type") == Some("res") {
        return GatewayEvent::Response {
            id: str_field(envelope, "id").map(str::to_string),
            ok: envelope.get("ok").and_then(Value::as_bool).unwrap_or(false),
            error: response_error(envelope),
        };
    }

    let payload = envelope.get("payload").unwrap_or(&Value::Null);
    match str_field(envelope, "event").unwrap_or("") {
        "health" | "tick" => GatewayEvent::Health,
        "connect.challenge" => GatewayEvent::Challenge,
        "agent" if payload.is_object() => {
            let data = payload.get("data").unwrap_or(&Value::Null);
            match str_field(payload, "stream") {
                Some("assistant") => match str_field(data, "delta") {
                    Some(delta) => GatewayEvent::AssistantDelta {
                        run_id: run_id(payload),
                        delta: delta.to_string(),
                    },
                    None => GatewayEvent::Other,
                },
                Some("lifecycle") if str_field(data, "phase") == Some("end") => {
                    GatewayEvent::LifecycleEnd {
                        run_id: run_id(payload),
                    }
                }
                _ => GatewayEvent::Other,
            }
        }
        "chat" if str_field(payload, "state") == Some("final") => GatewayEvent::ChatFinal {
            run_id: run_id(payload),
            text: final_text(payload),
        },
        _ => GatewayEvent::Other,
    }
}

/// Text blocks of the final message, concatenated in order.
fn final_text(payload: &Value) -> String {
    let Some(blocks) = payload
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    blocks
        .iter()
        .filter(|b| str_field(b, "type") == Some("text"))
        .filter_map(|b| str_field(b, "text"))
        .collect()
}

fn response_error(envelope: &Value) -> Option<String> {
    let err = envelope.get("error")?;
    match err {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => str_field(err, "message")
            .or_else(|| str_field(err, "code"))
            .map(str::to_string)
            .or_else(|| Some(err.to_string())),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

pub fn fresh_request_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

pub fn connect_request(client: &ClientDescriptor, token: Option<&str>) -> Value {
    let auth = match token {
        Some(token) => json!({ "token": token }),
        None => json!({}),
    };
    json!({
        "type": "req",
        "id": fresh_request_id(),
        "method": "connect",
        "params": {
            "minProtocol": PROTOCOL_VERSION,
            "maxProtocol": PROTOCOL_VERSION,
            "client": {
                "id": client.id,
                "version": client.version,
                "platform": client.platform,
                "mode": client.mode,
                "instanceId": Uuid::new_v4().to_string(),
            },
            "role": OPERATOR_ROLE,
            "scopes": OPERATOR_SCOPES,
            "auth": auth,
            "caps": [],
        }
    })
}

pub fn chat_send_request(session_key: &str, message: &str) -> Value {
    json!({
        "type": "req",
        "id": fresh_request_id(),
        "method": "chat.send",
        "params": {
            "sessionKey": session_key,
            "message": message,
            "deliver": false,
            "idempotencyKey": Uuid::new_v4().to_string(),
        }
    })
}

/// A chat message sent by the dashboard client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChat {
    pub session_key: String,
    pub text: String,
}

impl ClientChat {
    /// `None` for unparseable input or blank text.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let text = str_field(value, "content").or_else(|| str_field(value, "message"))?;
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            session_key: session_key_of(value),
            text: text.to_string(),
        })
    }
}

pub fn session_key_of(value: &Value) -> String {
    str_field(value, "sessionKey")
        .or_else(|| str_field(value, "sessionId"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION_KEY)
        .to_string()
}
