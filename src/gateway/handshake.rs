use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::connection::{GatewayConnection, WireError};
use super::event::connect_request;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("timed out")]
    Timeout,
    #[error("expected connect.challenge, got {0}")]
    UnexpectedFirstMessage(String),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("connection closed")]
    Closed,
    #[error("connect rejected: {0}")]
    Rejected(String),
    #[error("{0}")]
    Transport(String),
}

impl From<WireError> for HandshakeError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Timeout => HandshakeError::Timeout,
            WireError::Closed => HandshakeError::Closed,
            WireError::Malformed(m) => HandshakeError::Malformed(m),
            WireError::Transport(m) => HandshakeError::Transport(m),
        }
    }
}

/// Identity presented in the connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDescriptor {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

impl Default for ClientDescriptor {
    fn default() -> Self {
        Self {
            id: "cli".to_string(),
            version: "2.0.0".to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "cli".to_string(),
        }
    }
}

/// Challenge/connect exchange. Nothing is sent unless the first frame is a challenge.
pub async fn authenticate(
    conn: &mut GatewayConnection,
    token: Option<&str>,
    client: &ClientDescriptor,
    step_timeout: Duration,
) -> Result<(), HandshakeError> {
    let first = conn.recv_json(step_timeout).await?;
    if first.get("event").and_then(Value::as_str) != Some("connect.challenge") {
        let got = first
            .get("event")
            .or_else(|| first.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("<no event>")
            .to_string();
        warn!(got = %got, "gateway did not open with a challenge");
        return Err(HandshakeError::UnexpectedFirstMessage(got));
    }

    conn.send_json(&connect_request(client, token)).await?;

    let reply = conn.recv_json(step_timeout).await?;
    if reply.get("ok").and_then(Value::as_bool) == Some(true) {
        debug!("gateway accepted connect");
        return Ok(());
    }
    let reason = reply
        .get("error")
        .map(|e| match e {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        })
        .unwrap_or_else(|| "gateway did not confirm connect".to_string());
    warn!(reason = %reason, "gateway rejected connect");
    Err(HandshakeError::Rejected(reason))
}
