use std::io;

use axum::http::StatusCode;
use thiserror::Error;

use crate::gateway::handshake::HandshakeError;

pub const GATEWAY_NOT_RUNNING: &str =
    "OpenClaw gateway is not running. Start it with: openclaw gateway start";
pub const GATEWAY_AUTH_FAILED: &str = "Gateway authentication failed";

/// Everything that can end a chat exchange early, translated once at the bridge boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("message is empty")]
    EmptyInput,
    #[error("gateway unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("gateway handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("gateway produced no answer")]
    NoResponse,
    #[error("gateway transport error: {0}")]
    Transport(String),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::EmptyInput => "empty_input",
            BridgeError::UpstreamUnavailable(_) => "gateway_unavailable",
            BridgeError::Handshake(_) => "handshake_failed",
            BridgeError::NoResponse => "no_response",
            BridgeError::Transport(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::EmptyInput => StatusCode::BAD_REQUEST,
            BridgeError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Handshake(_) => StatusCode::BAD_GATEWAY,
            BridgeError::NoResponse => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to the dashboard user.
    pub fn client_message(&self) -> String {
        match self {
            BridgeError::EmptyInput => "Message is required".to_string(),
            BridgeError::UpstreamUnavailable(_) => GATEWAY_NOT_RUNNING.to_string(),
            BridgeError::Handshake(_) => GATEWAY_AUTH_FAILED.to_string(),
            BridgeError::NoResponse => "No response from model".to_string(),
            BridgeError::Transport(msg) => format!("Chat error: {msg}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("usage log read failed: {0}")]
    Io(#[from] io::Error),
    #[error("usage scan task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_and_auth_failure_read_differently() {
        let down = BridgeError::UpstreamUnavailable("connection refused".into());
        let auth = BridgeError::Handshake(HandshakeError::Rejected("bad token".into()));
        assert_ne!(down.client_message(), auth.client_message());
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(auth.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(auth.client_message(), GATEWAY_AUTH_FAILED);
    }

    #[test]
    fn no_response_is_not_unavailability() {
        let err = BridgeError::NoResponse;
        assert_eq!(err.code(), "no_response");
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(BridgeError::EmptyInput.status(), StatusCode::BAD_REQUEST);
    }
}
