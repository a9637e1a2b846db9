use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::BridgeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Where and how to open the upstream socket.
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    pub ws_url: String,
    pub origin: Option<String>,
    pub connect_timeout: Duration,
}

/// Failure of a single frame exchange on an open socket.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("timed out waiting for the gateway")]
    Timeout,
    #[error("gateway closed the connection")]
    Closed,
    #[error("malformed gateway frame: {0}")]
    Malformed(String),
    #[error("{0}")]
    Transport(String),
}

impl From<WsError> for WireError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => WireError::Closed,
            other => WireError::Transport(other.to_string()),
        }
    }
}

/// One authenticated-or-not socket to the gateway. Never shared between exchanges.
pub struct GatewayConnection {
    ws: WsStream,
}

impl GatewayConnection {
    pub async fn connect(endpoint: &GatewayEndpoint) -> Result<Self, BridgeError> {
        let mut request = endpoint
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Transport(format!("invalid gateway url {}: {e}", endpoint.ws_url)))?;
        if let Some(origin) = endpoint.origin.as_deref() {
            let value = origin
                .parse()
                .map_err(|_| BridgeError::Transport(format!("invalid origin header: {origin}")))?;
            request.headers_mut().insert("Origin", value);
        }

        let ws = match timeout(endpoint.connect_timeout, connect_async(request)).await {
            Err(_) => {
                return Err(BridgeError::UpstreamUnavailable(format!(
                    "connect to {} timed out",
                    endpoint.ws_url
                )));
            }
            Ok(Err(err)) => return Err(map_connect_error(&endpoint.ws_url, err)),
            Ok(Ok((ws, _response))) => ws,
        };
        debug!(url = %endpoint.ws_url, "gateway socket open");
        Ok(Self { ws })
    }

    pub async fn send_json(&mut self, value: &Value) -> Result<(), WireError> {
        self.ws.send(Message::Text(value.to_string().into())).await?;
        Ok(())
    }

    pub async fn recv_json(&mut self, wait: Duration) -> Result<Value, WireError> {
        recv_within(&mut self.ws, wait).await
    }

    /// Separate halves for the two forwarding directions of a bridge.
    pub fn split(self) -> (GatewaySink, GatewayStream) {
        let (sink, stream) = self.ws.split();
        (GatewaySink { sink }, GatewayStream { stream })
    }

    /// Best-effort close frame; errors are ignored.
    pub async fn close(mut self) {
        let _ = timeout(CLOSE_GRACE, self.ws.close(None)).await;
    }
}

pub struct GatewaySink {
    sink: SplitSink<WsStream, Message>,
}

impl GatewaySink {
    pub async fn send_json(&mut self, value: &Value) -> Result<(), WireError> {
        self.sink.send(Message::Text(value.to_string().into())).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        let _ = timeout(CLOSE_GRACE, self.sink.close()).await;
    }
}

pub struct GatewayStream {
    stream: SplitStream<WsStream>,
}

impl GatewayStream {
    /// Waits without a deadline; the interactive bridge ends only on close or cancellation.
    pub async fn next_json(&mut self) -> Result<Value, WireError> {
        next_envelope(&mut self.stream).await
    }
}

fn map_connect_error(url: &str, err: WsError) -> BridgeError {
    match err {
        WsError::Io(io) => BridgeError::UpstreamUnavailable(format!("{url}: {io}")),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            BridgeError::UpstreamUnavailable(format!("{url}: connection closed during upgrade"))
        }
        other => BridgeError::Transport(format!("{url}: {other}")),
    }
}

async fn recv_within<S>(stream: &mut S, wait: Duration) -> Result<Value, WireError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    timeout(wait, next_envelope(stream))
        .await
        .map_err(|_| WireError::Timeout)?
}

async fn next_envelope<S>(stream: &mut S) -> Result<Value, WireError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = match stream.next().await {
            None => return Err(WireError::Closed),
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(frame)) => frame,
        };
        match frame {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| WireError::Malformed(e.to_string()));
            }
            Message::Binary(bytes) => {
                return serde_json::from_slice(&bytes)
                    .map_err(|e| WireError::Malformed(e.to_string()));
            }
            Message::Close(_) => return Err(WireError::Closed),
            // Pings are answered by tungstenite on the next poll.
            _ => {}
        }
    }
}
