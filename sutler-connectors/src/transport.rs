//! Duplex transport port for the marketplace socket.
//!
//! The correlator only needs text frames in and out; connection handshake,
//! TLS, and reconnect policy stay with the adapter (or the embedding app).
//! Production uses [`WsTransport`]; tests use the channel-backed stub.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WebSocketMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

/// Type alias for the WebSocket stream (with auto TLS).
type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Errors produced by a transport adapter.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Failed to establish the connection.
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// Failed to send a frame.
    #[error("Failed to send frame: {0}")]
    Send(String),

    /// Failed to receive a frame.
    #[error("Failed to receive frame: {0}")]
    Receive(String),
}

/// A duplex, message-oriented connection carrying text frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame to the peer.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next text frame. `None` means the connection is closed;
    /// an error is a transport fault on an otherwise open connection.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Best-effort; errors are ignored.
    async fn close(&mut self);
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport {
    ws: WsStream,
}

impl WsTransport {
    /// Connect to the marketplace socket endpoint.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        debug!(%url, "Connecting to marketplace socket");
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { ws })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(WebSocketMessage::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        // Skip control frames; only text frames carry protocol payloads.
        loop {
            match self.ws.next().await? {
                Ok(WebSocketMessage::Text(text)) => return Some(Ok(text)),
                Ok(WebSocketMessage::Close(_)) => {
                    debug!("WebSocket close frame received");
                    return None;
                },
                Ok(WebSocketMessage::Ping(_)) | Ok(WebSocketMessage::Pong(_)) => continue,
                Ok(other) => {
                    warn!(?other, "Ignoring non-text WebSocket frame");
                    continue;
                },
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
