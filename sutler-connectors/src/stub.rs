//! Stub transport for testing.
//!
//! [`ChannelTransport`] satisfies the [`Transport`] contract over in-memory
//! channels, with a [`PeerHandle`] playing the marketplace side of the
//! connection. The peer speaks the real wire format, so socket-client tests
//! exercise the same decode path as production traffic.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::transport::{Transport, TransportError};

// Numeric frame codes mirror what the service emits; the client strips and
// discards them, so only their presence matters.
const RESPONSE_CODE: &str = "430";
const PUSH_CODE: &str = "42";

// =============================================================================
// Channel transport
// =============================================================================

/// In-memory transport for driving the socket client in tests.
pub struct ChannelTransport {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    fail_send: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (Self, PeerHandle) {
        let (to_client, inbound) = mpsc::channel(64);
        let (outbound, from_client) = mpsc::unbounded_channel();
        let fail_send = Arc::new(AtomicBool::new(false));

        let transport = Self { inbound, outbound, fail_send: fail_send.clone() };
        let peer = PeerHandle { to_client: Some(to_client), from_client, fail_send };
        (transport, peer)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.fail_send.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Send("scripted send failure".to_string()));
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("peer receiver dropped".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

// =============================================================================
// Peer handle
// =============================================================================

/// The remote side of a [`ChannelTransport`] pair.
///
/// Frames sent by the client are read with [`PeerHandle::next_sent`];
/// the `respond_*`, `push` and `ack_auth` helpers emit properly encoded
/// frames back. Responses are positional, exactly like the real service:
/// answer in the order the requests arrived.
pub struct PeerHandle {
    to_client: Option<mpsc::Sender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
    fail_send: Arc<AtomicBool>,
}

impl PeerHandle {
    /// Next frame the client wrote, or `None` once the client is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Deliver a raw frame as-is (for malformed-input tests).
    pub async fn send_raw(&mut self, text: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(text.into()).await;
        }
    }

    /// Answer the oldest unanswered request successfully.
    pub async fn respond_ok(&mut self, payload: Value) {
        self.send_body(RESPONSE_CODE, json!([null, payload])).await;
    }

    /// Answer the oldest unanswered request with an error.
    pub async fn respond_err(&mut self, error: Value) {
        self.send_body(RESPONSE_CODE, json!([error, null])).await;
    }

    /// Acknowledge authentication for the given identity.
    pub async fn ack_auth(&mut self, user_id: &str, username: &str) {
        self.send_body(
            RESPONSE_CODE,
            json!([
                null,
                {
                    "accessToken": "stub-token",
                    "user": { "_id": user_id, "username": username },
                }
            ]),
        )
        .await;
    }

    /// Emit an unsolicited push event.
    pub async fn push(&mut self, event_type: &str, data: Value) {
        self.send_body(PUSH_CODE, json!([event_type, data])).await;
    }

    /// Make the client's next `send` fail. One-shot; cleared on use.
    pub fn fail_next_send(&mut self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }

    /// Drop the connection from the peer side.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    async fn send_body(&mut self, code: &str, body: Value) {
        self.send_raw(format!("{code}{body}")).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
