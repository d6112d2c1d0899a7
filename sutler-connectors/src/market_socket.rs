//! Marketplace Socket Client (request correlator)
//!
//! Turns the single marketplace connection into concurrent request/response
//! channels plus a stream of unsolicited push events.
//!
//! The protocol carries no request ids: responses arrive in send order, so
//! correlation is strictly FIFO against an ordered pending-request queue.
//! That queue is the delicate part of this module:
//!
//! - A response always consumes the queue head.
//! - A timed-out request rejects its caller but leaves a tombstone in place,
//!   so the response that eventually arrives for it consumes the dead slot
//!   instead of shifting onto a neighbor.
//! - A failed send removes its entry outright; the peer never saw the frame,
//!   so no response will come for it.
//! - Connection loss rejects everything and clears the queue.
//!
//! In-order response delivery is an assumption about the remote peer and is
//! not enforceable here; a peer that reorders or skips responses silently
//! mismatches callers. Accepted, documented risk.
//!
//! There is no automatic reconnect. A dropped connection discards all
//! in-flight state and a fresh connect (with re-authentication) is required.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::frame::{self, InboundFrame};
use crate::market_rest::Paginated;
use crate::transport::Transport;
use sutler_domain::{ChatMessage, Conversation, ConversationId, Session, UserId};

// =============================================================================
// Constants
// =============================================================================

/// Default per-request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default handshake timeout in seconds.
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;

/// Default per-subscription push buffer (events, not bytes).
const DEFAULT_PUSH_BUFFER: usize = 64;

/// Service addressed by the authentication frame.
const AUTH_SERVICE: &str = "security/session";

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by the marketplace socket client.
#[derive(Debug, Clone, Error)]
pub enum SocketError {
    /// The socket is not in the Ready state.
    #[error("Socket not connected")]
    NotReady,

    /// No response arrived within the request timeout.
    #[error("Socket request timeout")]
    Timeout,

    /// The connection dropped while the request was in flight.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The handshake was rejected or did not complete.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The service answered the request with an error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The service answered `[null, null]`.
    #[error("Empty response")]
    EmptyResponse,

    /// The frame could not be written to the transport.
    #[error("Failed to send message: {0}")]
    Transport(String),

    /// The response payload did not match the expected type.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

// =============================================================================
// Connection state
// =============================================================================

/// Observable lifecycle of the single marketplace connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection; terminal after teardown.
    Disconnected,
    /// Transport established, handshake not yet sent.
    Connecting,
    /// Authentication frame sent, awaiting acknowledgement.
    Authenticating,
    /// Handshake complete; `call` is accepted.
    Ready,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Ready => write!(f, "ready"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Socket client configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// JWT presented in the authentication frame.
    pub access_token: String,
    /// How long a single request may stay unanswered.
    pub request_timeout: Duration,
    /// How long the handshake may take before connect fails.
    pub auth_timeout: Duration,
    /// Capacity of each push subscription's buffer.
    pub push_buffer: usize,
}

impl SocketConfig {
    /// Configuration with service defaults for the given token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            push_buffer: DEFAULT_PUSH_BUFFER,
        }
    }
}

// =============================================================================
// Pending-request queue
// =============================================================================

type Waiter = oneshot::Sender<Result<Value, SocketError>>;

/// One in-flight request. `waiter: None` marks a tombstone: the caller has
/// already been rejected (timeout) but the slot still occupies its position
/// so FIFO alignment survives the late response.
struct PendingEntry {
    seq: u64,
    method: String,
    service: String,
    waiter: Option<Waiter>,
    sent_at: Instant,
}

/// Ordered queue of in-flight requests keyed by sequence number.
///
/// Head consumption is O(1); removal and tombstoning by sequence scan the
/// queue, which stays short (bounded by concurrently outstanding calls).
struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    next_seq: u64,
}

impl PendingQueue {
    fn new() -> Self {
        Self { entries: VecDeque::new(), next_seq: 0 }
    }

    /// Append a live entry at the tail and return its sequence number.
    fn push(&mut self, method: &str, service: &str, waiter: Waiter) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(PendingEntry {
            seq,
            method: method.to_string(),
            service: service.to_string(),
            waiter: Some(waiter),
            sent_at: Instant::now(),
        });
        seq
    }

    /// Consume the queue head for an arriving response.
    fn resolve_head(&mut self) -> Option<PendingEntry> {
        self.entries.pop_front()
    }

    /// Mark an entry as timed out, keeping its position. Returns false when
    /// the entry is already gone (resolved in the same instant).
    fn tombstone(&mut self, seq: u64) -> bool {
        match self.entries.iter_mut().find(|e| e.seq == seq) {
            Some(entry) => {
                entry.waiter = None;
                true
            },
            None => false,
        }
    }

    /// Physically remove an entry (send failure: the peer never saw it).
    fn remove(&mut self, seq: u64) -> Option<PendingEntry> {
        let idx = self.entries.iter().position(|e| e.seq == seq)?;
        self.entries.remove(idx)
    }

    /// Take every entry, clearing the queue.
    fn drain(&mut self) -> Vec<PendingEntry> {
        self.entries.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Push subscriptions
// =============================================================================

/// A handle to one push event stream.
///
/// Dropping the subscription unsubscribes: the dispatcher prunes the slot on
/// the next matching event. `recv` returns `None` once the socket is torn
/// down (or after the subscription was dropped from the other side).
pub struct PushSubscription {
    event_type: String,
    rx: mpsc::Receiver<Value>,
}

impl PushSubscription {
    /// The sanitized event type this subscription is keyed on.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Next push event payload, or `None` on teardown.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// A subscription fed by a plain channel instead of a socket.
    ///
    /// Lets embedders and tests drive push consumers without a connection.
    pub fn detached(event_type: &str, capacity: usize) -> (mpsc::Sender<Value>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { event_type: frame::sanitize_event_type(event_type), rx })
    }
}

// =============================================================================
// Socket client
// =============================================================================

struct Outbound {
    seq: u64,
    text: String,
}

/// State shared between callers and the dispatch loop.
struct Shared {
    request_timeout: Duration,
    push_buffer: usize,
    pending: Mutex<PendingQueue>,
    registry: Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>,
    auth_waiter: Mutex<Option<Waiter>>,
    session: RwLock<Option<Session>>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

/// Marketplace socket client.
///
/// Owns the connection exclusively; all traffic funnels through
/// [`MarketSocket::call`] and [`MarketSocket::subscribe`].
pub struct MarketSocket {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    dispatch: JoinHandle<()>,
}

impl MarketSocket {
    /// Connect over an established transport: send the authentication frame,
    /// start the dispatch loop, and wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Fails with [`SocketError::Auth`] when the handshake is rejected or
    /// times out, [`SocketError::Transport`] when the auth frame cannot be
    /// written, and [`SocketError::ConnectionLost`] when the connection
    /// drops mid-handshake.
    pub async fn connect<T>(
        mut transport: T,
        config: SocketConfig,
    ) -> Result<Self, SocketError>
    where
        T: Transport + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            request_timeout: config.request_timeout,
            push_buffer: config.push_buffer,
            pending: Mutex::new(PendingQueue::new()),
            registry: Mutex::new(HashMap::new()),
            auth_waiter: Mutex::new(None),
            session: RwLock::new(None),
            state_tx: watch::channel(ConnectionState::Connecting).0,
            outbound_tx,
        });

        let (auth_tx, auth_rx) = oneshot::channel();
        *shared.auth_waiter.lock().await = Some(auth_tx);

        // The handshake bypasses the pending queue: no correlator exists for
        // it, the acknowledgement is recognized by shape.
        let auth_frame = frame::encode_request(
            "create",
            AUTH_SERVICE,
            &json!({ "strategy": "jwt", "accessToken": config.access_token }),
        );
        transport
            .send(auth_frame)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        shared.set_state(ConnectionState::Authenticating);
        debug!("Authentication frame sent");

        let cancel = CancellationToken::new();
        let dispatch =
            tokio::spawn(dispatch_loop(transport, shared.clone(), outbound_rx, cancel.clone()));

        let socket = Self { shared, cancel, dispatch };

        match timeout(config.auth_timeout, auth_rx).await {
            Ok(Ok(Ok(_payload))) => {
                info!("Marketplace socket ready");
                Ok(socket)
            },
            Ok(Ok(Err(e))) => {
                socket.close().await;
                Err(e)
            },
            Ok(Err(_)) => {
                socket.close().await;
                Err(SocketError::ConnectionLost("socket disconnected".to_string()))
            },
            Err(_) => {
                socket.close().await;
                Err(SocketError::Auth("authentication timed out".to_string()))
            },
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch channel following the connection state.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Identity from the authentication acknowledgement, when parsable.
    pub async fn session(&self) -> Option<Session> {
        self.shared.session.read().await.clone()
    }

    /// Issue a request and decode the response payload.
    ///
    /// # Errors
    ///
    /// [`SocketError::NotReady`] when not connected, [`SocketError::Timeout`]
    /// after the request timeout, [`SocketError::Remote`] when the service
    /// answers with an error slot, [`SocketError::EmptyResponse`] for a
    /// `[null, null]` answer, [`SocketError::ConnectionLost`] when the
    /// connection drops first.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        service: &str,
        payload: Value,
    ) -> Result<T, SocketError> {
        let raw = self.call_raw(method, service, payload).await?;
        serde_json::from_value(raw).map_err(|e| SocketError::Decode(e.to_string()))
    }

    /// Issue a request and return the raw response payload.
    pub async fn call_raw(
        &self,
        method: &str,
        service: &str,
        payload: Value,
    ) -> Result<Value, SocketError> {
        if self.shared.state() != ConnectionState::Ready {
            return Err(SocketError::NotReady);
        }

        let (tx, rx) = oneshot::channel();
        // Queue insertion and outbound ordering must agree, so the frame is
        // handed to the writer under the same lock that appends the entry.
        let seq = {
            let mut pending = self.shared.pending.lock().await;
            let seq = pending.push(method, service, tx);
            let text = frame::encode_request(method, service, &payload);
            if self.shared.outbound_tx.send(Outbound { seq, text }).is_err() {
                pending.remove(seq);
                return Err(SocketError::ConnectionLost("socket closed".to_string()));
            }
            seq
        };
        debug!(seq, method, service, "Socket request queued");

        match timeout(self.shared.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SocketError::ConnectionLost("socket disconnected".to_string())),
            Err(_) => {
                self.shared.pending.lock().await.tombstone(seq);
                warn!(seq, method, service, "Socket request timed out");
                Err(SocketError::Timeout)
            },
        }
    }

    /// Subscribe to a push event type.
    ///
    /// The key is sanitized exactly like inbound event types, so callers may
    /// pass either the raw form (`"system/notification pushed"`) or the
    /// sanitized one. Unsubscribe by dropping the returned handle.
    pub async fn subscribe(&self, event_type: &str) -> PushSubscription {
        let key = frame::sanitize_event_type(event_type);
        let (tx, rx) = mpsc::channel(self.shared.push_buffer);
        self.shared.registry.lock().await.entry(key.clone()).or_default().push(tx);
        debug!(event = %key, "Push subscription registered");
        PushSubscription { event_type: key, rx }
    }

    /// Conversations the given user participates in.
    pub async fn find_conversations(
        &self,
        participant: &UserId,
    ) -> Result<Paginated<Conversation>, SocketError> {
        self.call(
            "find",
            "social/conversation",
            json!({
                "participant_ids": participant.as_str(),
                "$limit": 100,
                "$skip": 0,
                "$resolve": {
                    "participants": true,
                    "unreadCount": true,
                    "latestMessage": { "sender": true },
                },
            }),
        )
        .await
    }

    /// Messages of one conversation, oldest first.
    pub async fn find_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Paginated<ChatMessage>, SocketError> {
        self.call(
            "find",
            "social/message",
            json!({
                "conversation_id": conversation.as_str(),
                "$sort": { "created_at": 1 },
                "$limit": 500,
                "$resolve": { "sender": true },
            }),
        )
        .await
    }

    /// Number of requests currently in flight (tombstones included).
    pub async fn pending_requests(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Close the connection and wait for the dispatch loop to finish.
    /// All in-flight requests are rejected and subscriptions end.
    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.dispatch.await;
    }
}

// =============================================================================
// Dispatch loop
// =============================================================================

enum LoopEvent {
    Cancelled,
    Outbound(Option<Outbound>),
    Inbound(Option<Result<String, crate::transport::TransportError>>),
}

async fn dispatch_loop<T: Transport>(
    mut transport: T,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) {
    let reason = loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => LoopEvent::Cancelled,
            out = outbound_rx.recv() => LoopEvent::Outbound(out),
            frame = transport.recv() => LoopEvent::Inbound(frame),
        };

        match event {
            LoopEvent::Cancelled => {
                transport.close().await;
                break "socket closed";
            },
            LoopEvent::Outbound(Some(out)) => {
                if let Err(e) = transport.send(out.text).await {
                    warn!(seq = out.seq, error = %e, "Failed to send frame");
                    let mut pending = shared.pending.lock().await;
                    if let Some(entry) = pending.remove(out.seq) {
                        if let Some(waiter) = entry.waiter {
                            let _ = waiter.send(Err(SocketError::Transport(e.to_string())));
                        }
                    }
                }
            },
            // The outbound sender lives in `shared`, which this loop keeps
            // alive; a closed channel still means there is nothing left to do.
            LoopEvent::Outbound(None) => break "socket closed",
            LoopEvent::Inbound(Some(Ok(text))) => handle_frame(&shared, &text).await,
            LoopEvent::Inbound(Some(Err(e))) => {
                error!(error = %e, "Transport receive error");
                break "socket disconnected";
            },
            LoopEvent::Inbound(None) => break "socket disconnected",
        }
    };

    teardown(&shared, reason).await;
}

async fn handle_frame(shared: &Shared, text: &str) {
    match frame::decode(text) {
        Err(e) => warn!(error = %e, "Undecodable frame"),
        Ok(InboundFrame::AuthAck { payload }) => {
            let session = Session::from_auth_payload(&payload);
            match &session {
                Some(s) => info!(user = %s.user_id, "Authenticated with marketplace"),
                None => warn!("Authentication acknowledged without a parsable user"),
            }
            *shared.session.write().await = session;
            shared.set_state(ConnectionState::Ready);
            match shared.auth_waiter.lock().await.take() {
                Some(tx) => {
                    let _ = tx.send(Ok(payload));
                },
                None => debug!("Duplicate authentication acknowledgement"),
            }
        },
        Ok(InboundFrame::Push { event_type, data }) => {
            dispatch_push(shared, &event_type, data).await;
        },
        Ok(InboundFrame::Response { error, payload }) => {
            resolve_response(shared, error, payload).await;
        },
        Ok(InboundFrame::Other { body }) => {
            debug!(%body, "Ignoring non-protocol frame");
        },
    }
}

/// Route a push event to subscribers of its sanitized type.
async fn dispatch_push(shared: &Shared, event_type: &str, data: Value) {
    let key = frame::sanitize_event_type(event_type);
    let mut registry = shared.registry.lock().await;
    match registry.get_mut(&key) {
        None => debug!(event = %key, "Push event with no subscribers"),
        Some(slots) => {
            slots.retain(|tx| match tx.try_send(data.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(event = %key, "Push subscriber lagging, event dropped");
                    true
                },
                Err(TrySendError::Closed(_)) => false,
            });
            if slots.is_empty() {
                registry.remove(&key);
            }
        },
    }
}

/// Match a response to the oldest in-flight request.
async fn resolve_response(shared: &Shared, error: Option<Value>, payload: Value) {
    // An error-shaped response while the handshake waiter is armed settles
    // the handshake; the queue is empty at that point.
    if let Some(tx) = shared.auth_waiter.lock().await.take() {
        let msg = error
            .as_ref()
            .map(error_message)
            .unwrap_or_else(|| "unexpected handshake acknowledgement".to_string());
        warn!(%msg, "Authentication rejected");
        let _ = tx.send(Err(SocketError::Auth(msg)));
        return;
    }

    let mut pending = shared.pending.lock().await;
    match pending.resolve_head() {
        None => warn!("Received response with no pending requests"),
        Some(entry) => match entry.waiter {
            None => debug!(seq = entry.seq, "Late response consumed by timed-out slot"),
            Some(tx) => {
                let result = match error {
                    Some(err) => Err(SocketError::Remote(error_message(&err))),
                    None if payload.is_null() => Err(SocketError::EmptyResponse),
                    None => Ok(payload),
                };
                debug!(
                    seq = entry.seq,
                    method = %entry.method,
                    service = %entry.service,
                    elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "Socket response matched"
                );
                let _ = tx.send(result);
            },
        },
    }
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Reject all in-flight state and flip to Disconnected.
async fn teardown(shared: &Shared, reason: &str) {
    shared.set_state(ConnectionState::Disconnected);

    if let Some(tx) = shared.auth_waiter.lock().await.take() {
        let _ = tx.send(Err(SocketError::ConnectionLost(reason.to_string())));
    }

    let entries = shared.pending.lock().await.drain();
    let rejected = entries.len();
    for entry in entries {
        if let Some(tx) = entry.waiter {
            let _ = tx.send(Err(SocketError::ConnectionLost(reason.to_string())));
        }
    }
    if rejected > 0 {
        warn!(rejected, reason, "Rejected in-flight requests");
    }

    // Dropping the senders ends every subscription stream.
    shared.registry.lock().await.clear();

    info!(reason, "Marketplace socket closed");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{ChannelTransport, PeerHandle};

    async fn connected() -> (MarketSocket, PeerHandle) {
        let (transport, mut peer) = ChannelTransport::pair();
        let connect = MarketSocket::connect(transport, SocketConfig::new("jwt-test"));
        let accept = async {
            let auth = peer.next_sent().await.unwrap();
            assert!(auth.starts_with("420[\"create\",\"security/session\""));
            peer.ack_auth("u-1", "tester").await;
            peer
        };
        let (socket, peer) = tokio::join!(connect, accept);
        (socket.unwrap(), peer)
    }

    fn short_timeouts(token: &str) -> SocketConfig {
        let mut config = SocketConfig::new(token);
        config.request_timeout = Duration::from_millis(50);
        config.auth_timeout = Duration::from_millis(100);
        config
    }

    // -------------------------------------------------------------------
    // Pending queue
    // -------------------------------------------------------------------

    fn waiter() -> (Waiter, oneshot::Receiver<Result<Value, SocketError>>) {
        oneshot::channel()
    }

    #[test]
    fn test_pending_queue_fifo_and_seq() {
        let mut queue = PendingQueue::new();
        let (tx1, _rx1) = waiter();
        let (tx2, _rx2) = waiter();
        let a = queue.push("find", "market/listing", tx1);
        let b = queue.push("create", "market/listing", tx2);
        assert!(a < b);
        assert_eq!(queue.len(), 2);

        let head = queue.resolve_head().unwrap();
        assert_eq!(head.seq, a);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pending_queue_tombstone_keeps_position() {
        let mut queue = PendingQueue::new();
        let (tx1, _rx1) = waiter();
        let (tx2, _rx2) = waiter();
        let a = queue.push("find", "svc", tx1);
        let b = queue.push("find", "svc", tx2);

        assert!(queue.tombstone(a));
        assert_eq!(queue.len(), 2);

        // The dead slot is still the head and absorbs the next response.
        let head = queue.resolve_head().unwrap();
        assert_eq!(head.seq, a);
        assert!(head.waiter.is_none());

        let live = queue.resolve_head().unwrap();
        assert_eq!(live.seq, b);
        assert!(live.waiter.is_some());
    }

    #[test]
    fn test_pending_queue_remove_mid_queue() {
        let mut queue = PendingQueue::new();
        let (tx1, _rx1) = waiter();
        let (tx2, _rx2) = waiter();
        let (tx3, _rx3) = waiter();
        let a = queue.push("m", "s", tx1);
        let b = queue.push("m", "s", tx2);
        let c = queue.push("m", "s", tx3);

        assert_eq!(queue.remove(b).unwrap().seq, b);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.resolve_head().unwrap().seq, a);
        assert_eq!(queue.resolve_head().unwrap().seq, c);
        assert!(!queue.tombstone(b));
    }

    // -------------------------------------------------------------------
    // Handshake
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_connect_authenticates_and_exposes_session() {
        let (socket, _peer) = connected().await;
        assert_eq!(socket.state(), ConnectionState::Ready);
        let session = socket.session().await.unwrap();
        assert_eq!(session.user_id.as_str(), "u-1");
        assert_eq!(session.username, "tester");
        socket.close().await;
    }

    #[tokio::test]
    async fn test_connect_rejected_handshake() {
        let (transport, mut peer) = ChannelTransport::pair();
        let connect = MarketSocket::connect(transport, short_timeouts("bad-jwt"));
        let accept = async {
            let _ = peer.next_sent().await;
            peer.respond_err(json!({ "name": "NotAuthenticated", "message": "invalid token" }))
                .await;
        };
        let (result, _) = tokio::join!(connect, accept);
        match result {
            Err(SocketError::Auth(msg)) => assert!(msg.contains("invalid token")),
            other => panic!("expected auth error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_connect_times_out_without_ack() {
        let (transport, mut peer) = ChannelTransport::pair();
        let connect = MarketSocket::connect(transport, short_timeouts("jwt"));
        let silent_peer = async {
            let _ = peer.next_sent().await;
            // Never acknowledge.
        };
        let (result, _) = tokio::join!(connect, silent_peer);
        assert!(matches!(result, Err(SocketError::Auth(_))));
    }

    #[tokio::test]
    async fn test_connect_fails_when_peer_drops_mid_handshake() {
        let (transport, mut peer) = ChannelTransport::pair();
        let connect = MarketSocket::connect(transport, short_timeouts("jwt"));
        let dropper = async {
            let _ = peer.next_sent().await;
            peer.close();
        };
        let (result, _) = tokio::join!(connect, dropper);
        assert!(matches!(result, Err(SocketError::ConnectionLost(_))));
    }

    // -------------------------------------------------------------------
    // Correlation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_fifo_correlation_across_concurrent_calls() {
        let (socket, mut peer) = connected().await;
        let socket = Arc::new(socket);

        let mut calls = Vec::new();
        for i in 0..3 {
            let socket = socket.clone();
            calls.push(tokio::spawn(async move {
                socket
                    .call_raw("find", "market/listing", json!({ "page": i }))
                    .await
            }));
        }

        // Wait for all three frames, then answer in send order.
        let mut sent = Vec::new();
        for _ in 0..3 {
            sent.push(peer.next_sent().await.unwrap());
        }
        for i in 0..3 {
            peer.respond_ok(json!({ "answer": i })).await;
        }

        for (i, call) in calls.into_iter().enumerate() {
            let value = call.await.unwrap().unwrap();
            assert_eq!(value["answer"], i as u64);
        }
        assert_eq!(socket.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_does_not_shift_neighbors() {
        let (transport, mut peer) = ChannelTransport::pair();
        let connect = MarketSocket::connect(transport, short_timeouts("jwt"));
        let accept = async {
            let _ = peer.next_sent().await;
            peer.ack_auth("u-1", "tester").await;
            peer
        };
        let (socket, mut peer) = tokio::join!(connect, accept);
        let socket = Arc::new(socket.unwrap());

        // First request is never answered inside its timeout.
        let first = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.call_raw("find", "svc", json!({ "n": 1 })).await })
        };
        let _ = peer.next_sent().await;
        let first_err = first.await.unwrap();
        assert!(matches!(first_err, Err(SocketError::Timeout)));
        assert_eq!(socket.pending_requests().await, 1); // tombstone holds the slot

        // Second request goes out while the dead slot is still queued.
        let second = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.call_raw("find", "svc", json!({ "n": 2 })).await })
        };
        let _ = peer.next_sent().await;

        // The late response for the first request lands on the tombstone;
        // the next one resolves the second call with its own payload.
        peer.respond_ok(json!({ "for": 1 })).await;
        peer.respond_ok(json!({ "for": 2 })).await;

        let value = second.await.unwrap().unwrap();
        assert_eq!(value["for"], 2);
        assert_eq!(socket.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_rejects_every_outstanding_call_once() {
        let (socket, mut peer) = connected().await;
        let socket = Arc::new(socket);

        let mut calls = Vec::new();
        for _ in 0..2 {
            let socket = socket.clone();
            calls.push(tokio::spawn(async move {
                socket.call_raw("find", "svc", json!({})).await
            }));
        }
        for _ in 0..2 {
            let _ = peer.next_sent().await;
        }

        peer.close();

        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(SocketError::ConnectionLost(_))));
        }
        assert_eq!(socket.pending_requests().await, 0);

        // Further calls fail fast once the state flipped.
        let mut state = socket.state_watch();
        while *state.borrow() != ConnectionState::Disconnected {
            state.changed().await.unwrap();
        }
        assert!(matches!(
            socket.call_raw("find", "svc", json!({})).await,
            Err(SocketError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_remote_error_and_empty_response() {
        let (socket, mut peer) = connected().await;
        let socket = Arc::new(socket);

        let failing = {
            let socket = socket.clone();
            tokio::spawn(
                async move { socket.call_raw("create", "market/listing", json!({})).await },
            )
        };
        let _ = peer.next_sent().await;
        peer.respond_err(json!({ "name": "BadRequest", "message": "listing is gone" })).await;
        match failing.await.unwrap() {
            Err(SocketError::Remote(msg)) => assert_eq!(msg, "listing is gone"),
            other => panic!("expected remote error, got {:?}", other),
        }

        let empty = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.call_raw("find", "svc", json!({})).await })
        };
        let _ = peer.next_sent().await;
        peer.respond_ok(Value::Null).await;
        assert!(matches!(empty.await.unwrap(), Err(SocketError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_send_failure_removes_entry_without_disturbing_later_calls() {
        let (socket, mut peer) = connected().await;
        let socket = Arc::new(socket);

        peer.fail_next_send();
        let doomed = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.call_raw("find", "svc", json!({ "n": 1 })).await })
        };
        assert!(matches!(doomed.await.unwrap(), Err(SocketError::Transport(_))));
        assert_eq!(socket.pending_requests().await, 0);

        let healthy = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.call_raw("find", "svc", json!({ "n": 2 })).await })
        };
        let _ = peer.next_sent().await;
        peer.respond_ok(json!({ "for": 2 })).await;
        assert_eq!(healthy.await.unwrap().unwrap()["for"], 2);
    }

    // -------------------------------------------------------------------
    // Push events
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_push_routed_to_sanitized_subscription() {
        let (socket, mut peer) = connected().await;

        // Subscribing with the raw form keys off the sanitized one.
        let mut sub = socket.subscribe("system/notification pushed").await;
        assert_eq!(sub.event_type(), "system/notification_pushed");

        peer.push("system/notification pushed", json!({ "_id": "n1" })).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event["_id"], "n1");

        // Unknown event types are dropped without affecting the stream.
        peer.push("social/message pushed", json!({ "_id": "m1" })).await;
        peer.push("system/notification pushed", json!({ "_id": "n2" })).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event["_id"], "n2");

        socket.close().await;
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let (socket, mut peer) = connected().await;

        let sub = socket.subscribe("system/notification pushed").await;
        drop(sub);

        // First event prunes the dead slot, second finds no subscribers;
        // neither may disturb request correlation.
        peer.push("system/notification pushed", json!({ "_id": "n1" })).await;
        peer.push("system/notification pushed", json!({ "_id": "n2" })).await;

        let socket = Arc::new(socket);
        let call = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.call_raw("find", "svc", json!({})).await })
        };
        let _ = peer.next_sent().await;
        peer.respond_ok(json!({ "ok": true })).await;
        assert!(call.await.unwrap().is_ok());
    }
}
