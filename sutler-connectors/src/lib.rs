//! Sutler Marketplace Connectors
//!
//! Adapters for the marketplace service (socket + REST).
//! Normalizes service-specific wire types to domain types.

#![warn(clippy::all)]

// Public modules
pub mod frame;
pub mod market_rest;
pub mod market_socket;
pub mod stub;
pub mod transport;

// Re-exports
pub use frame::{sanitize_event_type, FrameError, InboundFrame};
pub use market_rest::{AuthErrorHook, MarketRestClient, Paginated, RestConfig, RestError};
pub use market_socket::{
    ConnectionState, MarketSocket, PushSubscription, SocketConfig, SocketError,
};
pub use stub::{ChannelTransport, PeerHandle};
pub use transport::{Transport, TransportError, WsTransport};
