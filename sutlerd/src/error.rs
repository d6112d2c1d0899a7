//! Daemon error types.

use sutler_connectors::{RestError, SocketError};
use sutler_domain::DomainError;
use sutler_offers::OfferError;
use sutler_queue::QueueError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Marketplace socket error
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    /// Marketplace REST error
    #[error("REST error: {0}")]
    Rest(#[from] RestError),

    /// Pending listing queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Offer view error
    #[error("Offer error: {0}")]
    Offer(#[from] OfferError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
