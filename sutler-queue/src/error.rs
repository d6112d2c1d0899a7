//! Pending-queue error types.

use sutler_domain::IntentId;
use thiserror::Error;

/// Errors that can occur in the pending listing queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Marketplace adapter error (stash lookup or listing creation)
    #[error("Market error: {0}")]
    Market(String),

    /// Registry bookkeeping error
    #[error("Registry error: {0}")]
    Registry(String),

    /// Intent with this id is already queued
    #[error("Intent already queued: {0}")]
    DuplicateIntent(IntentId),

    /// No queued intent with this id
    #[error("Intent not found: {0}")]
    IntentNotFound(IntentId),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] sutler_domain::DomainError),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
