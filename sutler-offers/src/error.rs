//! Offer view error types.

use thiserror::Error;

/// Errors that can occur in the offer synchronization view.
#[derive(Debug, Clone, Error)]
pub enum OfferError {
    /// The marketplace gateway rejected or failed an operation
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A gateway response could not be interpreted
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result type for offer view operations.
pub type OfferResult<T> = Result<T, OfferError>;
