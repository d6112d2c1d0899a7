//! Sutler Domain Layer
//!
//! Pure domain types for the marketplace sync core: zero I/O, no async.
//! Contains entities, value objects, and the small amount of domain logic
//! (query matching, notification classification) shared by every layer.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    ChatMessage, Conversation, Counterparty, IntentId, ItemQuery, ListingDraft, ListingKind,
    MarketListing, OfferDirection, Session, StashItem, SystemNotification, TradeOffer,
    NEW_OFFER_KIND,
};
pub use value_objects::{
    CandidateId, ConversationId, DomainError, GameMode, HrAmount, LadderStatus, ListingId,
    NotificationId, OfferId, UserId,
};
