//! Domain Entities for the Sutler sync core
//!
//! Records exchanged with the marketplace service plus the local intent id.
//! All remote entities are caches of server state; the server stays the
//! source of truth and local copies are replaced on refetch.

use crate::value_objects::{
    CandidateId, ConversationId, DomainError, HrAmount, ListingId, NotificationId, OfferId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a queued listing intent (local, time-ordered)
pub type IntentId = Uuid;

/// Notification kind the marketplace emits when a listing receives an offer
pub const NEW_OFFER_KIND: &str = "offer_received";

// =============================================================================
// Stash items and queries
// =============================================================================

/// An item in the player's marketplace-synced stash.
///
/// The stash is synced from game state on a timescale of minutes, so a
/// freshly acquired item appears here with significant delay. `hash` is the
/// identity under which candidate classification operates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashItem {
    /// Stable identity of the item across stash snapshots
    pub hash: CandidateId,
    /// Item display name
    pub name: String,
    /// Item quality tier, when the sync reports one
    pub quality: Option<String>,
}

impl StashItem {
    /// Check whether this item satisfies a declared query.
    ///
    /// Name comparison is case-insensitive; a query without a quality
    /// constraint matches any quality.
    pub fn matches_query(&self, query: &ItemQuery) -> bool {
        if !self.name.eq_ignore_ascii_case(&query.name) {
            return false;
        }
        match (&query.quality, &self.quality) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        }
    }
}

/// The declared description of the item a user wants to list.
///
/// Deliberately coarse: stat-level matching belongs to the embedding
/// application, not this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuery {
    /// Item name, as the stash sync spells it
    pub name: String,
    /// Optional quality constraint
    pub quality: Option<String>,
}

impl ItemQuery {
    /// Create a query with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuery` if the name is empty
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::InvalidQuery("Item name cannot be empty".to_string()));
        }
        Ok(Self { name, quality: None })
    }

    /// Constrain the query to a quality tier
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }
}

// =============================================================================
// Listings
// =============================================================================

/// How a listing is priced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// Fixed HR price
    Exact,
    /// Free-text asking note, no fixed price
    Note,
}

/// The listing a queued intent will create once its item appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    /// Asking price in HR; zero for note-only listings
    pub hr_price: HrAmount,
    /// Free-text asking note shown on the listing
    pub note: String,
    /// Pricing kind, derived from the HR amount
    pub kind: ListingKind,
}

impl ListingDraft {
    /// Create a draft; the kind follows from whether an HR price is set
    pub fn new(hr_price: HrAmount, note: impl Into<String>) -> Self {
        let kind = if hr_price.is_zero() { ListingKind::Note } else { ListingKind::Exact };
        Self { hr_price, note: note.into(), kind }
    }
}

/// A listing owned by the current user, as the server reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    /// Server id of the listing
    pub id: ListingId,
    /// Owner of the listing
    pub user_id: UserId,
    /// Name of the listed item
    pub item_name: String,
    /// Stash identity of the listed item, when still known
    pub item_hash: Option<CandidateId>,
    /// Asking price in HR
    pub hr_price: HrAmount,
    /// Free-text asking note
    pub note: String,
    /// Offer the owner has accepted, if any
    pub accepted_offer_id: Option<OfferId>,
    /// Last time the listing was bumped to the top of search
    pub bumped_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
}

impl MarketListing {
    /// True once the owner has accepted one of the listing's offers
    pub fn has_accepted_offer(&self) -> bool {
        self.accepted_offer_id.is_some()
    }
}

// =============================================================================
// Offers
// =============================================================================

/// Whether an offer was made to us or by us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferDirection {
    /// Someone else offered on one of our listings
    Incoming,
    /// We offered on someone else's listing
    Outgoing,
}

/// The other party of a trade offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    /// Marketplace user id
    pub user_id: UserId,
    /// Display name
    pub username: String,
    /// In-game account name, when shared
    pub account: Option<String>,
}

/// A trade offer attached to a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOffer {
    /// Server id of the offer
    pub id: OfferId,
    /// Incoming or outgoing relative to the current user
    pub direction: OfferDirection,
    /// Who made (incoming) or received (outgoing) the offer
    pub counterparty: Counterparty,
    /// Name of the item the offer is for, when resolvable
    pub item_name: Option<String>,
    /// Offered amount in HR, when the offer is a fixed bid
    pub hr_amount: Option<HrAmount>,
    /// Free-text offer note
    pub note: Option<String>,
    /// Listing the offer belongs to
    pub listing_id: Option<ListingId>,
    /// Offer the listing owner accepted, if any
    pub accepted_offer_id: Option<OfferId>,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
}

impl TradeOffer {
    /// True if this very offer is the one the listing owner accepted
    pub fn is_accepted(&self) -> bool {
        self.accepted_offer_id.as_ref() == Some(&self.id)
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// A push notification delivered by the marketplace over the socket.
///
/// Delivery is at-least-once; consumers de-duplicate on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotification {
    /// Server id of the notification, the de-duplication key
    pub id: NotificationId,
    /// Notification kind, e.g. [`NEW_OFFER_KIND`]
    pub kind: String,
    /// Listing the notification refers to, for offer notifications
    pub listing_id: Option<ListingId>,
    /// Human-readable message, when the server provides one
    pub message: Option<String>,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
}

impl SystemNotification {
    /// Parse a notification from a raw push payload.
    ///
    /// Returns `None` for payloads that do not carry a notification shape;
    /// the caller decides whether that is worth a log line.
    pub fn from_push(payload: &serde_json::Value) -> Option<Self> {
        let wire: NotificationWire = serde_json::from_value(payload.clone()).ok()?;
        Some(Self {
            id: NotificationId::new(wire.id).ok()?,
            kind: wire.kind,
            listing_id: wire.data.and_then(|d| d.listing_id),
            message: wire.meta.and_then(|m| m.text),
            created_at: wire.created_at,
        })
    }

    /// True for the notification kind that should trigger an offer refresh
    pub fn is_new_offer(&self) -> bool {
        self.kind == NEW_OFFER_KIND && self.listing_id.is_some()
    }
}

#[derive(Deserialize)]
struct NotificationWire {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<NotificationData>,
    #[serde(default)]
    meta: Option<NotificationMeta>,
    #[serde(rename = "createdAt", default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct NotificationData {
    #[serde(default)]
    listing_id: Option<ListingId>,
}

#[derive(Deserialize)]
struct NotificationMeta {
    #[serde(rename = "string", default)]
    text: Option<String>,
}

// =============================================================================
// Session
// =============================================================================

/// The authenticated marketplace identity for this process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Server id of the authenticated user
    pub user_id: UserId,
    /// Display name of the authenticated user
    pub username: String,
}

impl Session {
    /// Extract the session identity from an authentication acknowledgement
    /// payload (`{ accessToken, user: { _id, username, ... }, ... }`).
    pub fn from_auth_payload(payload: &serde_json::Value) -> Option<Self> {
        let user = payload.get("user")?;
        let user_id = UserId::new(user.get("_id")?.as_str()?).ok()?;
        let username = user
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Some(Self { user_id, username })
    }
}

// =============================================================================
// Chat
// =============================================================================

/// A chat conversation header, as returned by the socket query path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server id of the conversation
    #[serde(rename = "_id")]
    pub id: ConversationId,
    /// Participant user ids
    #[serde(default)]
    pub participants: Vec<UserId>,
    /// Last activity time
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single chat message inside a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server id of the message
    #[serde(rename = "_id")]
    pub id: String,
    /// Conversation the message belongs to
    pub conversation_id: ConversationId,
    /// Author of the message
    pub user_id: UserId,
    /// Message body
    #[serde(rename = "message")]
    pub body: String,
    /// Creation time
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Tests
// =============================================================================
