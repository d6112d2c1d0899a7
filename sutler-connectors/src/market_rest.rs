//! Marketplace REST API Client
//!
//! REST integration for the listing and offer services:
//! - Stash item queries (the marketplace-synced view of the player stash)
//! - Listing create / update / delete
//! - Offer queries and the accept / unaccept / reject mutations
//!
//! # Authentication
//!
//! Every request carries the session JWT as a `Authorization: Bearer` header.
//! A `401` answer means the token expired server-side; the client reports it
//! as [`RestError::AuthExpired`] and fires the configured auth-error hook so
//! the embedder can start a re-login.
//!
//! # Query encoding
//!
//! The service expects nested query documents flattened into bracketed keys:
//! `{"$resolve": {"offers": {"user": true}}}` becomes
//! `$resolve[offers][user]=true`, arrays index their elements
//! (`hash[$in][0]=..`). [`query_pairs`] implements exactly that flattening.

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use sutler_domain::{
    CandidateId, Counterparty, GameMode, LadderStatus, ListingDraft, ListingId, MarketListing,
    OfferDirection, OfferId, StashItem, TradeOffer, UserId,
};

// =============================================================================
// Constants
// =============================================================================

/// Marketplace REST API base URL
const RUNEMARKET_API_URL: &str = "https://api.runemarket.net";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Page size for stash queries; stashes are bounded well below this
const STASH_PAGE_LIMIT: u32 = 1000;

/// Page size for listing and offer queries
const MARKET_PAGE_LIMIT: u32 = 100;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the marketplace REST client.
#[derive(Debug, Clone, Error)]
pub enum RestError {
    /// The session token was rejected; a re-login is required
    #[error("Access token rejected")]
    AuthExpired,

    /// API answered with an error document
    #[error("Marketplace API error: {status} - {message}")]
    Api {
        /// HTTP status of the response
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Failed to parse a response body
    #[error("Failed to parse response: {0}")]
    Decode(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,
}

/// Callback fired when the service rejects the session token.
pub type AuthErrorHook = Arc<dyn Fn() + Send + Sync>;

// =============================================================================
// Configuration
// =============================================================================

/// REST client configuration.
///
/// The game mode and ladder flag scope every created listing to one of the
/// four marketplace economies; they never cross over.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL of the marketplace API
    pub base_url: String,
    /// Session JWT presented on every request
    pub access_token: String,
    /// Economy the user plays in
    pub game_mode: GameMode,
    /// Seasonal or permanent economy
    pub ladder: LadderStatus,
}

impl RestConfig {
    /// Configuration against the production API, softcore ladder economy.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: RUNEMARKET_API_URL.to_string(),
            access_token: access_token.into(),
            game_mode: GameMode::Softcore,
            ladder: LadderStatus::Ladder,
        }
    }
}

// =============================================================================
// Pagination envelope
// =============================================================================

/// The paginated list envelope every `find` endpoint answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct Paginated<T> {
    /// Total matching documents server-side
    pub total: u64,
    /// Page size the server applied
    pub limit: u64,
    /// Offset of this page
    pub skip: u64,
    /// The page itself
    pub data: Vec<T>,
}

impl<T> Paginated<T> {
    /// Consume the envelope, keeping only the page data.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }
}

// =============================================================================
// Marketplace REST Client
// =============================================================================

/// Marketplace REST API client.
///
/// The client is immutable after construction; a token refresh means
/// building a new client. Cloning is cheap and clones share the hook.
#[derive(Clone)]
pub struct MarketRestClient {
    client: Client,
    base_url: String,
    access_token: String,
    game_mode: GameMode,
    ladder: LadderStatus,
    auth_error_hook: Option<AuthErrorHook>,
}

impl MarketRestClient {
    /// Create a new REST client.
    pub fn new(config: RestConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url,
            access_token: config.access_token,
            game_mode: config.game_mode,
            ladder: config.ladder,
            auth_error_hook: None,
        }
    }

    /// Attach a callback fired whenever the service rejects the token.
    pub fn with_auth_error_hook(mut self, hook: AuthErrorHook) -> Self {
        self.auth_error_hook = Some(hook);
        self
    }

    /// Send one request and return the raw response body.
    async fn send_request(
        &self,
        method: Method,
        path: &str,
        query: Option<&Value>,
        body: Option<&Value>,
    ) -> Result<String, RestError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.access_token);
        if let Some(query) = query {
            request = request.query(&query_pairs(query));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send())
            .await
            .map_err(|_| RestError::Timeout)?
            .map_err(|e| RestError::Http(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| RestError::Decode(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED {
            warn!(path, "Session token rejected");
            if let Some(hook) = &self.auth_error_hook {
                hook();
            }
            return Err(RestError::AuthExpired);
        }
        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &text));
        }

        Ok(text)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &Value) -> Result<T, RestError> {
        let body = self.send_request(Method::GET, path, Some(query), None).await?;
        serde_json::from_str(&body).map_err(|e| RestError::Decode(e.to_string()))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, RestError> {
        let text = self.send_request(Method::POST, path, None, Some(body)).await?;
        serde_json::from_str(&text).map_err(|e| RestError::Decode(e.to_string()))
    }

    async fn patch<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, RestError> {
        let text = self.send_request(Method::PATCH, path, None, Some(body)).await?;
        serde_json::from_str(&text).map_err(|e| RestError::Decode(e.to_string()))
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let text = self.send_request(Method::DELETE, path, None, None).await?;
        serde_json::from_str(&text).map_err(|e| RestError::Decode(e.to_string()))
    }

    // =========================================================================
    // Stash API
    // =========================================================================

    /// Fetch the marketplace-synced stash of the authenticated user.
    ///
    /// # Endpoint
    ///
    /// `GET /market/item`
    pub async fn get_stash(&self) -> Result<Vec<StashItem>, RestError> {
        let page: Paginated<StashItemWire> = self
            .get("/market/item", &json!({ "$limit": STASH_PAGE_LIMIT }))
            .await?;
        page.data.into_iter().map(convert_stash_item).collect()
    }

    // =========================================================================
    // Listing API
    // =========================================================================

    /// Listings owned by the given user, with their offers resolved.
    ///
    /// # Endpoint
    ///
    /// `GET /market/listing`
    pub async fn own_listings(&self, user: &UserId) -> Result<Vec<MarketListing>, RestError> {
        let page = self.own_listings_wire(user).await?;
        page.data.iter().map(convert_listing).collect()
    }

    /// Create a listing for a stash item.
    ///
    /// The listing carries the full item document plus the economy flags;
    /// `price` is the free-text note, `hr_price` the fixed amount.
    ///
    /// # Endpoint
    ///
    /// `POST /market/listing`
    pub async fn create_listing(
        &self,
        user: &UserId,
        item: &StashItem,
        draft: &ListingDraft,
    ) -> Result<MarketListing, RestError> {
        let body = json!({
            "user_id": user.as_str(),
            "type": "item",
            "is_hardcore": self.game_mode.is_hardcore(),
            "is_ladder": self.ladder.is_ladder(),
            "item": {
                "hash": item.hash.as_str(),
                "name": item.name,
                "quality": item.quality,
            },
            "hr_price": draft.hr_price.as_decimal(),
            "price": draft.note,
            "bumped_at": Utc::now(),
        });
        let wire: ListingWire = self.post("/market/listing", &body).await?;
        debug!(listing = %wire.id, item = %item.hash, "Listing created");
        convert_listing(&wire)
    }

    /// Patch arbitrary listing fields (price or note edits, bumps).
    ///
    /// # Endpoint
    ///
    /// `PATCH /market/listing/:id`
    pub async fn update_listing(
        &self,
        listing: &ListingId,
        patch: &Value,
    ) -> Result<MarketListing, RestError> {
        let path = format!("/market/listing/{}", listing.as_str());
        let wire: ListingWire = self.patch(&path, patch).await?;
        convert_listing(&wire)
    }

    /// Remove a listing.
    ///
    /// # Endpoint
    ///
    /// `DELETE /market/listing/:id`
    pub async fn delete_listing(&self, listing: &ListingId) -> Result<(), RestError> {
        let path = format!("/market/listing/{}", listing.as_str());
        let _removed: Value = self.delete(&path).await?;
        debug!(listing = %listing, "Listing deleted");
        Ok(())
    }

    // =========================================================================
    // Offer API
    // =========================================================================

    /// Offers other users made on the given user's listings.
    ///
    /// Derived from the listings themselves: the listing query resolves its
    /// offers and their senders, and rejected offers are dropped here.
    pub async fn incoming_offers(&self, user: &UserId) -> Result<Vec<TradeOffer>, RestError> {
        let page = self.own_listings_wire(user).await?;
        let mut offers = Vec::new();
        for listing in &page.data {
            offers.extend(incoming_offers_of(listing)?);
        }
        Ok(offers)
    }

    /// Offers the given user made on other users' listings.
    ///
    /// # Endpoint
    ///
    /// `GET /market/offer`
    pub async fn outgoing_offers(&self, user: &UserId) -> Result<Vec<TradeOffer>, RestError> {
        let query = json!({
            "user_id": user.as_str(),
            "$resolve": {
                "listing": { "user": true },
                "listing_archive": { "user": true },
            },
            "$sort": { "updated_at": -1 },
            "$limit": MARKET_PAGE_LIMIT,
        });
        let page: Paginated<OfferWire> = self.get("/market/offer", &query).await?;

        let mut offers = Vec::new();
        for wire in page.data {
            if let Some(offer) = convert_outgoing(wire)? {
                offers.push(offer);
            }
        }
        Ok(offers)
    }

    /// Accept an offer on one of the user's own listings.
    ///
    /// Acceptance lives on the listing: the listing's `accepted_offer_id`
    /// points at the chosen offer.
    ///
    /// # Endpoint
    ///
    /// `PATCH /market/listing/:id`
    pub async fn accept_offer(
        &self,
        listing: &ListingId,
        offer: &OfferId,
    ) -> Result<MarketListing, RestError> {
        let patch = json!({ "accepted_offer_id": offer.as_str() });
        let updated = self.update_listing(listing, &patch).await?;
        debug!(listing = %listing, offer = %offer, "Offer accepted");
        Ok(updated)
    }

    /// Withdraw a previously accepted offer, reopening the listing.
    ///
    /// # Endpoint
    ///
    /// `PATCH /market/listing/:id`
    pub async fn unaccept_offer(&self, listing: &ListingId) -> Result<MarketListing, RestError> {
        let patch = json!({ "accepted_offer_id": null });
        let updated = self.update_listing(listing, &patch).await?;
        debug!(listing = %listing, "Accepted offer withdrawn");
        Ok(updated)
    }

    /// Mark an offer rejected.
    ///
    /// Rejecting an incoming offer and revoking one's own outgoing offer are
    /// the same mutation; only who calls it differs.
    ///
    /// # Endpoint
    ///
    /// `PATCH /market/offer/:id`
    pub async fn reject_offer(&self, offer: &OfferId) -> Result<(), RestError> {
        let path = format!("/market/offer/{}", offer.as_str());
        let _updated: Value = self.patch(&path, &json!({ "rejected": true })).await?;
        debug!(offer = %offer, "Offer rejected");
        Ok(())
    }

    async fn own_listings_wire(&self, user: &UserId) -> Result<Paginated<ListingWire>, RestError> {
        let query = json!({
            "user_id": user.as_str(),
            "$resolve": { "offers": { "user": true } },
            "$sort": { "bumped_at": -1 },
            "$limit": MARKET_PAGE_LIMIT,
        });
        self.get("/market/listing", &query).await
    }
}

// =============================================================================
// Query flattening
// =============================================================================

/// Flatten a nested query document into bracketed key/value pairs.
fn query_pairs(query: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Value::Object(map) = query {
        for (key, value) in map {
            flatten_into(key.clone(), value, &mut pairs);
        }
    }
    pairs
}

fn flatten_into(prefix: String, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                flatten_into(format!("{prefix}[{key}]"), inner, pairs);
            }
        },
        Value::Array(items) => {
            for (idx, inner) in items.iter().enumerate() {
                flatten_into(format!("{prefix}[{idx}]"), inner, pairs);
            }
        },
        Value::String(s) => pairs.push((prefix, s.clone())),
        Value::Bool(b) => pairs.push((prefix, b.to_string())),
        Value::Number(n) => pairs.push((prefix, n.to_string())),
        Value::Null => pairs.push((prefix, "null".to_string())),
    }
}

// =============================================================================
// Error body
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiErrorWire {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn parse_api_error(status: u16, body: &str) -> RestError {
    if let Ok(err) = serde_json::from_str::<ApiErrorWire>(body) {
        if let Some(message) = err.message.or(err.name) {
            return RestError::Api { status, message };
        }
    }
    RestError::Http(format!("HTTP {status}: {body}"))
}

// =============================================================================
// Wire types (from API responses)
// =============================================================================

/// Stash item document.
#[derive(Debug, Clone, Deserialize)]
struct StashItemWire {
    hash: String,
    name: String,
    #[serde(default)]
    quality: Option<String>,
}

/// User document, resolved into listings and offers.
///
/// In-game accounts live under the `game` sub-document; the first entry is
/// the account the trade happens on.
#[derive(Debug, Clone, Deserialize)]
struct UserWire {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    game: Option<GameAccountsWire>,
}

#[derive(Debug, Clone, Deserialize)]
struct GameAccountsWire {
    #[serde(default)]
    accounts: Vec<String>,
}

/// Item sub-document embedded in a listing.
#[derive(Debug, Clone, Deserialize)]
struct ItemWire {
    name: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    quality: Option<String>,
}

/// Listing document, optionally with `$resolve`d offers and owner.
///
/// `price` is the free-text note despite the name; the fixed amount is
/// `hr_price`.
#[derive(Debug, Clone, Deserialize)]
struct ListingWire {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    #[serde(default)]
    item: Option<ItemWire>,
    #[serde(default)]
    hr_price: Option<Decimal>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    accepted_offer_id: Option<String>,
    #[serde(default)]
    bumped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    offers: Option<Vec<OfferWire>>,
    #[serde(default)]
    user: Option<UserWire>,
}

/// Offer document, optionally with `$resolve`d sender and listing.
///
/// Mirrors the listing's naming split: `offer` is the free-text note,
/// `hr_offer` the amount. Offers on listings that were since sold or
/// removed resolve through `listing_archive` instead of `listing`.
#[derive(Debug, Clone, Deserialize)]
struct OfferWire {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    #[serde(default)]
    listing_id: Option<String>,
    #[serde(default)]
    hr_offer: Option<Decimal>,
    #[serde(default)]
    offer: Option<String>,
    #[serde(default)]
    rejected: Option<bool>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user: Option<UserWire>,
    #[serde(default)]
    listing: Option<Box<ListingWire>>,
    #[serde(default)]
    listing_archive: Option<Box<ListingWire>>,
}

// =============================================================================
// Wire -> domain conversion
// =============================================================================

fn decode_err(e: impl std::fmt::Display) -> RestError {
    RestError::Decode(e.to_string())
}

fn convert_stash_item(wire: StashItemWire) -> Result<StashItem, RestError> {
    Ok(StashItem {
        hash: CandidateId::new(wire.hash).map_err(decode_err)?,
        name: wire.name,
        quality: wire.quality,
    })
}

fn convert_listing(wire: &ListingWire) -> Result<MarketListing, RestError> {
    let hr_price = sutler_domain::HrAmount::new(wire.hr_price.unwrap_or_default())
        .map_err(decode_err)?;
    Ok(MarketListing {
        id: ListingId::new(&wire.id).map_err(decode_err)?,
        user_id: UserId::new(&wire.user_id).map_err(decode_err)?,
        item_name: wire
            .item
            .as_ref()
            .map(|item| item.name.clone())
            .unwrap_or_default(),
        item_hash: match wire.item.as_ref().and_then(|item| item.hash.as_deref()) {
            Some(hash) => Some(CandidateId::new(hash).map_err(decode_err)?),
            None => None,
        },
        hr_price,
        note: wire.price.clone().unwrap_or_default(),
        accepted_offer_id: match &wire.accepted_offer_id {
            Some(id) => Some(OfferId::new(id).map_err(decode_err)?),
            None => None,
        },
        bumped_at: wire.bumped_at,
        created_at: wire.created_at,
    })
}

fn convert_counterparty(wire: &UserWire) -> Result<Counterparty, RestError> {
    Ok(Counterparty {
        user_id: UserId::new(&wire.id).map_err(decode_err)?,
        username: wire.username.clone().unwrap_or_default(),
        account: wire
            .game
            .as_ref()
            .and_then(|game| game.accounts.first().cloned()),
    })
}

/// Live (non-rejected) offers on one of our listings.
fn incoming_offers_of(listing: &ListingWire) -> Result<Vec<TradeOffer>, RestError> {
    let Some(wires) = &listing.offers else {
        return Ok(Vec::new());
    };

    let listing_id = ListingId::new(&listing.id).map_err(decode_err)?;
    let accepted = match &listing.accepted_offer_id {
        Some(id) => Some(OfferId::new(id).map_err(decode_err)?),
        None => None,
    };

    let mut offers = Vec::new();
    for wire in wires {
        if wire.rejected.unwrap_or(false) {
            continue;
        }
        let counterparty = match &wire.user {
            Some(user) => convert_counterparty(user)?,
            // Sender not resolved; fall back to the bare id.
            None => Counterparty {
                user_id: UserId::new(&wire.user_id).map_err(decode_err)?,
                username: String::new(),
                account: None,
            },
        };
        offers.push(TradeOffer {
            id: OfferId::new(&wire.id).map_err(decode_err)?,
            direction: OfferDirection::Incoming,
            counterparty,
            item_name: listing.item.as_ref().map(|item| item.name.clone()),
            hr_amount: match wire.hr_offer {
                Some(amount) => Some(sutler_domain::HrAmount::new(amount).map_err(decode_err)?),
                None => None,
            },
            note: wire.offer.clone(),
            listing_id: Some(listing_id.clone()),
            accepted_offer_id: accepted.clone(),
            created_at: wire.created_at,
        });
    }
    Ok(offers)
}

/// One of our own offers on someone else's listing.
///
/// Sold or removed listings resolve through `listing_archive`; the offer is
/// skipped only when neither document came back. Rejected offers are skipped
/// outright.
fn convert_outgoing(wire: OfferWire) -> Result<Option<TradeOffer>, RestError> {
    if wire.rejected.unwrap_or(false) {
        return Ok(None);
    }
    let Some(listing) = wire.listing.as_ref().or(wire.listing_archive.as_ref()) else {
        debug!(offer = %wire.id, "Outgoing offer without resolved listing, skipped");
        return Ok(None);
    };
    let Some(owner) = &listing.user else {
        debug!(offer = %wire.id, "Outgoing offer without resolved listing owner, skipped");
        return Ok(None);
    };

    Ok(Some(TradeOffer {
        id: OfferId::new(&wire.id).map_err(decode_err)?,
        direction: OfferDirection::Outgoing,
        counterparty: convert_counterparty(owner)?,
        item_name: listing.item.as_ref().map(|item| item.name.clone()),
        hr_amount: match wire.hr_offer {
            Some(amount) => Some(sutler_domain::HrAmount::new(amount).map_err(decode_err)?),
            None => None,
        },
        note: wire.offer.clone(),
        listing_id: match &wire.listing_id {
            Some(id) => Some(ListingId::new(id).map_err(decode_err)?),
            None => Some(ListingId::new(&listing.id).map_err(decode_err)?),
        },
        accepted_offer_id: match &listing.accepted_offer_id {
            Some(id) => Some(OfferId::new(id).map_err(decode_err)?),
            None => None,
        },
        created_at: wire.created_at,
    }))
}

// =============================================================================
// Tests
// =============================================================================
