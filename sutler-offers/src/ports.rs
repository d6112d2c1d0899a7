//! Offer view port definitions.

use async_trait::async_trait;

use sutler_domain::{ListingId, OfferId, TradeOffer};

use crate::error::OfferResult;

/// Port for the marketplace operations the offer view drives.
///
/// Implementations:
/// - `ScriptedGateway` - For testing (configurable offers, recorded mutations)
/// - `RestOfferGateway` - The real marketplace, backed by the REST client
#[async_trait]
pub trait OfferGateway: Send + Sync {
    /// Offers other users made on the current user's listings.
    async fn fetch_incoming(&self) -> OfferResult<Vec<TradeOffer>>;

    /// Offers the current user made on other users' listings.
    async fn fetch_outgoing(&self) -> OfferResult<Vec<TradeOffer>>;

    /// Accept an offer on one of the current user's listings.
    async fn accept(&self, listing: &ListingId, offer: &OfferId) -> OfferResult<()>;

    /// Withdraw a previously accepted offer on a listing.
    async fn unaccept(&self, listing: &ListingId) -> OfferResult<()>;

    /// Reject an incoming offer.
    async fn reject(&self, offer: &OfferId) -> OfferResult<()>;

    /// Revoke an outgoing offer the current user made.
    async fn revoke(&self, offer: &OfferId) -> OfferResult<()>;
}
