//! Marketplace REST adapter for the offer gateway port.

use async_trait::async_trait;

use sutler_connectors::{MarketRestClient, RestError};
use sutler_domain::{ListingId, OfferId, TradeOffer, UserId};

use crate::error::{OfferError, OfferResult};
use crate::ports::OfferGateway;

impl From<RestError> for OfferError {
    fn from(e: RestError) -> Self {
        match e {
            RestError::Decode(msg) => OfferError::Decode(msg),
            other => OfferError::Gateway(other.to_string()),
        }
    }
}

/// Offer gateway backed by the marketplace REST client.
///
/// Offer queries are scoped to one user, so the adapter carries the
/// authenticated session's user id alongside the client.
pub struct RestOfferGateway {
    client: MarketRestClient,
    user_id: UserId,
}

impl RestOfferGateway {
    /// Create a gateway for the given authenticated user.
    pub fn new(client: MarketRestClient, user_id: UserId) -> Self {
        Self { client, user_id }
    }
}

#[async_trait]
impl OfferGateway for RestOfferGateway {
    async fn fetch_incoming(&self) -> OfferResult<Vec<TradeOffer>> {
        Ok(self.client.incoming_offers(&self.user_id).await?)
    }

    async fn fetch_outgoing(&self) -> OfferResult<Vec<TradeOffer>> {
        Ok(self.client.outgoing_offers(&self.user_id).await?)
    }

    async fn accept(&self, listing: &ListingId, offer: &OfferId) -> OfferResult<()> {
        self.client.accept_offer(listing, offer).await?;
        Ok(())
    }

    async fn unaccept(&self, listing: &ListingId) -> OfferResult<()> {
        self.client.unaccept_offer(listing).await?;
        Ok(())
    }

    async fn reject(&self, offer: &OfferId) -> OfferResult<()> {
        Ok(self.client.reject_offer(offer).await?)
    }

    // Revoking our own offer and rejecting someone else's hit the same
    // endpoint with the same body; the marketplace keys off the caller.
    async fn revoke(&self, offer: &OfferId) -> OfferResult<()> {
        Ok(self.client.reject_offer(offer).await?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_error_mapping_preserves_decode() {
        let decode: OfferError = RestError::Decode("bad json".to_string()).into();
        assert!(matches!(decode, OfferError::Decode(msg) if msg == "bad json"));

        let auth: OfferError = RestError::AuthExpired.into();
        assert!(matches!(auth, OfferError::Gateway(msg) if msg.contains("token")));

        let api: OfferError =
            RestError::Api { status: 404, message: "listing is gone".to_string() }.into();
        assert!(matches!(api, OfferError::Gateway(msg) if msg.contains("listing is gone")));
    }
}
