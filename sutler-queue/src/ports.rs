//! Queue port definitions.
//!
//! Ports define the two collaborators the pending queue drives. Adapters
//! implement them for the real marketplace or for tests; the queue itself
//! never interprets a candidate beyond its identity.

use async_trait::async_trait;

use sutler_domain::{ItemQuery, ListingDraft, MarketListing, StashItem};

use crate::error::QueueError;

/// Port for the marketplace operations the pending queue drives.
///
/// Implementations:
/// - `ScriptedMarket` - For testing (configurable stash, immediate listings)
/// - `StashLookup` - The real marketplace, backed by the REST client
#[async_trait]
pub trait ListingMarket: Send + Sync {
    /// Candidates currently satisfying the declared query.
    ///
    /// The stash view trails game state by minutes; the queue polls this
    /// until the item an intent waits for shows up.
    async fn lookup(&self, query: &ItemQuery) -> Result<Vec<StashItem>, QueueError>;

    /// Create the listing for a chosen candidate.
    ///
    /// Callers must treat any error as "outcome unknown": the listing may or
    /// may not exist server-side, so the call is never blindly retried.
    async fn execute(
        &self,
        candidate: &StashItem,
        draft: &ListingDraft,
    ) -> Result<MarketListing, QueueError>;
}
