//! Marketplace adapter for the pending listing queue.
//!
//! Implements the queue's lookup/execute port over the REST client. Stash
//! reads are cached briefly: one poll cycle fans out over every active
//! intent, and all of them should see the same stash snapshot instead of
//! each fetching its own.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use sutler_connectors::MarketRestClient;
use sutler_domain::{ItemQuery, ListingDraft, MarketListing, StashItem, UserId};
use sutler_queue::{ListingMarket, QueueError};

/// How long one stash snapshot serves consecutive lookups. Shorter than the
/// poll interval, so every cycle still sees fresh data.
const DEFAULT_STASH_TTL_SECS: u64 = 5;

// =============================================================================
// Stash Lookup
// =============================================================================

/// `ListingMarket` adapter backed by the marketplace REST API.
pub struct StashLookup {
    /// REST client for stash reads and listing creation
    client: MarketRestClient,
    /// Listings are created on behalf of this (session) user
    user: UserId,
    /// Maximum age of a cached stash snapshot
    cache_ttl: Duration,
    /// Snapshot shared by every lookup within one poll cycle
    cache: Mutex<Option<CachedStash>>,
}

struct CachedStash {
    items: Vec<StashItem>,
    fetched_at: Instant,
}

impl StashLookup {
    /// Create an adapter with the default snapshot lifetime.
    pub fn new(client: MarketRestClient, user: UserId) -> Self {
        Self::with_ttl(client, user, Duration::from_secs(DEFAULT_STASH_TTL_SECS))
    }

    /// Create an adapter with a custom snapshot lifetime.
    pub fn with_ttl(client: MarketRestClient, user: UserId, cache_ttl: Duration) -> Self {
        Self { client, user, cache_ttl, cache: Mutex::new(None) }
    }

    /// The current stash, fetched at most once per TTL window.
    async fn stash_snapshot(&self) -> Result<Vec<StashItem>, QueueError> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.items.clone());
            }
        }

        let items =
            self.client.get_stash().await.map_err(|e| QueueError::Market(e.to_string()))?;
        debug!(count = items.len(), "Stash snapshot refreshed");
        *cache = Some(CachedStash { items: items.clone(), fetched_at: Instant::now() });
        Ok(items)
    }
}

#[async_trait]
impl ListingMarket for StashLookup {
    async fn lookup(&self, query: &ItemQuery) -> Result<Vec<StashItem>, QueueError> {
        let stash = self.stash_snapshot().await?;
        Ok(stash.into_iter().filter(|item| item.matches_query(query)).collect())
    }

    async fn execute(
        &self,
        candidate: &StashItem,
        draft: &ListingDraft,
    ) -> Result<MarketListing, QueueError> {
        self.client
            .create_listing(&self.user, candidate, draft)
            .await
            .map_err(|e| QueueError::Market(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sutler_connectors::RestConfig;
    use sutler_domain::{GameMode, LadderStatus};

    fn unreachable_client() -> MarketRestClient {
        // Discard port; connections are refused immediately.
        let config = RestConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            access_token: "test-token".to_string(),
            game_mode: GameMode::Softcore,
            ladder: LadderStatus::Ladder,
        };
        MarketRestClient::new(config)
    }

    fn user() -> UserId {
        UserId::new("u-test").unwrap()
    }

    #[test]
    fn test_stash_lookup_creation() {
        let lookup =
            StashLookup::with_ttl(unreachable_client(), user(), Duration::from_millis(50));
        assert_eq!(lookup.cache_ttl, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_lookup_maps_rest_failures() {
        let lookup = StashLookup::new(unreachable_client(), user());
        let query = ItemQuery::new("Harlequin Crest").unwrap();

        let result = lookup.lookup(&query).await;
        assert!(matches!(result, Err(QueueError::Market(_))));
    }
}
