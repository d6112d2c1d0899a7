//! Stub marketplace for testing.
//!
//! Simulates the stash lookup and listing endpoints without network calls.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::RwLock;

use sutler_domain::{
    HrAmount, ItemQuery, ListingDraft, ListingId, MarketListing, StashItem, UserId,
};

use crate::error::QueueError;
use crate::ports::ListingMarket;

/// Stub marketplace with a scriptable stash.
///
/// `lookup` filters the stash by the query, like the real adapter does.
/// Listing creation succeeds immediately and is recorded, so tests can
/// assert exactly how many listings went out and for which items.
pub struct ScriptedMarket {
    /// Current stash contents
    stash: RwLock<Vec<StashItem>>,
    /// Listings created through this market
    created: RwLock<Vec<MarketListing>>,
    /// Execute calls attempted, successful or not
    attempts: RwLock<usize>,
    /// Listing counter for generating ids
    listing_counter: RwLock<u64>,
    /// Whether the next stash lookup fails
    fail_next_lookup: RwLock<bool>,
    /// Whether the next listing creation fails
    fail_next_execute: RwLock<bool>,
}

impl ScriptedMarket {
    /// Create a stub market with an empty stash.
    pub fn new() -> Self {
        Self {
            stash: RwLock::new(Vec::new()),
            created: RwLock::new(Vec::new()),
            attempts: RwLock::new(0),
            listing_counter: RwLock::new(0),
            fail_next_lookup: RwLock::new(false),
            fail_next_execute: RwLock::new(false),
        }
    }

    /// Replace the stash contents.
    pub fn set_stash(&self, items: Vec<StashItem>) {
        let mut stash = self.stash.write().unwrap();
        *stash = items;
    }

    /// Add one item to the stash.
    pub fn add_item(&self, item: StashItem) {
        let mut stash = self.stash.write().unwrap();
        stash.push(item);
    }

    /// Configure the next stash lookup to fail.
    pub fn set_fail_next_lookup(&self, fail: bool) {
        let mut flag = self.fail_next_lookup.write().unwrap();
        *flag = fail;
    }

    /// Configure the next listing creation to fail.
    pub fn set_fail_next_execute(&self, fail: bool) {
        let mut flag = self.fail_next_execute.write().unwrap();
        *flag = fail;
    }

    /// Listings created so far.
    pub fn created_listings(&self) -> Vec<MarketListing> {
        self.created.read().unwrap().clone()
    }

    /// How many listing calls were attempted, failures included.
    pub fn execute_calls(&self) -> usize {
        *self.attempts.read().unwrap()
    }

    fn should_fail(flag: &RwLock<bool>) -> bool {
        let mut flag = flag.write().unwrap();
        let fail = *flag;
        *flag = false; // Reset after check
        fail
    }
}

impl Default for ScriptedMarket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingMarket for ScriptedMarket {
    async fn lookup(&self, query: &ItemQuery) -> Result<Vec<StashItem>, QueueError> {
        if Self::should_fail(&self.fail_next_lookup) {
            return Err(QueueError::Market("Simulated lookup failure".to_string()));
        }
        let stash = self.stash.read().unwrap();
        Ok(stash.iter().filter(|i| i.matches_query(query)).cloned().collect())
    }

    async fn execute(
        &self,
        candidate: &StashItem,
        draft: &ListingDraft,
    ) -> Result<MarketListing, QueueError> {
        *self.attempts.write().unwrap() += 1;
        if Self::should_fail(&self.fail_next_execute) {
            return Err(QueueError::Market("Simulated listing failure".to_string()));
        }

        let id = {
            let mut counter = self.listing_counter.write().unwrap();
            *counter += 1;
            format!("STUB-L{}", *counter)
        };

        let listing = MarketListing {
            id: ListingId::new(id).map_err(|e| QueueError::Market(e.to_string()))?,
            user_id: UserId::new("stub-user").map_err(|e| QueueError::Market(e.to_string()))?,
            item_name: candidate.name.clone(),
            item_hash: Some(candidate.hash.clone()),
            hr_price: draft.hr_price.clone(),
            note: draft.note.clone(),
            accepted_offer_id: None,
            bumped_at: None,
            created_at: Some(Utc::now()),
        };

        self.created.write().unwrap().push(listing.clone());
        Ok(listing)
    }
}

// =============================================================================
// Tests
// =============================================================================
