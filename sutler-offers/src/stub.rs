//! Stub offer gateway for testing.
//!
//! Serves scripted offer lists and records every mutation without network
//! calls, so tests can assert exactly which mutations went out and how many
//! times the view re-pulled its cache.

use async_trait::async_trait;
use std::sync::RwLock;

use sutler_domain::{ListingId, OfferId, TradeOffer};

use crate::error::{OfferError, OfferResult};
use crate::ports::OfferGateway;

/// A mutation the view asked the gateway to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationCall {
    Accept { listing: ListingId, offer: OfferId },
    Unaccept { listing: ListingId },
    Reject { offer: OfferId },
    Revoke { offer: OfferId },
}

/// Stub gateway with scriptable offer lists.
pub struct ScriptedGateway {
    /// Incoming offers the next fetch returns
    incoming: RwLock<Vec<TradeOffer>>,
    /// Outgoing offers the next fetch returns
    outgoing: RwLock<Vec<TradeOffer>>,
    /// Mutations performed, in call order
    mutations: RwLock<Vec<MutationCall>>,
    /// How many times the incoming list was fetched
    fetches: RwLock<usize>,
    /// Whether the next fetch fails
    fail_next_fetch: RwLock<bool>,
    /// Whether the next mutation fails
    fail_next_mutation: RwLock<bool>,
}

impl ScriptedGateway {
    /// Create a stub gateway with empty offer lists.
    pub fn new() -> Self {
        Self {
            incoming: RwLock::new(Vec::new()),
            outgoing: RwLock::new(Vec::new()),
            mutations: RwLock::new(Vec::new()),
            fetches: RwLock::new(0),
            fail_next_fetch: RwLock::new(false),
            fail_next_mutation: RwLock::new(false),
        }
    }

    /// Replace the incoming offer list.
    pub fn set_incoming(&self, offers: Vec<TradeOffer>) {
        let mut incoming = self.incoming.write().unwrap();
        *incoming = offers;
    }

    /// Replace the outgoing offer list.
    pub fn set_outgoing(&self, offers: Vec<TradeOffer>) {
        let mut outgoing = self.outgoing.write().unwrap();
        *outgoing = offers;
    }

    /// Configure the next fetch to fail.
    pub fn set_fail_next_fetch(&self, fail: bool) {
        let mut flag = self.fail_next_fetch.write().unwrap();
        *flag = fail;
    }

    /// Configure the next mutation to fail.
    pub fn set_fail_next_mutation(&self, fail: bool) {
        let mut flag = self.fail_next_mutation.write().unwrap();
        *flag = fail;
    }

    /// Mutations performed so far, in call order.
    pub fn mutation_calls(&self) -> Vec<MutationCall> {
        self.mutations.read().unwrap().clone()
    }

    /// How many times the incoming offer list was fetched. One fetch per
    /// completed refresh, so this counts refresh round trips.
    pub fn fetch_calls(&self) -> usize {
        *self.fetches.read().unwrap()
    }

    fn should_fail(flag: &RwLock<bool>) -> bool {
        let mut flag = flag.write().unwrap();
        let fail = *flag;
        *flag = false; // Reset after check
        fail
    }

    fn record(&self, call: MutationCall) -> OfferResult<()> {
        if Self::should_fail(&self.fail_next_mutation) {
            return Err(OfferError::Gateway("Simulated mutation failure".to_string()));
        }
        self.mutations.write().unwrap().push(call);
        Ok(())
    }
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfferGateway for ScriptedGateway {
    async fn fetch_incoming(&self) -> OfferResult<Vec<TradeOffer>> {
        if Self::should_fail(&self.fail_next_fetch) {
            return Err(OfferError::Gateway("Simulated fetch failure".to_string()));
        }
        *self.fetches.write().unwrap() += 1;
        Ok(self.incoming.read().unwrap().clone())
    }

    async fn fetch_outgoing(&self) -> OfferResult<Vec<TradeOffer>> {
        Ok(self.outgoing.read().unwrap().clone())
    }

    async fn accept(&self, listing: &ListingId, offer: &OfferId) -> OfferResult<()> {
        self.record(MutationCall::Accept { listing: listing.clone(), offer: offer.clone() })
    }

    async fn unaccept(&self, listing: &ListingId) -> OfferResult<()> {
        self.record(MutationCall::Unaccept { listing: listing.clone() })
    }

    async fn reject(&self, offer: &OfferId) -> OfferResult<()> {
        self.record(MutationCall::Reject { offer: offer.clone() })
    }

    async fn revoke(&self, offer: &OfferId) -> OfferResult<()> {
        self.record(MutationCall::Revoke { offer: offer.clone() })
    }
}

// =============================================================================
// Tests
// =============================================================================
