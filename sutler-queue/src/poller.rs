//! Pending Listing Queue: Deferred Listings for Items Not Yet Owned
//!
//! The queue is a background service that:
//! - Accepts listing intents for items the user does not hold yet
//! - Polls the stash on an interval, evaluating every live intent concurrently
//! - Creates the listing as soon as exactly one novel candidate appears
//! - Expires intents that wait too long, hands off ambiguous matches
//!
//! Execution is effectively-once. An intent is removed from the registry
//! before its listing call goes out, so a concurrent cancel either removes
//! the intent first (and the poll does nothing) or finds it gone. The cost
//! of that ordering is that a failed listing call is terminal: the caller
//! gets an `ExecutionFailed` outcome instead of a retry that might list
//! the same item twice.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sutler_domain::{CandidateId, IntentId, ItemQuery, ListingDraft, MarketListing, StashItem};

use crate::classify::{classify_candidates, Classification};
use crate::error::{QueueError, QueueResult};
use crate::intent::{IntentRegistry, QueuedIntent};
use crate::ports::ListingMarket;

// =============================================================================
// Configuration
// =============================================================================

/// Default time between poll cycles.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
/// Default intent lifetime before expiry (15 minutes).
const DEFAULT_MAX_INTENT_AGE_SECS: u64 = 15 * 60;
/// Outcome channel capacity.
const OUTCOME_CAPACITY: usize = 64;

/// Pending listing queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Time between poll cycles
    pub poll_interval: Duration,
    /// How long an intent may wait for its item before expiring
    pub default_max_age: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            default_max_age: Duration::from_secs(DEFAULT_MAX_INTENT_AGE_SECS),
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Terminal outcome of a queued intent.
///
/// Each intent produces exactly one outcome, because an outcome is only
/// emitted by the caller that removed the intent from the registry.
#[derive(Debug, Clone)]
pub enum IntentOutcome {
    /// A single novel candidate appeared and the listing was created
    Listed {
        intent: QueuedIntent,
        candidate: StashItem,
        listing: MarketListing,
    },
    /// Several novel candidates appeared at once; the queue does not guess
    /// which one the user meant
    AmbiguousMatch {
        intent: QueuedIntent,
        candidates: Vec<StashItem>,
    },
    /// The intent outlived its maximum age without a novel match
    Expired { intent: QueuedIntent },
    /// The listing call failed; the intent is settled, not retried
    ExecutionFailed {
        intent: QueuedIntent,
        candidate: StashItem,
        reason: String,
    },
    /// The intent was cancelled before anything happened
    Cancelled { intent: QueuedIntent },
}

impl IntentOutcome {
    /// The intent this outcome settled.
    pub fn intent(&self) -> &QueuedIntent {
        match self {
            Self::Listed { intent, .. }
            | Self::AmbiguousMatch { intent, .. }
            | Self::Expired { intent }
            | Self::ExecutionFailed { intent, .. }
            | Self::Cancelled { intent } => intent,
        }
    }
}

// =============================================================================
// Pending Listing Queue
// =============================================================================

/// Holds listing intents and polls the marketplace until each one settles.
pub struct PendingListingQueue<M: ListingMarket> {
    /// Marketplace adapter for stash lookups and listing creation
    market: Arc<M>,
    /// Live intents
    registry: IntentRegistry,
    /// Configuration
    config: QueueConfig,
    /// Outcome notifications
    outcomes: broadcast::Sender<IntentOutcome>,
    /// Shutdown token
    shutdown_token: CancellationToken,
}

impl<M: ListingMarket + 'static> PendingListingQueue<M> {
    /// Create a queue over a marketplace adapter.
    pub fn new(market: Arc<M>, config: QueueConfig) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);

        Self {
            market,
            registry: IntentRegistry::new(),
            config,
            outcomes,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Queue a listing intent.
    ///
    /// `known` is the set of candidate identities that already match the
    /// query right now; those are never treated as the awaited item. Returns
    /// the intent id immediately, before any polling happens.
    pub fn enqueue(
        &self,
        query: ItemQuery,
        draft: ListingDraft,
        known: HashSet<CandidateId>,
    ) -> QueueResult<IntentId> {
        let intent = QueuedIntent::new(query, draft, known, self.config.default_max_age);
        let id = intent.id;

        self.registry.enqueue(intent)?;
        info!(%id, "Listing intent enqueued");
        Ok(id)
    }

    /// Cancel a queued intent, whatever it is doing.
    ///
    /// Succeeds even while a poll cycle is evaluating the intent: removal
    /// goes through the same gate execution does, so whichever side removes
    /// it first wins and the other does nothing.
    pub fn cancel(&self, id: IntentId) -> QueueResult<QueuedIntent> {
        match self.registry.take(id)? {
            Some(intent) => {
                info!(%id, query = %intent.query.name, "Listing intent cancelled");
                let _ = self.outcomes.send(IntentOutcome::Cancelled { intent: intent.clone() });
                Ok(intent)
            },
            None => Err(QueueError::IntentNotFound(id)),
        }
    }

    /// Snapshot of all live intents in queue order.
    pub fn list_active(&self) -> QueueResult<Vec<QueuedIntent>> {
        self.registry.snapshot()
    }

    /// Subscribe to intent outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<IntentOutcome> {
        self.outcomes.subscribe()
    }

    /// Run one poll cycle over every live intent.
    ///
    /// Intents are evaluated concurrently; one slow or failing lookup does
    /// not hold up the others. Returns how many intents settled this cycle.
    pub async fn poll_once(&self) -> QueueResult<usize> {
        let snapshot = self.registry.snapshot()?;
        if snapshot.is_empty() {
            return Ok(0);
        }

        let results = future::join_all(snapshot.into_iter().map(|intent| {
            let id = intent.id;
            async move {
                match self.poll_intent(intent).await {
                    Ok(settled) => settled,
                    Err(e) => {
                        error!(%id, error = %e, "Error polling intent");
                        false
                    },
                }
            }
        }))
        .await;

        Ok(results.into_iter().filter(|settled| *settled).count())
    }

    /// Evaluate a single intent. Returns `true` when the intent settled.
    async fn poll_intent(&self, intent: QueuedIntent) -> QueueResult<bool> {
        // 1. Single-flight guard: skip intents another cycle is already on.
        if !self.registry.begin_poll(intent.id)? {
            debug!(id = %intent.id, "Intent already being polled, skipping");
            return Ok(false);
        }

        // 2. Expire before touching the market.
        if intent.is_expired(Utc::now()) {
            return match self.registry.take(intent.id)? {
                Some(expired) => {
                    info!(
                        id = %expired.id,
                        query = %expired.query.name,
                        "Intent expired without a match"
                    );
                    let _ = self.outcomes.send(IntentOutcome::Expired { intent: expired });
                    Ok(true)
                },
                // Cancelled mid-poll; the cancel already settled it.
                None => Ok(false),
            };
        }

        // 3. Ask the market what currently matches the query.
        let candidates = match self.market.lookup(&intent.query).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(id = %intent.id, error = %e, "Stash lookup failed, will retry next cycle");
                self.registry.finish_poll(intent.id, Utc::now())?;
                return Ok(false);
            },
        };

        // 4. Decide what the lookup means against the enqueue-time snapshot.
        match classify_candidates(&intent.known, &candidates) {
            Classification::NoneNovel => {
                self.registry.finish_poll(intent.id, Utc::now())?;
                Ok(false)
            },
            Classification::Single(candidate) => self.execute_intent(intent.id, candidate).await,
            Classification::Ambiguous(novel) => match self.registry.take(intent.id)? {
                Some(taken) => {
                    info!(
                        id = %taken.id,
                        query = %taken.query.name,
                        candidates = novel.len(),
                        "Multiple novel candidates, handing off"
                    );
                    let _ = self.outcomes.send(IntentOutcome::AmbiguousMatch {
                        intent: taken,
                        candidates: novel,
                    });
                    Ok(true)
                },
                None => Ok(false),
            },
        }
    }

    /// Create the listing for a matched intent. Returns `true` when the
    /// intent settled, whether the listing call succeeded or not.
    async fn execute_intent(&self, id: IntentId, candidate: StashItem) -> QueueResult<bool> {
        // Remove first. Once the intent is out no other path can settle it,
        // and a cancel that got here before us already won.
        let intent = match self.registry.take(id)? {
            Some(intent) => intent,
            None => {
                debug!(%id, "Intent cancelled mid-poll, skipping execution");
                return Ok(false);
            },
        };

        match self.market.execute(&candidate, &intent.draft).await {
            Ok(listing) => {
                info!(
                    %id,
                    listing_id = %listing.id,
                    item = %candidate.name,
                    "Queued intent executed"
                );
                let _ = self.outcomes.send(IntentOutcome::Listed { intent, candidate, listing });
            },
            Err(e) => {
                error!(%id, item = %candidate.name, error = %e, "Listing execution failed");
                let _ = self.outcomes.send(IntentOutcome::ExecutionFailed {
                    intent,
                    candidate,
                    reason: e.to_string(),
                });
            },
        }
        Ok(true)
    }

    /// Start the poll loop in the background.
    ///
    /// Returns a JoinHandle that can be awaited or aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.poll_interval.as_secs(),
                "Pending listing queue started"
            );

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Pending listing queue received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {
                        match self.poll_once().await {
                            Ok(0) => {},
                            Ok(settled) => debug!(settled, "Poll cycle settled intents"),
                            Err(e) => error!(error = %e, "Poll cycle failed"),
                        }
                    }
                }
            }

            info!("Pending listing queue stopped");
        })
    }

    /// Signal the poll loop to stop.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sutler_domain::HrAmount;

    use crate::stub::ScriptedMarket;

    fn item(hash: &str, name: &str) -> StashItem {
        StashItem {
            hash: CandidateId::new(hash).unwrap(),
            name: name.to_string(),
            quality: None,
        }
    }

    fn draft() -> ListingDraft {
        ListingDraft::new(HrAmount::new(dec!(4)).unwrap(), "4 HR firm")
    }

    fn queue_with(market: &Arc<ScriptedMarket>) -> PendingListingQueue<ScriptedMarket> {
        PendingListingQueue::new(Arc::clone(market), QueueConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_returns_id_before_any_polling() {
        let market = Arc::new(ScriptedMarket::new());
        let queue = queue_with(&market);

        let id = queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        let active = queue.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        assert_eq!(market.execute_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_novel_candidate_executes_once() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest")]);
        let queue = queue_with(&market);
        let mut outcomes = queue.subscribe();

        let id = queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        assert_eq!(queue.poll_once().await.unwrap(), 1);
        assert_eq!(market.execute_calls(), 1);
        assert!(queue.list_active().unwrap().is_empty());

        match outcomes.try_recv().unwrap() {
            IntentOutcome::Listed { intent, candidate, listing } => {
                assert_eq!(intent.id, id);
                assert_eq!(candidate.name, "Harlequin Crest");
                assert_eq!(listing.item_name, "Harlequin Crest");
            },
            other => panic!("expected Listed, got {:?}", other),
        }

        // Nothing left to do; a second cycle must not list again.
        assert_eq!(queue.poll_once().await.unwrap(), 0);
        assert_eq!(market.execute_calls(), 1);
    }

    #[tokio::test]
    async fn test_known_candidates_never_trigger_execution() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest"), item("hash-b", "Harlequin Crest")]);
        let queue = queue_with(&market);

        // Snapshot taken at enqueue time covers both copies already held.
        let known: HashSet<CandidateId> =
            [CandidateId::new("hash-a").unwrap(), CandidateId::new("hash-b").unwrap()]
                .into_iter()
                .collect();
        queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), known)
            .unwrap();

        assert_eq!(queue.poll_once().await.unwrap(), 0);
        assert_eq!(market.execute_calls(), 0);

        let active = queue.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].last_polled_at.is_some());

        // A third copy drops in; only that one is novel.
        market.add_item(item("hash-c", "Harlequin Crest"));
        assert_eq!(queue.poll_once().await.unwrap(), 1);
        assert_eq!(market.execute_calls(), 1);

        let listed = &market.created_listings()[0];
        assert_eq!(listed.item_hash.as_ref().unwrap().as_str(), "hash-c");
    }

    #[tokio::test]
    async fn test_multiple_novel_without_snapshot_hands_off() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest"), item("hash-b", "Harlequin Crest")]);
        let queue = queue_with(&market);
        let mut outcomes = queue.subscribe();

        queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        assert_eq!(queue.poll_once().await.unwrap(), 1);
        assert_eq!(market.execute_calls(), 0);
        assert!(queue.list_active().unwrap().is_empty());

        match outcomes.try_recv().unwrap() {
            IntentOutcome::AmbiguousMatch { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
            },
            other => panic!("expected AmbiguousMatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_novel_with_snapshot_keeps_polling() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![
            item("hash-a", "Harlequin Crest"),
            item("hash-b", "Harlequin Crest"),
            item("hash-c", "Harlequin Crest"),
        ]);
        let queue = queue_with(&market);
        let mut outcomes = queue.subscribe();

        // With a snapshot the queue never guesses between two novel copies.
        let known: HashSet<CandidateId> = [CandidateId::new("hash-a").unwrap()].into_iter().collect();
        queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), known)
            .unwrap();

        assert_eq!(queue.poll_once().await.unwrap(), 0);
        assert_eq!(market.execute_calls(), 0);
        assert_eq!(queue.list_active().unwrap().len(), 1);
        assert!(outcomes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_intent_settles_without_execution() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest")]);
        let config = QueueConfig { default_max_age: Duration::ZERO, ..QueueConfig::default() };
        let queue = PendingListingQueue::new(Arc::clone(&market), config);
        let mut outcomes = queue.subscribe();

        let id = queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        // Expiry is only evaluated by poll cycles; until one runs, the
        // intent stays queued however old it is.
        assert_eq!(queue.list_active().unwrap().len(), 1);

        assert_eq!(queue.poll_once().await.unwrap(), 1);
        assert_eq!(market.execute_calls(), 0);
        assert!(queue.list_active().unwrap().is_empty());

        match outcomes.try_recv().unwrap() {
            IntentOutcome::Expired { intent } => assert_eq!(intent.id, id),
            other => panic!("expected Expired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_settles_intent_and_is_unconditional() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest")]);
        let queue = queue_with(&market);
        let mut outcomes = queue.subscribe();

        let id = queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        let cancelled = queue.cancel(id).unwrap();
        assert_eq!(cancelled.id, id);
        assert!(matches!(outcomes.try_recv().unwrap(), IntentOutcome::Cancelled { .. }));

        // The item is sitting right there, but the intent is gone.
        assert_eq!(queue.poll_once().await.unwrap(), 0);
        assert_eq!(market.execute_calls(), 0);

        assert!(matches!(queue.cancel(id), Err(QueueError::IntentNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_mid_poll_beats_execution() {
        let market = Arc::new(ScriptedMarket::new());
        let queue = queue_with(&market);

        let id = queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        // A cycle has claimed the intent but not executed yet.
        assert!(queue.registry.begin_poll(id).unwrap());
        queue.cancel(id).unwrap();

        // The cycle reaches execution and must find the intent gone.
        let settled = queue.execute_intent(id, item("hash-a", "Harlequin Crest")).await.unwrap();
        assert!(!settled);
        assert_eq!(market.execute_calls(), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_is_terminal() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest")]);
        market.set_fail_next_execute(true);
        let queue = queue_with(&market);
        let mut outcomes = queue.subscribe();

        queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        // The intent settles even though the listing call failed.
        assert_eq!(queue.poll_once().await.unwrap(), 1);
        assert_eq!(market.execute_calls(), 1);
        assert!(market.created_listings().is_empty());
        assert!(queue.list_active().unwrap().is_empty());

        match outcomes.try_recv().unwrap() {
            IntentOutcome::ExecutionFailed { reason, .. } => {
                assert!(reason.contains("Simulated listing failure"));
            },
            other => panic!("expected ExecutionFailed, got {:?}", other),
        }

        // No retry: the attempt count stays where it was.
        assert_eq!(queue.poll_once().await.unwrap(), 0);
        assert_eq!(market.execute_calls(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_keeps_intent_for_next_cycle() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest")]);
        market.set_fail_next_lookup(true);
        let queue = queue_with(&market);

        queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        // Transient lookup failure: nothing settles, nothing executes.
        assert_eq!(queue.poll_once().await.unwrap(), 0);
        assert_eq!(market.execute_calls(), 0);
        assert_eq!(queue.list_active().unwrap().len(), 1);

        // Next cycle succeeds and the intent goes through.
        assert_eq!(queue.poll_once().await.unwrap(), 1);
        assert_eq!(market.execute_calls(), 1);
    }

    #[tokio::test]
    async fn test_intents_poll_independently_in_one_cycle() {
        let market = Arc::new(ScriptedMarket::new());
        market.set_stash(vec![item("hash-a", "Harlequin Crest"), item("hash-w", "Windforce")]);
        let queue = queue_with(&market);

        queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();
        queue.enqueue(ItemQuery::new("Windforce").unwrap(), draft(), HashSet::new()).unwrap();

        assert_eq!(queue.poll_once().await.unwrap(), 2);
        assert_eq!(market.execute_calls(), 2);
        assert!(queue.list_active().unwrap().is_empty());

        let names: Vec<String> =
            market.created_listings().iter().map(|l| l.item_name.clone()).collect();
        assert!(names.contains(&"Harlequin Crest".to_string()));
        assert!(names.contains(&"Windforce".to_string()));
    }

    #[tokio::test]
    async fn test_started_loop_polls_until_shutdown() {
        let market = Arc::new(ScriptedMarket::new());
        let config = QueueConfig {
            poll_interval: Duration::from_millis(20),
            ..QueueConfig::default()
        };
        let queue = Arc::new(PendingListingQueue::new(Arc::clone(&market), config));
        let mut outcomes = queue.subscribe();

        queue
            .enqueue(ItemQuery::new("Harlequin Crest").unwrap(), draft(), HashSet::new())
            .unwrap();

        let handle = Arc::clone(&queue).start();

        // The item shows up after the loop is already running.
        market.add_item(item("hash-a", "Harlequin Crest"));

        let outcome = tokio::time::timeout(Duration::from_secs(2), outcomes.recv())
            .await
            .expect("poll loop should settle the intent")
            .unwrap();
        assert!(matches!(outcome, IntentOutcome::Listed { .. }));

        queue.shutdown();
        handle.await.unwrap();
    }
}
