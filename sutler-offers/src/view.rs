//! Offer Synchronization View: Local Cache of Live Trade Offers
//!
//! The offer book is the in-process view of the user's marketplace offers:
//! - Caches incoming and outgoing offers, replaced wholesale on refresh
//! - Exposes the accept/unaccept/reject/revoke mutations
//! - Consumes the marketplace notification push stream and refreshes on
//!   unseen new-offer notifications
//! - Emits typed events for the embedding application (toasts, badges)
//!
//! The cache holds no truth of its own. Mutations go to the marketplace
//! first and only a successful mutation triggers a re-pull; on failure the
//! cache stays as it was and the error goes back to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sutler_connectors::PushSubscription;
use sutler_domain::{ListingId, OfferId, SystemNotification, TradeOffer};

use crate::dedup::NotificationDedupSet;
use crate::error::OfferResult;
use crate::ports::OfferGateway;

/// Event channel capacity.
const EVENT_CAPACITY: usize = 64;

// =============================================================================
// Snapshot and Events
// =============================================================================

/// Point-in-time copy of the offer cache.
#[derive(Debug, Clone, Default)]
pub struct OfferSnapshot {
    /// Offers other users made on our listings
    pub incoming: Vec<TradeOffer>,
    /// Offers we made on other users' listings
    pub outgoing: Vec<TradeOffer>,
    /// When the cache was last replaced; `None` before the first refresh
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Events the offer view emits for the embedding application.
#[derive(Debug, Clone)]
pub enum OfferEvent {
    /// The cache was replaced by a completed refresh
    Refreshed { incoming: usize, outgoing: usize, total: usize },
    /// An unseen new-offer notification arrived
    NewOffer { notification: SystemNotification },
}

// =============================================================================
// Offer Book
// =============================================================================

/// In-memory view of the user's offers, kept in sync with the marketplace.
pub struct OfferBook<G: OfferGateway> {
    /// Marketplace gateway for fetches and mutations
    gateway: Arc<G>,
    /// Offer cache, replaced wholesale on refresh
    cache: RwLock<OfferSnapshot>,
    /// Already-handled notification ids
    dedup: Mutex<NotificationDedupSet>,
    /// Event notifications
    events: broadcast::Sender<OfferEvent>,
    /// Shutdown token for the notification listener
    shutdown_token: CancellationToken,
}

impl<G: OfferGateway + 'static> OfferBook<G> {
    /// Create an offer book over a marketplace gateway. The cache starts
    /// empty; call [`refresh`](Self::refresh) to populate it.
    pub fn new(gateway: Arc<G>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            gateway,
            cache: RwLock::new(OfferSnapshot::default()),
            dedup: Mutex::new(NotificationDedupSet::default()),
            events,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Subscribe to offer events.
    pub fn subscribe(&self) -> broadcast::Receiver<OfferEvent> {
        self.events.subscribe()
    }

    /// Current cache contents.
    pub async fn snapshot(&self) -> OfferSnapshot {
        self.cache.read().await.clone()
    }

    /// Pull both offer lists and replace the cache.
    ///
    /// Idempotent. Concurrent refreshes are tolerated with last-completed-
    /// wins semantics: whichever round trip finishes last writes the cache,
    /// even if it started earlier and carries staler data.
    pub async fn refresh(&self) -> OfferResult<()> {
        let incoming = self.gateway.fetch_incoming().await?;
        let outgoing = self.gateway.fetch_outgoing().await?;
        let (incoming_count, outgoing_count) = (incoming.len(), outgoing.len());

        {
            let mut cache = self.cache.write().await;
            cache.incoming = incoming;
            cache.outgoing = outgoing;
            cache.refreshed_at = Some(Utc::now());
        }

        debug!(incoming = incoming_count, outgoing = outgoing_count, "Offer cache refreshed");
        let _ = self.events.send(OfferEvent::Refreshed {
            incoming: incoming_count,
            outgoing: outgoing_count,
            total: incoming_count + outgoing_count,
        });
        Ok(())
    }

    /// Accept an offer on one of our listings, then refresh.
    pub async fn accept(&self, listing: &ListingId, offer: &OfferId) -> OfferResult<()> {
        self.gateway.accept(listing, offer).await?;
        info!(%listing, %offer, "Offer accepted");
        self.refresh().await
    }

    /// Withdraw a previously accepted offer, then refresh.
    pub async fn unaccept(&self, listing: &ListingId) -> OfferResult<()> {
        self.gateway.unaccept(listing).await?;
        info!(%listing, "Accepted offer withdrawn");
        self.refresh().await
    }

    /// Reject an incoming offer, then refresh.
    pub async fn reject(&self, offer: &OfferId) -> OfferResult<()> {
        self.gateway.reject(offer).await?;
        info!(%offer, "Offer rejected");
        self.refresh().await
    }

    /// Revoke an outgoing offer we made, then refresh.
    pub async fn revoke(&self, offer: &OfferId) -> OfferResult<()> {
        self.gateway.revoke(offer).await?;
        info!(%offer, "Offer revoked");
        self.refresh().await
    }

    /// Consume a notification push stream in the background.
    ///
    /// Returns a JoinHandle that completes on shutdown or when the stream
    /// closes (socket teardown).
    pub fn attach_notifications(self: Arc<Self>, mut notifications: PushSubscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                event_type = notifications.event_type(),
                "Offer notification listener started"
            );

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Offer notification listener received shutdown signal");
                        break;
                    }
                    payload = notifications.recv() => {
                        match payload {
                            Some(payload) => self.handle_notification(&payload).await,
                            None => {
                                info!("Notification stream closed");
                                break;
                            }
                        }
                    }
                }
            }

            info!("Offer notification listener stopped");
        })
    }

    /// Process one push payload: parse, filter, de-duplicate, refresh.
    async fn handle_notification(&self, payload: &Value) {
        let notification = match SystemNotification::from_push(payload) {
            Some(notification) => notification,
            None => {
                debug!("Push payload is not a notification, ignoring");
                return;
            },
        };

        // Only new-offer notifications that point at a listing count.
        if !notification.is_new_offer() {
            debug!(kind = %notification.kind, "Ignoring notification kind");
            return;
        }

        // Delivery is at-least-once; the same id may arrive again.
        {
            let mut dedup = self.dedup.lock().await;
            if !dedup.insert(notification.id.clone()) {
                debug!(id = %notification.id, "Duplicate notification, already handled");
                return;
            }
        }

        info!(
            id = %notification.id,
            listing = ?notification.listing_id.as_ref().map(|l| l.as_str()),
            "New offer notification"
        );
        let _ = self.events.send(OfferEvent::NewOffer { notification });

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Offer refresh after notification failed");
        }
    }

    /// Signal the notification listener to stop.
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
    use serde_json::json;
    use std::time::Duration;
    use sutler_domain::{Counterparty, HrAmount, OfferDirection, UserId};
    use tokio::time::timeout;

    use crate::error::OfferError;
    use crate::stub::{MutationCall, ScriptedGateway};

    fn offer(id: &str, direction: OfferDirection) -> TradeOffer {
        TradeOffer {
            id: OfferId::new(id).unwrap(),
            direction,
            counterparty: Counterparty {
                user_id: UserId::new("u1").unwrap(),
                username: "necrovendor".to_string(),
                account: Some("necrovendor#1".to_string()),
            },
            item_name: Some("Harlequin Crest".to_string()),
            hr_amount: Some(HrAmount::zero()),
            note: Some("4 HR firm".to_string()),
            listing_id: Some(ListingId::new("l1").unwrap()),
            accepted_offer_id: None,
            created_at: None,
        }
    }

    fn offer_push(id: &str) -> Value {
        json!({
            "_id": id,
            "type": "offer_received",
            "data": { "listing_id": "l1" },
            "meta": { "string": "Offer: 4 HR" },
            "createdAt": "2026-03-02T12:00:00Z"
        })
    }

    async fn next_event(rx: &mut broadcast::Receiver<OfferEvent>) -> OfferEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event should arrive")
            .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache_and_emits_counts() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_incoming(vec![
            offer("o1", OfferDirection::Incoming),
            offer("o2", OfferDirection::Incoming),
        ]);
        gateway.set_outgoing(vec![offer("o3", OfferDirection::Outgoing)]);

        let book = OfferBook::new(Arc::clone(&gateway));
        let mut events = book.subscribe();

        assert!(book.snapshot().await.refreshed_at.is_none());
        book.refresh().await.unwrap();

        let snapshot = book.snapshot().await;
        assert_eq!(snapshot.incoming.len(), 2);
        assert_eq!(snapshot.outgoing.len(), 1);
        assert!(snapshot.refreshed_at.is_some());

        match next_event(&mut events).await {
            OfferEvent::Refreshed { incoming, outgoing, total } => {
                assert_eq!((incoming, outgoing, total), (2, 1, 3));
            },
            other => panic!("expected Refreshed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_cache_untouched() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_incoming(vec![offer("o1", OfferDirection::Incoming)]);

        let book = OfferBook::new(Arc::clone(&gateway));
        book.refresh().await.unwrap();

        // The server now claims different offers, but the fetch fails.
        gateway.set_incoming(vec![
            offer("o2", OfferDirection::Incoming),
            offer("o3", OfferDirection::Incoming),
        ]);
        gateway.set_fail_next_fetch(true);

        assert!(matches!(book.refresh().await, Err(OfferError::Gateway(_))));

        let snapshot = book.snapshot().await;
        assert_eq!(snapshot.incoming.len(), 1);
        assert_eq!(snapshot.incoming[0].id, OfferId::new("o1").unwrap());
    }

    #[tokio::test]
    async fn test_successful_mutation_triggers_refresh() {
        let gateway = Arc::new(ScriptedGateway::new());
        let book = OfferBook::new(Arc::clone(&gateway));

        let listing = ListingId::new("l1").unwrap();
        let offer_id = OfferId::new("o1").unwrap();
        book.accept(&listing, &offer_id).await.unwrap();
        book.unaccept(&listing).await.unwrap();
        book.reject(&offer_id).await.unwrap();
        book.revoke(&offer_id).await.unwrap();

        let calls = gateway.mutation_calls();
        assert_eq!(
            calls,
            vec![
                MutationCall::Accept { listing: listing.clone(), offer: offer_id.clone() },
                MutationCall::Unaccept { listing },
                MutationCall::Reject { offer: offer_id.clone() },
                MutationCall::Revoke { offer: offer_id },
            ]
        );
        // One refresh per successful mutation.
        assert_eq!(gateway.fetch_calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_mutation_skips_refresh() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_fail_next_mutation(true);
        let book = OfferBook::new(Arc::clone(&gateway));

        let offer_id = OfferId::new("o1").unwrap();
        assert!(book.reject(&offer_id).await.is_err());

        assert!(gateway.mutation_calls().is_empty());
        assert_eq!(gateway.fetch_calls(), 0);
        assert!(book.snapshot().await.refreshed_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_notification_refreshes_once() {
        let gateway = Arc::new(ScriptedGateway::new());
        let book = Arc::new(OfferBook::new(Arc::clone(&gateway)));
        let mut events = book.subscribe();

        let (tx, subscription) = PushSubscription::detached("system/notification pushed", 8);
        let handle = Arc::clone(&book).attach_notifications(subscription);

        tx.send(offer_push("n1")).await.unwrap();
        assert!(matches!(next_event(&mut events).await, OfferEvent::NewOffer { .. }));
        assert!(matches!(next_event(&mut events).await, OfferEvent::Refreshed { .. }));

        // The same notification id again: no event, no refresh.
        tx.send(offer_push("n1")).await.unwrap();

        // A distinct id goes through, proving the duplicate emitted nothing
        // in between (events arrive in handling order).
        tx.send(offer_push("n2")).await.unwrap();
        match next_event(&mut events).await {
            OfferEvent::NewOffer { notification } => {
                assert_eq!(notification.id.as_str(), "n2");
            },
            other => panic!("expected NewOffer, got {:?}", other),
        }
        assert!(matches!(next_event(&mut events).await, OfferEvent::Refreshed { .. }));

        assert_eq!(gateway.fetch_calls(), 2);

        book.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unrelated_notifications_are_ignored() {
        let gateway = Arc::new(ScriptedGateway::new());
        let book = Arc::new(OfferBook::new(Arc::clone(&gateway)));
        let mut events = book.subscribe();

        let (tx, subscription) = PushSubscription::detached("system/notification pushed", 8);
        let handle = Arc::clone(&book).attach_notifications(subscription);

        // Wrong kind, then right kind without a listing id: both ignored.
        tx.send(json!({ "_id": "n1", "type": "system_message" })).await.unwrap();
        tx.send(json!({ "_id": "n2", "type": "offer_received" })).await.unwrap();

        tx.send(offer_push("n3")).await.unwrap();
        match next_event(&mut events).await {
            OfferEvent::NewOffer { notification } => {
                assert_eq!(notification.id.as_str(), "n3");
                assert_eq!(notification.message.as_deref(), Some("Offer: 4 HR"));
            },
            other => panic!("expected NewOffer, got {:?}", other),
        }
        assert!(matches!(next_event(&mut events).await, OfferEvent::Refreshed { .. }));
        assert_eq!(gateway.fetch_calls(), 1);

        book.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_stops_when_stream_closes() {
        let gateway = Arc::new(ScriptedGateway::new());
        let book = Arc::new(OfferBook::new(gateway));

        let (tx, subscription) = PushSubscription::detached("system/notification pushed", 8);
        let handle = Arc::clone(&book).attach_notifications(subscription);

        drop(tx);
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener should stop on stream close")
            .unwrap();
    }
}
