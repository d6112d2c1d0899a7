//! Event bus for surfacing daemon events to the embedding process.
//!
//! The bus fans out what the components broadcast individually:
//! - Pending listing queue → terminal intent outcomes
//! - Offer view → cache refreshes and new-offer notifications
//! - Marketplace socket → connection state changes
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.

use sutler_connectors::ConnectionState;
use sutler_offers::OfferEvent;
use sutler_queue::IntentOutcome;
use tokio::sync::broadcast;

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    /// A queued listing intent reached its terminal outcome
    Intent(IntentOutcome),

    /// The offer cache refreshed or a new-offer notification arrived
    Offer(OfferEvent),

    /// The marketplace connection changed state
    Connection(ConnectionState),

    /// Stop request from the embedding process
    Shutdown,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Event bus for daemon-wide communication.
///
/// Multiple producers can send events, and multiple consumers can receive.
/// Uses broadcast channels for fan-out pattern.
pub struct EventBus {
    sender: broadcast::Sender<TradeEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Capacity determines how many events can be buffered before
    /// slow receivers start missing events (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// Returns 0 if there are no active receivers.
    pub fn send(&self, event: TradeEvent) -> usize {
        // send() returns Err if there are no receivers, but we don't care
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events.
    ///
    /// Returns a receiver that will receive all events sent after subscription.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver { receiver: self.sender.subscribe() }
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver for daemon events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<TradeEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<TradeEvent, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is immediately available.
    pub fn try_recv(&mut self) -> Option<Result<TradeEvent, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use sutler_domain::{HrAmount, ItemQuery, ListingDraft};
    use sutler_queue::QueuedIntent;

    fn expired_outcome() -> IntentOutcome {
        let query = ItemQuery::new("Harlequin Crest").unwrap();
        let draft = ListingDraft::new(HrAmount::zero(), "4 HR");
        let intent = QueuedIntent::new(query, draft, HashSet::new(), Duration::from_secs(60));
        IntentOutcome::Expired { intent }
    }

    #[tokio::test]
    async fn test_event_bus_send_recv() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        let outcome = expired_outcome();
        let intent_id = outcome.intent().id;

        bus.send(TradeEvent::Intent(outcome));

        let event = receiver.recv().await.unwrap().unwrap();
        match event {
            TradeEvent::Intent(outcome) => {
                assert_eq!(outcome.intent().id, intent_id);
            },
            _ => panic!("Expected Intent event"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_multiple_receivers() {
        let bus = EventBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        assert_eq!(bus.receiver_count(), 2);

        bus.send(TradeEvent::Intent(expired_outcome()));

        // Both receivers should get the event
        let event1 = receiver1.recv().await.unwrap().unwrap();
        let event2 = receiver2.recv().await.unwrap().unwrap();

        assert!(matches!(event1, TradeEvent::Intent(_)));
        assert!(matches!(event2, TradeEvent::Intent(_)));
    }

    #[tokio::test]
    async fn test_event_bus_no_receivers() {
        let bus = EventBus::new(10);

        // Send with no receivers should not panic
        let count = bus.send(TradeEvent::Shutdown);
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_event_bus_offer_counts() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.send(TradeEvent::Offer(OfferEvent::Refreshed { incoming: 2, outgoing: 1, total: 3 }));

        let event = receiver.recv().await.unwrap().unwrap();
        match event {
            TradeEvent::Offer(OfferEvent::Refreshed { incoming, outgoing, total }) => {
                assert_eq!(incoming, 2);
                assert_eq!(outgoing, 1);
                assert_eq!(total, 3);
            },
            _ => panic!("Expected Offer event"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_connection_state() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.send(TradeEvent::Connection(ConnectionState::Ready));

        let event = receiver.recv().await.unwrap().unwrap();
        assert!(matches!(event, TradeEvent::Connection(ConnectionState::Ready)));
    }

    #[test]
    fn test_try_recv_empty() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        // No events sent yet
        assert!(receiver.try_recv().is_none());
    }
}
