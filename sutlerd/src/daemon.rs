//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Marketplace Socket (correlated connection, push events)
//! - Pending Listing Queue (deferred listings)
//! - Offer Book (offer cache + mutations)
//! - Event Bus (fan-out to the embedding process)
//!
//! # Lifecycle
//!
//! 1. Connect the socket and authenticate
//! 2. Build the REST-backed queue and offer view for the session user
//! 3. Forward component events onto the bus
//! 4. Main event loop (log events, watch for shutdown)
//! 5. Graceful shutdown on SIGINT or a `Shutdown` bus event

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sutler_connectors::{
    ConnectionState, MarketRestClient, MarketSocket, PushSubscription, RestConfig, SocketConfig,
    SocketError, WsTransport,
};
use sutler_offers::{OfferBook, OfferEvent, OfferGateway, RestOfferGateway, ScriptedGateway};
use sutler_queue::{IntentOutcome, ListingMarket, PendingListingQueue, QueueConfig, ScriptedMarket};

use crate::config::Config;
use crate::error::DaemonResult;
use crate::event_bus::{EventBus, TradeEvent};
use crate::market::StashLookup;

/// Raw push event carrying system notifications (new offers among them).
const NOTIFICATION_EVENT: &str = "system/notification pushed";

// =============================================================================
// Daemon
// =============================================================================

/// The main sutler daemon.
pub struct Daemon<M: ListingMarket + 'static, G: OfferGateway + 'static> {
    /// Configuration
    config: Config,
    /// Pending listing queue
    queue: Arc<PendingListingQueue<M>>,
    /// Offer cache and mutations
    offer_book: Arc<OfferBook<G>>,
    /// Event bus
    event_bus: Arc<EventBus>,
    /// Push stream for the offer view; consumed when the daemon starts
    notifications: Option<PushSubscription>,
    /// Live marketplace socket; absent for stub daemons
    socket: Option<MarketSocket>,
    /// Stops the event forwarders
    shutdown_token: CancellationToken,
    /// Keeps a stub daemon's detached push stream open
    push_feed: Option<mpsc::Sender<Value>>,
}

impl Daemon<StashLookup, RestOfferGateway> {
    /// Connect to the live marketplace and wire every component.
    ///
    /// The socket comes first: authentication happens there and yields the
    /// session identity the offer queries are scoped to.
    pub async fn connect(config: Config) -> DaemonResult<Self> {
        let transport = WsTransport::connect(&config.market.socket_url)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        let socket = MarketSocket::connect(
            transport,
            SocketConfig::new(config.market.access_token.clone()),
        )
        .await?;

        let session = socket.session().await.ok_or_else(|| {
            SocketError::Auth("acknowledgement carried no session identity".to_string())
        })?;
        info!(user = %session.username, "Authenticated with the marketplace");

        let notifications = socket.subscribe(NOTIFICATION_EVENT).await;

        let rest = MarketRestClient::new(RestConfig {
            base_url: config.market.api_url.clone(),
            access_token: config.market.access_token.clone(),
            game_mode: config.market.game_mode,
            ladder: config.market.ladder,
        });

        let market = Arc::new(StashLookup::new(rest.clone(), session.user_id.clone()));
        let queue = Arc::new(PendingListingQueue::new(market, queue_config(&config)));

        let gateway = Arc::new(RestOfferGateway::new(rest, session.user_id.clone()));
        let offer_book = Arc::new(OfferBook::new(gateway));

        Ok(Self {
            config,
            queue,
            offer_book,
            event_bus: Arc::new(EventBus::default()),
            notifications: Some(notifications),
            socket: Some(socket),
            shutdown_token: CancellationToken::new(),
            push_feed: None,
        })
    }
}

impl Daemon<ScriptedMarket, ScriptedGateway> {
    /// Create a daemon over scripted components (testing/development).
    ///
    /// No connection is made. The push stream stays open but silent until
    /// something writes to its feed.
    pub fn new_stub(config: Config) -> Self {
        let market = Arc::new(ScriptedMarket::new());
        let queue = Arc::new(PendingListingQueue::new(market, queue_config(&config)));
        let gateway = Arc::new(ScriptedGateway::new());
        let offer_book = Arc::new(OfferBook::new(gateway));
        let (push_feed, notifications) = PushSubscription::detached(NOTIFICATION_EVENT, 64);

        Self {
            config,
            queue,
            offer_book,
            event_bus: Arc::new(EventBus::default()),
            notifications: Some(notifications),
            socket: None,
            shutdown_token: CancellationToken::new(),
            push_feed: Some(push_feed),
        }
    }
}

impl<M: ListingMarket + 'static, G: OfferGateway + 'static> Daemon<M, G> {
    /// Create a daemon from provided components.
    ///
    /// Embedders keep their own clones of the components and the bus: the
    /// daemon only drives the background loops and forwards events.
    pub fn new(
        config: Config,
        queue: Arc<PendingListingQueue<M>>,
        offer_book: Arc<OfferBook<G>>,
        event_bus: Arc<EventBus>,
        notifications: PushSubscription,
    ) -> Self {
        Self {
            config,
            queue,
            offer_book,
            event_bus,
            notifications: Some(notifications),
            socket: None,
            shutdown_token: CancellationToken::new(),
            push_feed: None,
        }
    }

    /// Run the daemon.
    ///
    /// Blocks until shutdown is requested: SIGINT, or a
    /// [`TradeEvent::Shutdown`] sent on the bus by the embedding process.
    pub async fn run(mut self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting sutler daemon"
        );

        // 1. Forwarders first, so nothing emitted during startup is missed
        let forwarders = self.spawn_forwarders();

        // 2. Start the pending listing queue
        let queue_handle = Arc::clone(&self.queue).start();

        // 3. Attach the offer view to the push stream
        let offers_handle = self
            .notifications
            .take()
            .map(|subscription| Arc::clone(&self.offer_book).attach_notifications(subscription));

        // 4. Main event loop
        let mut events = self.event_bus.subscribe();
        info!("Entering main event loop");
        loop {
            tokio::select! {
                Some(event_result) = events.recv() => match event_result {
                    Ok(TradeEvent::Shutdown) => {
                        info!("Shutdown event received");
                        break;
                    },
                    Ok(event) => self.handle_event(event),
                    Err(lag_msg) => warn!(%lag_msg, "Event receiver lagged"),
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // 5. Graceful shutdown
        self.shutdown(queue_handle, offers_handle, forwarders).await
    }

    /// Bridge the component broadcasts onto the daemon bus.
    fn spawn_forwarders(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.forward(self.queue.subscribe(), TradeEvent::Intent),
            self.forward(self.offer_book.subscribe(), TradeEvent::Offer),
        ];
        if let Some(socket) = &self.socket {
            handles.push(self.forward_connection_state(socket.state_watch()));
        }
        handles
    }

    fn forward<T, F>(&self, mut source: broadcast::Receiver<T>, wrap: F) -> JoinHandle<()>
    where
        T: Clone + Send + 'static,
        F: Fn(T) -> TradeEvent + Send + 'static,
    {
        let bus = Arc::clone(&self.event_bus);
        let token = self.shutdown_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = source.recv() => match received {
                        Ok(item) => {
                            bus.send(wrap(item));
                        },
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Event forwarder lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn forward_connection_state(
        &self,
        mut states: watch::Receiver<ConnectionState>,
    ) -> JoinHandle<()> {
        let bus = Arc::clone(&self.event_bus);
        let token = self.shutdown_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *states.borrow_and_update();
                        bus.send(TradeEvent::Connection(state));
                    }
                }
            }
        })
    }

    /// Handle an event from the event bus.
    ///
    /// Components log their own work in detail; this is the one-line trail
    /// an operator follows at the daemon level.
    fn handle_event(&self, event: TradeEvent) {
        match event {
            TradeEvent::Intent(outcome) => {
                let id = outcome.intent().id;
                match outcome {
                    IntentOutcome::Listed { listing, .. } => {
                        info!(intent = %id, listing = %listing.id, "Intent listed");
                    },
                    IntentOutcome::AmbiguousMatch { candidates, .. } => {
                        info!(
                            intent = %id,
                            candidates = candidates.len(),
                            "Intent handed off as ambiguous"
                        );
                    },
                    IntentOutcome::Expired { .. } => info!(intent = %id, "Intent expired"),
                    IntentOutcome::ExecutionFailed { reason, .. } => {
                        warn!(intent = %id, %reason, "Intent execution failed");
                    },
                    IntentOutcome::Cancelled { .. } => info!(intent = %id, "Intent cancelled"),
                }
            },

            TradeEvent::Offer(OfferEvent::Refreshed { incoming, outgoing, total }) => {
                debug!(incoming, outgoing, total, "Offer cache refreshed");
            },

            TradeEvent::Offer(OfferEvent::NewOffer { notification }) => {
                info!(notification = %notification.id, "New offer received");
            },

            TradeEvent::Connection(ConnectionState::Disconnected) => {
                // No reconnect policy: REST-side polling keeps working, only
                // push-driven refresh is gone until the process restarts.
                warn!("Marketplace connection lost; push refresh disabled");
            },

            TradeEvent::Connection(state) => {
                info!(%state, "Connection state changed");
            },

            // Consumed by the run loop before it gets here.
            TradeEvent::Shutdown => {},
        }
    }

    /// Graceful shutdown.
    async fn shutdown(
        &mut self,
        queue_handle: JoinHandle<()>,
        offers_handle: Option<JoinHandle<()>>,
        forwarders: Vec<JoinHandle<()>>,
    ) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        // Stop the background loops and wait for them to wind down.
        self.queue.shutdown();
        self.offer_book.shutdown();
        let _ = queue_handle.await;
        if let Some(handle) = offers_handle {
            let _ = handle.await;
        }

        // Closing the socket rejects in-flight calls and ends push streams.
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }

        self.shutdown_token.cancel();
        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        let unsettled = self.queue.list_active()?.len();
        info!(unsettled_intents = unsettled, "Shutdown complete");
        Ok(())
    }
}

fn queue_config(config: &Config) -> QueueConfig {
    QueueConfig {
        poll_interval: Duration::from_secs(config.queue.poll_interval_secs),
        default_max_age: Duration::from_secs(config.queue.max_intent_age_secs),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventReceiver;
    use serde_json::json;
    use tokio::time::timeout;

    async fn next_event(events: &mut EventReceiver) -> TradeEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event should arrive")
            .expect("bus should stay open")
            .expect("receiver should not lag")
    }

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test());

        assert!(daemon.queue.list_active().unwrap().is_empty());
        assert!(daemon.offer_book.snapshot().await.incoming.is_empty());
        assert!(daemon.socket.is_none());
    }

    #[tokio::test]
    async fn test_push_notification_flows_to_the_bus() {
        let daemon = Daemon::new_stub(Config::test());
        let bus = Arc::clone(&daemon.event_bus);
        let feed = daemon.push_feed.clone().expect("stub daemon keeps its push feed");

        let mut events = bus.subscribe();
        let runner = tokio::spawn(daemon.run());

        feed.send(json!({
            "_id": "n1",
            "type": "offer_received",
            "data": { "listing_id": "l1" },
            "meta": { "string": "Offer: 4 HR" },
            "createdAt": "2026-03-02T12:00:00Z"
        }))
        .await
        .unwrap();

        // The listener emits NewOffer, then the triggered refresh completes.
        assert!(matches!(
            next_event(&mut events).await,
            TradeEvent::Offer(OfferEvent::NewOffer { .. })
        ));
        assert!(matches!(
            next_event(&mut events).await,
            TradeEvent::Offer(OfferEvent::Refreshed { .. })
        ));

        bus.send(TradeEvent::Shutdown);
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_event_stops_the_run_loop() {
        let daemon = Daemon::new_stub(Config::test());
        let bus = Arc::clone(&daemon.event_bus);

        let runner = tokio::spawn(daemon.run());

        // The run loop must be subscribed before the request can reach it.
        while bus.receiver_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bus.send(TradeEvent::Shutdown);

        let result = timeout(Duration::from_secs(2), runner)
            .await
            .expect("daemon should stop promptly");
        result.unwrap().unwrap();
    }
}
