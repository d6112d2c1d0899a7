//! Sutler Pending Listing Queue
//!
//! Deferred listing creation for items the user does not hold yet.
//!
//! # Architecture
//!
//! ```text
//! enqueue(query, draft, known) → Registry → Poll Cycle → Classify → Execute
//! ```
//!
//! # Components
//!
//! - **Ports**: Trait the marketplace adapter implements (lookup + execute)
//! - **Intent Registry**: Live intents with single-flight poll state
//! - **Classification**: Decides what a stash lookup means for an intent
//! - **Poller**: Background poll loop, outcome broadcast, cancel
//! - **Stub**: Scriptable marketplace for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use sutler_queue::{PendingListingQueue, QueueConfig, ScriptedMarket};
//! use std::sync::Arc;
//!
//! let market = Arc::new(ScriptedMarket::new());
//! let queue = Arc::new(PendingListingQueue::new(market, QueueConfig::default()));
//!
//! let id = queue.enqueue(query, draft, known)?;
//! let handle = Arc::clone(&queue).start();
//! ```

#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod intent;
pub mod poller;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use classify::{classify_candidates, Classification};
pub use error::{QueueError, QueueResult};
pub use intent::{IntentRegistry, IntentState, QueuedIntent};
pub use poller::{IntentOutcome, PendingListingQueue, QueueConfig};
pub use ports::ListingMarket;
pub use stub::ScriptedMarket;
