//! Sutler Offer Synchronization View
//!
//! In-memory view of the user's marketplace offers, kept in sync by explicit
//! pulls and by push notifications relayed from the socket.
//!
//! # Components
//!
//! - **Ports**: Trait the marketplace gateway implements
//! - **Offer Book**: Cache, mutations, push-driven refresh, typed events
//! - **Dedup**: Bounded FIFO set suppressing duplicate notification effects
//! - **Gateway**: REST-backed production adapter
//! - **Stub**: Scriptable gateway for tests

#![warn(clippy::all)]

pub mod dedup;
pub mod error;
pub mod gateway;
pub mod ports;
pub mod stub;
pub mod view;

// Re-exports for convenience
pub use dedup::{NotificationDedupSet, DEDUP_CAPACITY};
pub use error::{OfferError, OfferResult};
pub use gateway::RestOfferGateway;
pub use ports::OfferGateway;
pub use stub::{MutationCall, ScriptedGateway};
pub use view::{OfferBook, OfferEvent, OfferSnapshot};
