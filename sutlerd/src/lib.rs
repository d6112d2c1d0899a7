//! Sutler Daemon Library
//!
//! Runtime orchestrator for the marketplace synchronization core.
//!
//! # Architecture
//!
//! ```text
//! Marketplace socket ── push ──→ Offer Book ──┐
//!                                             ├──→ Event Bus → embedder
//! Marketplace REST ←── poll ── Listing Queue ─┘
//! ```
//!
//! # Components
//!
//! - **Daemon**: Wiring and run loop
//! - **Event Bus**: Typed broadcast of queue outcomes, offer events, and
//!   connection-state changes
//! - **StashLookup**: The queue's marketplace port over the REST client
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use sutlerd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::connect(config).await.expect("Failed to connect");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod market;

// Re-exports for convenience
pub use config::{Config, Environment, MarketConfig, QueueSettings};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{EventBus, EventReceiver, TradeEvent};
pub use market::StashLookup;
