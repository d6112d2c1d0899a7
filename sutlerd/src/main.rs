//! Sutler Daemon
//!
//! Synchronization core for the runemarket trading assistant.
//!
//! # Usage
//!
//! ```bash
//! # Start against production with a session token
//! SUTLER_ACCESS_TOKEN=eyJ... cargo run -p sutlerd
//!
//! # Faster polling for development
//! SUTLER_ENV=dev SUTLER_POLL_INTERVAL_SECS=5 cargo run -p sutlerd
//! ```
//!
//! # Environment Variables
//!
//! - `SUTLER_ENV`: Environment (test, development, production)
//! - `SUTLER_ACCESS_TOKEN`: Marketplace session JWT (required)
//! - `SUTLER_API_URL`: REST endpoint (default: https://api.runemarket.net)
//! - `SUTLER_SOCKET_URL`: Socket endpoint (default: wss://api.runemarket.net/ws)
//! - `SUTLER_GAME_MODE`: Economy for created listings, softcore/hardcore (default: softcore)
//! - `SUTLER_LADDER`: Economy for created listings, ladder/nonladder (default: ladder)
//! - `SUTLER_POLL_INTERVAL_SECS`: Seconds between queue poll cycles (default: 15)
//! - `SUTLER_MAX_INTENT_AGE_SECS`: Intent lifetime before expiry (default: 900)

use sutlerd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("sutlerd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_url = %config.market.api_url,
        socket_url = %config.market.socket_url,
        "Sutler daemon"
    );

    // Connect and run
    let daemon = Daemon::connect(config).await?;
    daemon.run().await?;

    Ok(())
}
