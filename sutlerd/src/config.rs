//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use std::env;
use sutler_domain::{GameMode, LadderStatus};

/// Production REST endpoint.
const DEFAULT_API_URL: &str = "https://api.runemarket.net";
/// Production socket endpoint.
const DEFAULT_SOCKET_URL: &str = "wss://api.runemarket.net/ws";
/// Seconds between queue poll cycles.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
/// Seconds a listing intent may wait before expiring.
const DEFAULT_MAX_INTENT_AGE_SECS: u64 = 15 * 60;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Marketplace endpoints and credentials
    pub market: MarketConfig,

    /// Pending listing queue tuning
    pub queue: QueueSettings,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// Marketplace connection configuration.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Socket endpoint for the correlated connection
    pub socket_url: String,
    /// REST endpoint for stash, listing, and offer calls
    pub api_url: String,
    /// Session JWT presented on every request
    pub access_token: String,
    /// Economy the created listings belong to (softcore/hardcore)
    pub game_mode: GameMode,
    /// Economy the created listings belong to (ladder/nonladder)
    pub ladder: LadderStatus,
}

/// Pending listing queue tuning.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Seconds between poll cycles over the active intents
    pub poll_interval_secs: u64,
    /// Seconds an intent may wait for its item before expiring
    pub max_intent_age_secs: u64,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `SUTLER_ACCESS_TOKEN` is required; everything else falls back to the
    /// production defaults.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let market = Self::load_market_config()?;
        let queue = Self::load_queue_settings()?;

        Ok(Self { market, queue, environment })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            market: MarketConfig {
                socket_url: "ws://127.0.0.1:0".to_string(),
                api_url: "http://127.0.0.1:0".to_string(),
                access_token: "test-token".to_string(),
                game_mode: GameMode::Softcore,
                ladder: LadderStatus::Ladder,
            },
            queue: QueueSettings { poll_interval_secs: 1, max_intent_age_secs: 60 },
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("SUTLER_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid SUTLER_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_market_config() -> DaemonResult<MarketConfig> {
        let socket_url =
            env::var("SUTLER_SOCKET_URL").unwrap_or_else(|_| DEFAULT_SOCKET_URL.to_string());
        let api_url = env::var("SUTLER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let access_token = env::var("SUTLER_ACCESS_TOKEN").map_err(|_| {
            DaemonError::Config("SUTLER_ACCESS_TOKEN is required (marketplace session JWT)".to_string())
        })?;

        let game_mode = match env::var("SUTLER_GAME_MODE") {
            Ok(val) => GameMode::parse(&val)
                .map_err(|e| DaemonError::Config(format!("Invalid SUTLER_GAME_MODE: {e}")))?,
            Err(_) => GameMode::Softcore,
        };
        let ladder = match env::var("SUTLER_LADDER") {
            Ok(val) => LadderStatus::parse(&val)
                .map_err(|e| DaemonError::Config(format!("Invalid SUTLER_LADDER: {e}")))?,
            Err(_) => LadderStatus::Ladder,
        };

        Ok(MarketConfig { socket_url, api_url, access_token, game_mode, ladder })
    }

    fn load_queue_settings() -> DaemonResult<QueueSettings> {
        let poll_interval_secs =
            Self::load_secs_env("SUTLER_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let max_intent_age_secs =
            Self::load_secs_env("SUTLER_MAX_INTENT_AGE_SECS", DEFAULT_MAX_INTENT_AGE_SECS)?;

        Ok(QueueSettings { poll_interval_secs, max_intent_age_secs })
    }

    fn load_secs_env(key: &str, default: u64) -> DaemonResult<u64> {
        match env::var(key) {
            Ok(val) => val
                .parse::<u64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: MarketConfig {
                socket_url: DEFAULT_SOCKET_URL.to_string(),
                api_url: DEFAULT_API_URL.to_string(),
                access_token: String::new(),
                game_mode: GameMode::Softcore,
                ladder: LadderStatus::Ladder,
            },
            queue: QueueSettings {
                poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
                max_intent_age_secs: DEFAULT_MAX_INTENT_AGE_SECS,
            },
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
