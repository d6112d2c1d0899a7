//! Value Objects for the Sutler Domain
//!
//! Immutable, validated domain primitives.
//! Identifiers are newtypes over the marketplace's string ids so that a
//! listing id can never be passed where an offer id is expected.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// HR amounts must be non-negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Identifiers must be non-empty
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Item queries must name an item
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Unrecognized game mode or ladder flag
    #[error("Invalid mode: {0}")]
    InvalidMode(String),
}

// =============================================================================
// HrAmount
// =============================================================================

/// HrAmount represents a price in high runes, the marketplace currency.
///
/// # Invariants
/// - Must be >= 0 (zero means "note-only", no fixed price)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HrAmount(Decimal);

impl HrAmount {
    /// Create a new HrAmount with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value < 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value < Decimal::ZERO {
            return Err(DomainError::InvalidAmount("HR amount cannot be negative".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Zero HR (a note-only price)
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// True if this amount carries no HR value
    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }
}

impl fmt::Display for HrAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// GameMode / LadderStatus
// =============================================================================

/// GameMode separates the two marketplace economies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    /// Standard economy
    Softcore,
    /// Permadeath economy; listings never cross over
    Hardcore,
}

impl GameMode {
    /// Parse a mode from its configuration spelling
    ///
    /// # Errors
    /// Returns `DomainError::InvalidMode` for unknown spellings
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.to_ascii_lowercase().as_str() {
            "softcore" | "sc" => Ok(GameMode::Softcore),
            "hardcore" | "hc" => Ok(GameMode::Hardcore),
            other => Err(DomainError::InvalidMode(format!("Unknown game mode: {}", other))),
        }
    }

    /// True for the hardcore economy
    pub fn is_hardcore(&self) -> bool {
        matches!(self, GameMode::Hardcore)
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameMode::Softcore => write!(f, "softcore"),
            GameMode::Hardcore => write!(f, "hardcore"),
        }
    }
}

/// LadderStatus separates seasonal and non-seasonal economies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LadderStatus {
    /// Current seasonal economy
    Ladder,
    /// Permanent economy
    NonLadder,
}

impl LadderStatus {
    /// Parse a ladder flag from its configuration spelling
    ///
    /// # Errors
    /// Returns `DomainError::InvalidMode` for unknown spellings
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.to_ascii_lowercase().as_str() {
            "ladder" => Ok(LadderStatus::Ladder),
            "nonladder" | "non-ladder" => Ok(LadderStatus::NonLadder),
            other => Err(DomainError::InvalidMode(format!("Unknown ladder flag: {}", other))),
        }
    }

    /// True for the seasonal economy
    pub fn is_ladder(&self) -> bool {
        matches!(self, LadderStatus::Ladder)
    }
}

impl fmt::Display for LadderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LadderStatus::Ladder => write!(f, "ladder"),
            LadderStatus::NonLadder => write!(f, "nonladder"),
        }
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of a stash item as reported by the game-state sync.
///
/// This is the hash the marketplace uses to recognize "the same item"
/// across stash snapshots; candidate classification is defined over it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    /// Create a candidate id with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentifier` if empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidIdentifier("Candidate id cannot be empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned id of a market listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    /// Create a listing id with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentifier` if empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidIdentifier("Listing id cannot be empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned id of a trade offer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(String);

impl OfferId {
    /// Create an offer id with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentifier` if empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidIdentifier("Offer id cannot be empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned id of a push notification, used for de-duplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    /// Create a notification id with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentifier` if empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidIdentifier(
                "Notification id cannot be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned id of a marketplace user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentifier` if empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidIdentifier("User id cannot be empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned id of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Create a conversation id with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentifier` if empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidIdentifier(
                "Conversation id cannot be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_hr_amount_validation() {
        assert!(HrAmount::new(dec!(3.5)).is_ok());
        assert!(HrAmount::new(dec!(0)).is_ok());
        assert!(HrAmount::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_hr_amount_zero() {
        assert!(HrAmount::zero().is_zero());
        assert!(!HrAmount::new(dec!(2)).unwrap().is_zero());
        assert_eq!(HrAmount::new(dec!(2.25)).unwrap().as_decimal(), dec!(2.25));
    }

    #[test]
    fn test_game_mode_parse() {
        assert_eq!(GameMode::parse("softcore").unwrap(), GameMode::Softcore);
        assert_eq!(GameMode::parse("HC").unwrap(), GameMode::Hardcore);
        assert!(GameMode::parse("mediumcore").is_err());
        assert!(GameMode::Hardcore.is_hardcore());
        assert!(!GameMode::Softcore.is_hardcore());
    }

    #[test]
    fn test_ladder_parse() {
        assert_eq!(LadderStatus::parse("ladder").unwrap(), LadderStatus::Ladder);
        assert_eq!(LadderStatus::parse("non-ladder").unwrap(), LadderStatus::NonLadder);
        assert!(LadderStatus::parse("eternal").is_err());
    }

    #[test]
    fn test_identifiers_reject_empty() {
        assert!(CandidateId::new("").is_err());
        assert!(ListingId::new("").is_err());
        assert!(OfferId::new("").is_err());
        assert!(NotificationId::new("").is_err());
        assert!(UserId::new("").is_err());
        assert!(ConversationId::new("").is_err());
    }

    #[test]
    fn test_identifier_roundtrip() {
        let id = CandidateId::new("a1b2c3").unwrap();
        assert_eq!(id.as_str(), "a1b2c3");
        assert_eq!(id.to_string(), "a1b2c3");
    }

    #[test]
    fn test_identifier_serde_transparent() {
        let id: ListingId = serde_json::from_str("\"65f0aa\"").unwrap();
        assert_eq!(id.as_str(), "65f0aa");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"65f0aa\"");
    }
}
