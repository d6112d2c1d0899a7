//! Queued listing intents and their registry.
//!
//! An intent is the durable form of "list this item once it shows up in the
//! stash". It carries a snapshot of the candidate identities that already
//! matched its query when it was enqueued; only identities outside that
//! snapshot can ever trigger execution.
//!
//! # Lifecycle
//!
//! ```text
//! enqueue -> Pending <--> Polling --take--> (settled, leaves the registry)
//! ```
//!
//! There is no terminal state inside the registry: settling an intent means
//! removing it. Execution is gated on that removal, which is what makes it
//! effectively-once: the poll takes the intent out first and only then calls
//! execute, so a concurrent cancel either wins (the poll finds the intent
//! gone and does nothing) or loses (the cancel finds it gone) - never both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

use sutler_domain::{CandidateId, IntentId, ItemQuery, ListingDraft};

use crate::error::{QueueError, QueueResult};

// =============================================================================
// Intent Types
// =============================================================================

/// A queued request to list an item that may not exist in the stash yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedIntent {
    /// Unique intent identifier (time-ordered)
    pub id: IntentId,
    /// What item the user wants to list
    pub query: ItemQuery,
    /// The listing to create once a candidate appears
    pub draft: ListingDraft,
    /// Candidate identities that matched the query at enqueue time.
    /// These are never considered novel, no matter when they reappear.
    pub known: HashSet<CandidateId>,
    /// Current status
    pub state: IntentState,
    /// When the intent was enqueued
    pub created_at: DateTime<Utc>,
    /// When the queue last evaluated this intent
    pub last_polled_at: Option<DateTime<Utc>>,
    /// How long the intent may wait before it expires
    pub max_age: Duration,
}

impl QueuedIntent {
    /// Create a new pending intent with its enqueue-time snapshot.
    pub fn new(
        query: ItemQuery,
        draft: ListingDraft,
        known: HashSet<CandidateId>,
        max_age: Duration,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            query,
            draft,
            known,
            state: IntentState::Pending,
            created_at: Utc::now(),
            last_polled_at: None,
            max_age,
        }
    }

    /// Check if the intent is waiting and not currently being polled.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, IntentState::Pending)
    }

    /// Check if the intent has outlived its allowed age.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.max_age) {
            Ok(max_age) => now.signed_duration_since(self.created_at) >= max_age,
            Err(_) => false, // max_age too large to ever expire
        }
    }
}

/// Status of a queued intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentState {
    /// Waiting for the next poll cycle
    Pending,
    /// A poll cycle is evaluating it right now (single-flight marker)
    Polling,
}

// =============================================================================
// Intent Registry
// =============================================================================

/// Ordered registry of live intents.
///
/// Insertion order is preserved so `list_active` reads like the queue it is,
/// though intents never compete: each one polls its own query independently.
pub struct IntentRegistry {
    intents: RwLock<Vec<QueuedIntent>>,
}

impl IntentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { intents: RwLock::new(Vec::new()) }
    }

    /// Append a new intent at the back of the queue.
    ///
    /// Returns an error if an intent with the same id is already queued.
    pub fn enqueue(&self, intent: QueuedIntent) -> QueueResult<()> {
        let mut intents = self
            .intents
            .write()
            .map_err(|e| QueueError::Registry(format!("Failed to acquire write lock: {}", e)))?;

        if intents.iter().any(|i| i.id == intent.id) {
            return Err(QueueError::DuplicateIntent(intent.id));
        }

        intents.push(intent);
        Ok(())
    }

    /// Snapshot of all live intents in queue order.
    pub fn snapshot(&self) -> QueueResult<Vec<QueuedIntent>> {
        let intents = self
            .intents
            .read()
            .map_err(|e| QueueError::Registry(format!("Failed to acquire read lock: {}", e)))?;

        Ok(intents.clone())
    }

    /// Mark an intent as being polled.
    ///
    /// Returns `true` when this caller flipped it from Pending to Polling;
    /// `false` when the intent is gone or another cycle already holds it.
    pub fn begin_poll(&self, id: IntentId) -> QueueResult<bool> {
        let mut intents = self
            .intents
            .write()
            .map_err(|e| QueueError::Registry(format!("Failed to acquire write lock: {}", e)))?;

        match intents.iter_mut().find(|i| i.id == id) {
            Some(intent) if intent.is_pending() => {
                intent.state = IntentState::Polling;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    /// Return a polled intent to the pending pool, stamping the poll time.
    /// A no-op when the intent was removed mid-poll.
    pub fn finish_poll(&self, id: IntentId, at: DateTime<Utc>) -> QueueResult<()> {
        let mut intents = self
            .intents
            .write()
            .map_err(|e| QueueError::Registry(format!("Failed to acquire write lock: {}", e)))?;

        if let Some(intent) = intents.iter_mut().find(|i| i.id == id) {
            intent.state = IntentState::Pending;
            intent.last_polled_at = Some(at);
        }
        Ok(())
    }

    /// Remove an intent from the queue, whatever its state.
    ///
    /// This is the terminal transition and the effectively-once gate: every
    /// settlement path (execute, expire, hand off, cancel) goes through it,
    /// and only the caller that got `Some` back may act on the intent.
    pub fn take(&self, id: IntentId) -> QueueResult<Option<QueuedIntent>> {
        let mut intents = self
            .intents
            .write()
            .map_err(|e| QueueError::Registry(format!("Failed to acquire write lock: {}", e)))?;

        let idx = intents.iter().position(|i| i.id == id);
        Ok(idx.map(|idx| intents.remove(idx)))
    }

    /// Number of live intents.
    pub fn len(&self) -> usize {
        self.intents.read().map(|i| i.len()).unwrap_or(0)
    }

    /// True when no intents are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IntentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
