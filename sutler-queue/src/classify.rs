//! Candidate classification.
//!
//! Pure decision logic for one intent against one lookup result: which of
//! the returned candidates are novel, and whether that resolves the intent.
//! The queue stays agnostic to what a candidate means; only its identity
//! participates here.
//!
//! The rules are asymmetric around the enqueue-time snapshot:
//!
//! - snapshot empty, exactly one candidate: that is the item, execute.
//! - snapshot empty, several candidates: nothing to diff against, so the
//!   choice cannot be automated. Hand off.
//! - snapshot non-empty, exactly one novel candidate: execute it.
//! - anything else: keep polling. Several novel candidates against a
//!   non-empty snapshot keep polling rather than handing off; with a diff
//!   available, later cycles can still collapse the set to one candidate.

use std::collections::HashSet;

use sutler_domain::{CandidateId, StashItem};

/// What a poll round concluded for one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No resolvable candidate; keep waiting
    NoneNovel,
    /// Exactly one novel candidate; execute against it
    Single(StashItem),
    /// Cannot auto-resolve; a human has to choose
    Ambiguous(Vec<StashItem>),
}

/// Classify a lookup result against an intent's known-identity snapshot.
///
/// Duplicate identities within one lookup count once; the first occurrence
/// wins.
pub fn classify_candidates(
    known: &HashSet<CandidateId>,
    candidates: &[StashItem],
) -> Classification {
    let mut seen: HashSet<&CandidateId> = HashSet::new();
    let mut novel: Vec<StashItem> = Vec::new();

    for item in candidates {
        if known.contains(&item.hash) {
            continue;
        }
        if seen.insert(&item.hash) {
            novel.push(item.clone());
        }
    }

    if known.is_empty() {
        match novel.len() {
            0 => Classification::NoneNovel,
            1 => Classification::Single(novel.remove(0)),
            _ => Classification::Ambiguous(novel),
        }
    } else {
        match novel.len() {
            1 => Classification::Single(novel.remove(0)),
            _ => Classification::NoneNovel,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
