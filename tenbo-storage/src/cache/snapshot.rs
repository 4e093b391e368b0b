//! Leaderboard read results.

use serde::{Deserialize, Serialize};
use tenbo_core::{LeagueId, RankedEntry, Timestamp, UserId};

/// Where a snapshot's entries came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadSource {
    /// Existing cache keys.
    Cache,
    /// Cache keys rebuilt from the ledger during this read.
    Regenerated,
    /// Ranked directly from the ledger without touching the cache.
    Ledger,
}

/// An ordered leaderboard as seen by one read.
///
/// Built fresh on every read and never cached as a whole; only its
/// constituent keys are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub league_id: LeagueId,
    /// Ranked entries first, then unranked.
    pub entries: Vec<RankedEntry>,
    /// Time of the last write to the league's cache keys.
    pub last_updated: Timestamp,
    pub source: ReadSource,
}

impl LeaderboardSnapshot {
    pub fn ranked(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter().filter(|e| e.rank.is_some())
    }

    pub fn unranked(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter().filter(|e| e.rank.is_none())
    }

    /// Zero-based index of a user's entry.
    pub fn position_of(&self, user_id: UserId) -> Option<usize> {
        self.entries.iter().position(|e| e.user_id == user_id)
    }

    pub fn entry(&self, user_id: UserId) -> Option<&RankedEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    /// `(user, rank)` pairs in order.
    pub fn ranks(&self) -> Vec<(UserId, Option<u32>)> {
        self.entries.iter().map(|e| (e.user_id, e.rank)).collect()
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
