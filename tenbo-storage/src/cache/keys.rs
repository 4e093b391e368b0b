//! League-scoped cache key bundle.
//!
//! `LeagueKeys`'s private constructor makes it impossible to build one of a
//! league's four keys without also building the other three from the same
//! prefix and league id. Every key in the bundle shares the hash tag
//! `{<prefix>:<league_id>}`, so a clustered store places them in one slot
//! and the atomic write batch never spans shards.
//!
//! # Key Format
//!
//! ```text
//! {leaderboard:0190f2c1-...}:updated
//! {leaderboard:0190f2c1-...}:leaderboard
//! {leaderboard:0190f2c1-...}:records
//! {leaderboard:0190f2c1-...}:unranked
//! ```

use std::fmt;

use tenbo_core::LeagueId;

const SUFFIX_UPDATED: &str = "updated";
const SUFFIX_LEADERBOARD: &str = "leaderboard";
const SUFFIX_RECORDS: &str = "records";
const SUFFIX_UNRANKED: &str = "unranked";

/// The four co-located keys holding one league's cached standings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeagueKeys {
    inner: LeagueKeysInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LeagueKeysInner {
    league_id: LeagueId,
    updated: String,
    leaderboard: String,
    records: String,
    unranked: String,
}

impl LeagueKeys {
    /// Build the key bundle for a league under a namespace prefix.
    pub fn new(prefix: &str, league_id: LeagueId) -> Self {
        let tag = format!("{{{}:{}}}", prefix, league_id);
        let key = |suffix: &str| format!("{}:{}", tag, suffix);
        Self {
            inner: LeagueKeysInner {
                league_id,
                updated: key(SUFFIX_UPDATED),
                leaderboard: key(SUFFIX_LEADERBOARD),
                records: key(SUFFIX_RECORDS),
                unranked: key(SUFFIX_UNRANKED),
            },
        }
    }

    pub fn league_id(&self) -> LeagueId {
        self.inner.league_id
    }

    /// Last-write timestamp; its presence is the sole existence signal.
    pub fn updated(&self) -> &str {
        &self.inner.updated
    }

    /// Sorted set of ranked-eligible users by packed score.
    pub fn leaderboard(&self) -> &str {
        &self.inner.leaderboard
    }

    /// Hash of user id to serialized aggregate.
    pub fn records(&self) -> &str {
        &self.inner.records
    }

    /// Sorted set of below-threshold users by match count.
    pub fn unranked(&self) -> &str {
        &self.inner.unranked
    }

    /// Every key in the bundle, `updated` first.
    pub fn all(&self) -> [&str; 4] {
        [
            self.updated(),
            self.leaderboard(),
            self.records(),
            self.unranked(),
        ]
    }

    /// The three keys holding standings data, without `updated`.
    pub fn data(&self) -> [&str; 3] {
        [self.leaderboard(), self.records(), self.unranked()]
    }

    /// The shared hash tag, braces included.
    pub fn hash_tag(&self) -> &str {
        let end = self.inner.updated.len() - SUFFIX_UPDATED.len() - 1;
        &self.inner.updated[..end]
    }
}

impl fmt::Display for LeagueKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hash_tag())
    }
}
