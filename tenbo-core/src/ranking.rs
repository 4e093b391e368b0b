//! League ranking comparator.
//!
//! Ranked-eligible users (enough matches played) are ordered by:
//!
//! 1. higher score
//! 2. not under soft penalty
//! 3. more untied first places
//! 4. higher highscore
//! 5. salted per-league hash of the user id, ascending
//!
//! Everyone else is listed after them without a rank, ordered by matches
//! played, then score, then display name.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Aggregate, LeagueId, UserId};

/// Deterministic per-league tiebreak digest.
pub type TiebreakKey = [u8; 32];

/// One league member with their folded aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub user_id: UserId,
    pub display_name: String,
    /// Opted into the soft penalty: demoted at equal score and kept out of
    /// contention for first rank.
    pub soft_penalty: bool,
    pub aggregate: Aggregate,
}

/// A user's position in a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub user_id: UserId,
    pub aggregate: Aggregate,
    /// `None` for users below the league's minimum match count.
    pub rank: Option<u32>,
}

impl RankedEntry {
    pub fn is_ranked(&self) -> bool {
        self.rank.is_some()
    }
}

/// Orders a league's standings.
#[derive(Debug, Clone)]
pub struct Ranker {
    league_id: LeagueId,
    min_matches: u32,
    salt: String,
}

impl Ranker {
    pub fn new(league_id: LeagueId, min_matches: u32, salt: impl Into<String>) -> Self {
        Self {
            league_id,
            min_matches,
            salt: salt.into(),
        }
    }

    pub fn league_id(&self) -> LeagueId {
        self.league_id
    }

    pub fn min_matches(&self) -> u32 {
        self.min_matches
    }

    /// Stable within a league, unrelated across leagues, and not derivable
    /// from the user id without the salt.
    pub fn tiebreak_key(&self, user_id: UserId) -> TiebreakKey {
        let mut hasher = Sha256::new();
        hasher.update((self.salt.len() as u64).to_be_bytes());
        hasher.update(self.salt.as_bytes());
        hasher.update(self.league_id.as_uuid().as_bytes());
        hasher.update(user_id.as_uuid().as_bytes());
        hasher.finalize().into()
    }

    /// Split standings into ranked-eligible and unranked groups.
    pub fn partition(&self, standings: Vec<Standing>) -> (Vec<Standing>, Vec<Standing>) {
        standings
            .into_iter()
            .partition(|s| s.aggregate.is_rank_eligible(self.min_matches))
    }

    /// Order every standing and assign ranks.
    ///
    /// Ranked entries come first, numbered from 1. When every ranked entry is
    /// under soft penalty, numbering starts at 2 and rank 1 stays vacant.
    pub fn rank(&self, standings: Vec<Standing>) -> Vec<RankedEntry> {
        let (ranked, unranked) = self.partition(standings);
        let mut out = Vec::with_capacity(ranked.len() + unranked.len());

        let first_rank = if !ranked.is_empty() && ranked.iter().all(|s| s.soft_penalty) {
            2
        } else {
            1
        };

        let mut keyed: Vec<(TiebreakKey, Standing)> = ranked
            .into_iter()
            .map(|s| (self.tiebreak_key(s.user_id), s))
            .collect();
        keyed.sort_by(|(ka, a), (kb, b)| compare_ranked(a, b).then_with(|| ka.cmp(kb)));

        out.extend(keyed.into_iter().zip(first_rank..).map(|((_, s), rank)| RankedEntry {
            user_id: s.user_id,
            aggregate: s.aggregate,
            rank: Some(rank),
        }));

        let mut unranked = unranked;
        unranked.sort_by(compare_unranked);
        out.extend(unranked.into_iter().map(|s| RankedEntry {
            user_id: s.user_id,
            aggregate: s.aggregate,
            rank: None,
        }));

        out
    }
}

/// Criteria 1 through 4 of the ranked ordering; the salted hash is applied
/// by `Ranker::rank`.
pub fn compare_ranked(a: &Standing, b: &Standing) -> Ordering {
    b.aggregate
        .score
        .cmp(&a.aggregate.score)
        .then_with(|| a.soft_penalty.cmp(&b.soft_penalty))
        .then_with(|| b.aggregate.first_places().cmp(&a.aggregate.first_places()))
        .then_with(|| b.aggregate.highscore.cmp(&a.aggregate.highscore))
}

/// Ordering of users below the match threshold.
pub fn compare_unranked(a: &Standing, b: &Standing) -> Ordering {
    b.aggregate
        .num_matches
        .cmp(&a.aggregate.num_matches)
        .then_with(|| b.aggregate.score.cmp(&a.aggregate.score))
        .then_with(|| a.display_name.cmp(&b.display_name))
}
