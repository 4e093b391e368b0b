//! Per-user aggregate fold over ledger transactions.
//!
//! An `Aggregate` is never authoritative: it can always be rebuilt by folding
//! the ledger. The fold is commutative and associative with
//! `Aggregate::default()` as identity, so the same code serves full
//! recomputation and incremental merges of partial results.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Timestamp, Transaction, TransactionKind, UserId};

/// Summary statistic for one user in one league.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Sum of every transaction delta.
    pub score: Decimal,
    /// Number of `MATCH_RESULT` transactions.
    pub num_matches: u32,
    /// Best raw table score; `None` stands for negative infinity.
    pub highscore: Option<i64>,
    /// Count of untied finishes per placement.
    pub placements: BTreeMap<u8, u32>,
    /// Latest transaction time; `None` stands for negative infinity.
    pub last_activity: Option<Timestamp>,
}

impl Aggregate {
    /// The fold identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an arbitrary collection of one user's transactions.
    pub fn from_transactions<'a, I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        transactions
            .into_iter()
            .fold(Self::new(), |mut acc, tx| {
                acc.apply(tx);
                acc
            })
    }

    /// Fold a single transaction into this aggregate.
    pub fn apply(&mut self, tx: &Transaction) {
        self.score += tx.delta;
        self.last_activity = self.last_activity.max(Some(tx.time));

        if tx.kind != TransactionKind::MatchResult {
            return;
        }

        self.num_matches += 1;
        if let Some(seat) = tx.seat {
            self.highscore = self.highscore.max(Some(seat.raw_score));
            if let Some(placement) = seat.placement.as_exact() {
                *self.placements.entry(placement).or_insert(0) += 1;
            }
        }
    }

    /// Combine two partial aggregates of the same user.
    pub fn merge(mut self, other: &Aggregate) -> Self {
        self.score += other.score;
        self.num_matches += other.num_matches;
        self.highscore = self.highscore.max(other.highscore);
        self.last_activity = self.last_activity.max(other.last_activity);
        for (placement, count) in &other.placements {
            *self.placements.entry(*placement).or_insert(0) += count;
        }
        self
    }

    /// Untied first-place finishes.
    pub fn first_places(&self) -> u32 {
        self.placement_count(1)
    }

    pub fn placement_count(&self, placement: u8) -> u32 {
        self.placements.get(&placement).copied().unwrap_or(0)
    }

    /// Whether the user has played enough matches to be ranked.
    pub fn is_rank_eligible(&self, min_matches: u32) -> bool {
        self.num_matches >= min_matches
    }
}

/// Fold a league's transactions into one aggregate per user.
///
/// Fetch order is irrelevant. Users without transactions are absent from
/// the result; callers that need every member should default them.
pub fn aggregate_by_user<'a, I>(transactions: I) -> HashMap<UserId, Aggregate>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut out: HashMap<UserId, Aggregate> = HashMap::new();
    for tx in transactions {
        out.entry(tx.user_id).or_default().apply(tx);
    }
    out
}
