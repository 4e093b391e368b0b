//! Ledger transaction types.
//!
//! Transactions are immutable. Editing a match deletes and recreates every
//! transaction linked to it; nothing here is patched in place.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{LeagueId, MatchId, Timestamp, UserId, ValidationError};

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Settlement of one completed match.
    MatchResult,
    /// Penalty for a rule violation during a match.
    Chombo,
    /// Starting balance granted on joining a league.
    Initial,
    /// Any administrative correction.
    OtherAdjustment,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionKind::MatchResult => "MATCH_RESULT",
            TransactionKind::Chombo => "CHOMBO",
            TransactionKind::Initial => "INITIAL",
            TransactionKind::OtherAdjustment => "OTHER_ADJUSTMENT",
        };
        f.write_str(s)
    }
}

/// Closed, 1-based placement range. Tied players share a range spanning
/// every seat their score could occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementRange {
    min: u8,
    max: u8,
}

impl PlacementRange {
    pub fn new(min: u8, max: u8) -> Result<Self, ValidationError> {
        if min == 0 || min > max {
            return Err(ValidationError::PlacementOutOfRange {
                min: min as usize,
                max: max as usize,
                seats: max as usize,
            });
        }
        Ok(Self { min, max })
    }

    /// An untied placement.
    pub fn exact(placement: u8) -> Result<Self, ValidationError> {
        Self::new(placement, placement)
    }

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    /// The placement when no tie was involved.
    pub fn as_exact(&self) -> Option<u8> {
        (self.min == self.max).then_some(self.min)
    }

    pub fn is_tied(&self) -> bool {
        self.min != self.max
    }
}

/// Seat outcome joined from the match a `MATCH_RESULT` transaction settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatOutcome {
    /// Final table score before return points are subtracted.
    pub raw_score: i64,
    pub placement: PlacementRange,
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub user_id: UserId,
    pub league_id: LeagueId,
    pub delta: Decimal,
    pub time: Timestamp,
    /// Match this entry is keyed to; all of a match's entries are
    /// regenerated together when the match is edited.
    pub match_ref: Option<MatchId>,
    /// Present only on `MATCH_RESULT` entries.
    pub seat: Option<SeatOutcome>,
    pub description: Option<String>,
}

impl Transaction {
    /// Settlement of one seat in a completed match.
    pub fn match_result(
        user_id: UserId,
        league_id: LeagueId,
        delta: Decimal,
        time: Timestamp,
        match_id: MatchId,
        seat: SeatOutcome,
    ) -> Self {
        Self {
            kind: TransactionKind::MatchResult,
            user_id,
            league_id,
            delta,
            time,
            match_ref: Some(match_id),
            seat: Some(seat),
            description: None,
        }
    }

    /// Chombo penalty; `delta` is zero while the player still has free chombos.
    pub fn chombo(
        user_id: UserId,
        league_id: LeagueId,
        delta: Decimal,
        time: Timestamp,
        match_id: MatchId,
        description: impl Into<String>,
    ) -> Self {
        let description = description.into();
        Self {
            kind: TransactionKind::Chombo,
            user_id,
            league_id,
            delta,
            time,
            match_ref: Some(match_id),
            seat: None,
            description: (!description.is_empty()).then_some(description),
        }
    }

    /// Administrative entry of any non-match kind.
    pub fn adjustment(
        kind: TransactionKind,
        user_id: UserId,
        league_id: LeagueId,
        delta: Decimal,
        time: Timestamp,
        description: Option<String>,
    ) -> Self {
        Self {
            kind,
            user_id,
            league_id,
            delta,
            time,
            match_ref: None,
            seat: None,
            description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_placement_range_exact() {
        let p = PlacementRange::exact(2).expect("valid");
        assert_eq!(p.as_exact(), Some(2));
        assert!(!p.is_tied());
    }

    #[test]
    fn test_placement_range_tied() {
        let p = PlacementRange::new(1, 2).expect("valid");
        assert_eq!(p.as_exact(), None);
        assert!(p.is_tied());
    }

    #[test]
    fn test_placement_range_rejects_inverted_and_zero() {
        assert!(PlacementRange::new(3, 2).is_err());
        assert!(PlacementRange::new(0, 1).is_err());
    }

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&TransactionKind::OtherAdjustment).expect("serialize");
        assert_eq!(json, "\"OTHER_ADJUSTMENT\"");
        assert_eq!(TransactionKind::MatchResult.to_string(), "MATCH_RESULT");
    }

    #[test]
    fn test_chombo_is_keyed_to_match_without_seat() {
        let match_id = MatchId::now_v7();
        let tx = Transaction::chombo(
            UserId::now_v7(),
            LeagueId::now_v7(),
            Decimal::new(-20, 0),
            Utc::now(),
            match_id,
            "false riichi",
        );
        assert_eq!(tx.kind, TransactionKind::Chombo);
        assert_eq!(tx.match_ref, Some(match_id));
        assert!(tx.seat.is_none());
        assert_eq!(tx.description.as_deref(), Some("false riichi"));
    }

    #[test]
    fn test_chombo_empty_description_is_none() {
        let tx = Transaction::chombo(
            UserId::now_v7(),
            LeagueId::now_v7(),
            Decimal::ZERO,
            Utc::now(),
            MatchId::now_v7(),
            "",
        );
        assert!(tx.description.is_none());
    }
}
