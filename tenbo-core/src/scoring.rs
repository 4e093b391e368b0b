//! Per-match score and penalty calculator.
//!
//! Turns one completed table's raw scores into ledger transactions: one
//! `MATCH_RESULT` per seat plus one `CHOMBO` per recorded violation. Raw
//! score validation is the caller's job; `CompletedMatch::is_balanced` is
//! provided for that check.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    LeagueId, MatchId, PlacementRange, SeatOutcome, TenboResult, Timestamp, Transaction, UserId,
    ValidationError,
};

/// Rules configured for a league's tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRules {
    /// Points each player starts the match with.
    pub starting_points: i64,
    /// Points subtracted before converting to league points.
    pub return_points: i64,
    /// Adjustment per exact placement, index 0 is first place.
    pub uma: Vec<Decimal>,
    /// Delta charged for each chombo beyond the free allowance.
    pub chombo_delta: Decimal,
}

/// One player's seat at a completed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatScore {
    pub user_id: UserId,
    /// Final score; a multiple of 100.
    pub raw_score: i64,
    /// One description per chombo recorded against this player, in order.
    pub chombos: Vec<String>,
    /// Chombos this player may still commit without a point penalty.
    pub free_chombos: u32,
}

/// A completed table, ready to be settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedMatch {
    pub match_id: MatchId,
    pub league_id: LeagueId,
    pub completed_at: Timestamp,
    /// Riichi sticks left on the table; a multiple of 1000.
    pub leftover_bets: i64,
    pub seats: Vec<SeatScore>,
}

impl CompletedMatch {
    /// Whether the scores and leftover bets add up to the points handed out.
    pub fn is_balanced(&self, rules: &TableRules) -> bool {
        let total: i64 = self.seats.iter().map(|s| s.raw_score).sum::<i64>() + self.leftover_bets;
        total == rules.starting_points * self.seats.len() as i64
    }
}

/// Settlement details for one seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatSettlement {
    pub user_id: UserId,
    pub placement: PlacementRange,
    pub delta: Decimal,
    /// Chombos in this match that cost points.
    pub chargeable_chombos: u32,
    /// Free-chombo allowance after this match.
    pub remaining_free_chombos: u32,
}

/// Output of settling one match.
///
/// `transactions` must be inserted atomically together with the match's
/// completion status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub transactions: Vec<Transaction>,
    pub seats: Vec<SeatSettlement>,
}

/// Placement range for each score, in input order.
///
/// `min` is one plus the number of strictly better scores; `max` is the
/// number of scores at least as good, so ties span every shared seat.
pub fn placements(scores: &[i64]) -> TenboResult<Vec<PlacementRange>> {
    scores
        .iter()
        .map(|score| -> TenboResult<PlacementRange> {
            let better = scores.iter().filter(|s| *s > score).count();
            let at_least = scores.iter().filter(|s| *s >= score).count();
            let min = to_placement(better + 1, scores.len())?;
            let max = to_placement(at_least, scores.len())?;
            Ok(PlacementRange::new(min, max)?)
        })
        .collect()
}

fn to_placement(value: usize, seats: usize) -> Result<u8, ValidationError> {
    u8::try_from(value).map_err(|_| ValidationError::PlacementOutOfRange {
        min: value,
        max: value,
        seats,
    })
}

/// Average uma over the placements a (possibly tied) seat spans.
fn uma_for(rules: &TableRules, placement: PlacementRange) -> Decimal {
    let span = &rules.uma[placement.min() as usize - 1..placement.max() as usize];
    let total: Decimal = span.iter().copied().sum();
    total / Decimal::from(span.len() as u64)
}

/// Settle one completed match into ledger transactions.
pub fn settle(rules: &TableRules, completed: &CompletedMatch) -> TenboResult<Settlement> {
    let seat_count = completed.seats.len();
    if seat_count == 0 {
        return Err(ValidationError::InvalidValue {
            field: "seats".to_string(),
            reason: "a match needs at least one seat".to_string(),
        }
        .into());
    }
    if rules.uma.len() != seat_count {
        return Err(ValidationError::UmaLengthMismatch {
            seats: seat_count,
            uma: rules.uma.len(),
        }
        .into());
    }

    let scores: Vec<i64> = completed.seats.iter().map(|s| s.raw_score).collect();
    let ranges = placements(&scores)?;
    let thousand = Decimal::from(1000);

    let mut transactions = Vec::with_capacity(seat_count);
    let mut seats = Vec::with_capacity(seat_count);

    for (seat, placement) in completed.seats.iter().zip(ranges) {
        let delta = Decimal::from(seat.raw_score - rules.return_points) / thousand
            + uma_for(rules, placement);

        transactions.push(Transaction::match_result(
            seat.user_id,
            completed.league_id,
            delta,
            completed.completed_at,
            completed.match_id,
            SeatOutcome {
                raw_score: seat.raw_score,
                placement,
            },
        ));

        for (occurrence, description) in seat.chombos.iter().enumerate() {
            let chombo_delta = if (occurrence as u64) < u64::from(seat.free_chombos) {
                Decimal::ZERO
            } else {
                rules.chombo_delta
            };
            transactions.push(Transaction::chombo(
                seat.user_id,
                completed.league_id,
                chombo_delta,
                completed.completed_at,
                completed.match_id,
                description.as_str(),
            ));
        }

        let committed = u32::try_from(seat.chombos.len()).unwrap_or(u32::MAX);
        seats.push(SeatSettlement {
            user_id: seat.user_id,
            placement,
            delta,
            chargeable_chombos: committed.saturating_sub(seat.free_chombos),
            remaining_free_chombos: seat.free_chombos.saturating_sub(committed),
        });
    }

    Ok(Settlement {
        transactions,
        seats,
    })
}
