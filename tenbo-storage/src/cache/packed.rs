//! Packed sorted-set score for the `leaderboard` key.
//!
//! ```text
//! packed = round(score * 120) + (min(first_places, 99) * 1000 + hs_norm) / 100_000
//! hs_norm = clamp((highscore + 100_000) / 300, 0, 999)
//! ```
//!
//! The integer part orders by score at 1/120 point resolution. The fraction
//! breaks ties by first places, then by a clamped highscore bucket. Soft
//! penalty and the salted tiebreak are not represented, so store order only
//! approximates `Ranker` order.

use rust_decimal::prelude::ToPrimitive;
use tenbo_core::{Aggregate, Decimal};

/// Points are rescaled to this many steps per point.
pub const SCORE_RESOLUTION: i64 = 120;

/// First-place counts above this value pack as this value.
pub const MAX_PACKED_FIRST_PLACES: u32 = 99;

const HIGHSCORE_OFFSET: i64 = 100_000;
const HIGHSCORE_STEP: i64 = 300;
const HIGHSCORE_BUCKETS: i64 = 999;
const FIRST_PLACE_WEIGHT: u32 = 1_000;
const FRACTION_DIVISOR: f64 = 100_000.0;

/// Pack an aggregate into a single sortable number.
pub fn packed_score(aggregate: &Aggregate) -> f64 {
    let whole = scaled_score(aggregate.score);
    let first = aggregate.first_places().min(MAX_PACKED_FIRST_PLACES);
    let fraction = (first * FIRST_PLACE_WEIGHT) as f64 + highscore_bucket(aggregate.highscore) as f64;
    whole as f64 + fraction / FRACTION_DIVISOR
}

/// Score rounded to 1/120 of a point, saturating at the `i64` range.
pub fn scaled_score(score: Decimal) -> i64 {
    let scaled = (score * Decimal::from(SCORE_RESOLUTION)).round();
    scaled.to_i64().unwrap_or(if scaled.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Highscore bucket in `0..=999`; a missing highscore packs as 0.
pub fn highscore_bucket(highscore: Option<i64>) -> u32 {
    match highscore {
        None => 0,
        Some(raw) => {
            let bucket = raw.saturating_add(HIGHSCORE_OFFSET).div_euclid(HIGHSCORE_STEP);
            bucket.clamp(0, HIGHSCORE_BUCKETS) as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn aggregate(score: Decimal, first_places: u32, highscore: Option<i64>) -> Aggregate {
        let mut placements = BTreeMap::new();
        if first_places > 0 {
            placements.insert(1, first_places);
        }
        Aggregate {
            score,
            num_matches: first_places.max(1),
            highscore,
            placements,
            last_activity: None,
        }
    }

    #[test]
    fn test_layout() {
        // 45.0 * 120 = 5400; 2 firsts and (48000 + 100000) / 300 = 493
        let packed = packed_score(&aggregate(dec!(45.0), 2, Some(48_000)));
        assert!((packed - 5400.02493).abs() < 1e-9);
    }

    #[test]
    fn test_score_dominates_fraction() {
        let better_score = aggregate(dec!(10.1), 0, None);
        let better_fraction = aggregate(dec!(10.0), 99, Some(10_000_000));
        assert!(packed_score(&better_score) > packed_score(&better_fraction));
    }

    #[test]
    fn test_first_places_break_score_ties() {
        let more = aggregate(dec!(-3.5), 4, Some(20_000));
        let fewer = aggregate(dec!(-3.5), 3, Some(90_000));
        assert!(packed_score(&more) > packed_score(&fewer));
    }

    #[test]
    fn test_highscore_breaks_remaining_ties() {
        let high = aggregate(dec!(0), 1, Some(60_000));
        let low = aggregate(dec!(0), 1, Some(30_000));
        let none = aggregate(dec!(0), 1, None);
        assert!(packed_score(&high) > packed_score(&low));
        assert!(packed_score(&low) > packed_score(&none));
    }

    #[test]
    fn test_clamping_loses_order_at_extremes() {
        let first_places_capped = aggregate(dec!(1), 150, None);
        let at_cap = aggregate(dec!(1), 99, None);
        assert_eq!(packed_score(&first_places_capped), packed_score(&at_cap));

        assert_eq!(highscore_bucket(Some(-500_000)), 0);
        assert_eq!(highscore_bucket(Some(5_000_000)), 999);
        assert_eq!(highscore_bucket(Some(i64::MAX)), 999);
    }

    #[test]
    fn test_scaled_score_rounds() {
        assert_eq!(scaled_score(dec!(0.004)), 0);
        assert_eq!(scaled_score(dec!(0.005)), 1);
        assert_eq!(scaled_score(dec!(-35) / dec!(3)), -1400);
    }
}
