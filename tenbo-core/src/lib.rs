//! tenbo Core - League Standings Types
//!
//! Ledger transactions, the per-match score calculator, the associative
//! aggregate fold and the ranking comparator. Everything here is pure and
//! synchronous; cache orchestration lives in tenbo-storage.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod identity;
pub mod ranking;
pub mod scoring;
pub mod transaction;

pub use aggregate::{aggregate_by_user, Aggregate};
pub use config::{LeaderboardConfig, RetryPolicy, DEFAULT_CACHE_TTL, DEFAULT_KEY_PREFIX};
pub use error::{CacheError, ConfigError, LedgerError, TenboError, TenboResult, ValidationError};
pub use identity::{LeagueId, MatchId, Timestamp, UserId};
pub use ranking::{RankedEntry, Ranker, Standing, TiebreakKey};
pub use scoring::{placements, settle, CompletedMatch, SeatScore, SeatSettlement, Settlement, TableRules};
pub use transaction::{PlacementRange, SeatOutcome, Transaction, TransactionKind};

/// Exact decimal type used for every point value.
pub use rust_decimal::Decimal;
