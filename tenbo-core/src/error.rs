//! Error types for tenbo operations

use crate::{LeagueId, UserId};
use thiserror::Error;

/// Validation errors for match and rule input.
///
/// Raw score validation happens upstream; these cover the table rules the
/// calculator itself depends on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Placement range {min}..={max} out of bounds for {seats} seats")]
    PlacementOutOfRange { min: usize, max: usize, seats: usize },

    #[error("Uma table has {uma} entries but the match has {seats} seats")]
    UmaLengthMismatch { seats: usize, uma: usize },
}

/// Errors raised by the relational ledger collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("League not found: {league_id}")]
    LeagueNotFound { league_id: LeagueId },

    #[error("User {user_id} is not a member of league {league_id}")]
    UserNotFound { league_id: LeagueId, user_id: UserId },

    #[error("Ledger unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors raised by the cache store and the orchestrator on top of it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Watched key {key} changed before commit")]
    WatchConflict { key: String },

    #[error("Cache store unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("{operation} gave up after {attempts} attempts")]
    RetryExhausted { operation: String, attempts: u32 },

    #[error("League {league_id}: user {user_id} is ranked but has no cached record")]
    ConsistencyViolation { league_id: LeagueId, user_id: String },

    #[error("Key {key} holds the wrong kind of value for this command")]
    WrongType { key: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Leaderboard service is stopped")]
    ServiceStopped,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all tenbo errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenboError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TenboError {
    /// Whether a bounded retry loop should try the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TenboError::Cache(CacheError::WatchConflict { .. })
                | TenboError::Cache(CacheError::Unreachable { .. })
        )
    }

    /// Whether the failure is temporary from the caller's point of view.
    pub fn is_transient(&self) -> bool {
        self.is_retryable()
            || matches!(self, TenboError::Cache(CacheError::RetryExhausted { .. }))
    }
}

/// Result type alias for tenbo operations.
pub type TenboResult<T> = Result<T, TenboError>;

// =============================================================================
// TESTS
// =============================================================================
