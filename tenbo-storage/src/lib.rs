//! tenbo Storage - Ledger Seam and Leaderboard Cache
//!
//! Defines the ledger read contract, the cache store contract with an
//! in-memory implementation (and a Redis one behind `redis-store`), and the
//! orchestrator that keeps cached standings in step with the ledger.

pub mod cache;
pub mod ledger;
pub mod service;

pub use cache::{
    Batch, CacheStore, InMemoryCacheStore, LeaderboardCache, LeaderboardSnapshot,
    LeaderboardStats, LeaderboardStatsSnapshot, LeagueKeys, ReadSource, WatchSession,
};
#[cfg(feature = "redis-store")]
pub use cache::RedisCacheStore;
pub use ledger::{InMemoryLedger, LeagueSettings, LedgerStore, Member};
pub use service::LeaderboardService;
