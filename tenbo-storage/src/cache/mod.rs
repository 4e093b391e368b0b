//! Leaderboard cache layer.
//!
//! Each league's standings live under four keys sharing one hash tag, so a
//! cluster places them on the same slot and a single transaction can touch
//! all of them:
//!
//! - `{<prefix>:<league>}:updated` holds the RFC 3339 time of the last write
//! - `{<prefix>:<league>}:leaderboard` is a sorted set of ranked users
//! - `{<prefix>:<league>}:unranked` is a sorted set of users below the match
//!   minimum, scored by match count
//! - `{<prefix>:<league>}:records` is a hash of user id to serialized aggregate
//!
//! The ledger stays the source of truth. The cache is rebuilt from it on a
//! miss and patched through [`LeaderboardCache::invalidate`] after writes.
//!
//! # Example
//!
//! ```ignore
//! let cache = LeaderboardCache::new(store, ledger, LeaderboardConfig::default());
//!
//! // After settling a match
//! cache.invalidate(league_id, settings.min_matches_for_rank, Some(&seated)).await?;
//!
//! let board = cache.get_leaderboard(league_id).await?;
//! for entry in board.ranked() {
//!     println!("{:?} {}", entry.rank, entry.aggregate.score);
//! }
//! ```

pub mod keys;
pub mod memory;
pub mod orchestrator;
pub mod packed;
#[cfg(feature = "redis-store")]
pub mod redis_store;
pub mod retry;
pub mod snapshot;
pub mod stats;
pub mod traits;

pub use keys::LeagueKeys;
pub use memory::{InMemoryCacheStore, InMemoryWatch};
pub use orchestrator::{build_write_batch, format_timestamp, parse_timestamp, LeaderboardCache};
pub use packed::packed_score;
#[cfg(feature = "redis-store")]
pub use redis_store::{RedisCacheStore, RedisWatch};
pub use retry::retry_with_backoff;
pub use snapshot::{LeaderboardSnapshot, ReadSource};
pub use stats::{LeaderboardStats, LeaderboardStatsSnapshot};
pub use traits::{hscan_all, Batch, CacheStore, Command, WatchSession};
