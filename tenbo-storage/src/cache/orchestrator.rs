//! Read-through/write-through leaderboard cache.
//!
//! # Read path
//!
//! 1. Probe the league's `updated` key. Absent means a miss: regenerate the
//!    whole league from the ledger, then read once more.
//! 2. Watch `records`, read both sorted sets in descending order, read
//!    `updated`, batch-read the records of every listed user.
//! 3. Commit a batch refreshing the TTL of all four keys. If `records`
//!    changed since the watch, the read is torn: discard it and retry with
//!    backoff.
//! 4. Ranked ids get positional ranks 1..N in store order; unranked ids
//!    get none.
//!
//! # Write path
//!
//! `invalidate` recomputes aggregates for some or all members and publishes
//! them in one atomic batch: records, sorted-set moves, the `updated` stamp
//! and the TTL refresh all land together. A write covering the whole league
//! clears the data keys first inside the same batch. A partial write is
//! committed under a watch on `updated`; if the league has no cache it is
//! widened to the whole league.
//!
//! Full-population writers are not serialized; the last batch to commit
//! wins.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use tenbo_core::{
    aggregate_by_user, Aggregate, CacheError, LeaderboardConfig, LeagueId, LedgerError,
    RankedEntry, Ranker, Standing, TenboResult, Timestamp, UserId,
};
use tracing::{debug, error, info, instrument, warn};

use super::keys::LeagueKeys;
use super::packed::packed_score;
use super::retry::retry_with_backoff;
use super::snapshot::{LeaderboardSnapshot, ReadSource};
use super::stats::LeaderboardStats;
use super::traits::{Batch, CacheStore, WatchSession};
use crate::ledger::LedgerStore;

/// Leaderboard cache orchestrator.
///
/// # Type Parameters
///
/// - `S`: the shared cache store
/// - `L`: the ledger that is the source of truth
pub struct LeaderboardCache<S, L>
where
    S: CacheStore,
    L: LedgerStore,
{
    store: Arc<S>,
    ledger: Arc<L>,
    config: LeaderboardConfig,
    stats: Arc<LeaderboardStats>,
}

impl<S, L> LeaderboardCache<S, L>
where
    S: CacheStore,
    L: LedgerStore,
{
    pub fn new(store: Arc<S>, ledger: Arc<L>, config: LeaderboardConfig) -> Self {
        Self {
            store,
            ledger,
            config,
            stats: Arc::new(LeaderboardStats::new()),
        }
    }

    pub fn with_defaults(store: Arc<S>, ledger: Arc<L>) -> Self {
        Self::new(store, ledger, LeaderboardConfig::default())
    }

    pub fn config(&self) -> &LeaderboardConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn stats(&self) -> &LeaderboardStats {
        &self.stats
    }

    /// Key bundle for a league under the configured prefix.
    pub fn keys(&self, league_id: LeagueId) -> LeagueKeys {
        LeagueKeys::new(&self.config.key_prefix, league_id)
    }

    pub fn ranker(&self, league_id: LeagueId, min_matches: u32) -> Ranker {
        Ranker::new(league_id, min_matches, self.config.tiebreak_salt.clone())
    }

    /// Serve a league's leaderboard, regenerating it from the ledger on a
    /// cache miss.
    ///
    /// Fails with `CacheError::RetryExhausted` when torn reads persist past
    /// the retry budget or the rebuilt keys vanish before they can be read.
    #[instrument(skip_all, fields(league_id = %league_id))]
    pub async fn get_leaderboard(&self, league_id: LeagueId) -> TenboResult<LeaderboardSnapshot> {
        let keys = self.keys(league_id);

        if let Some(snapshot) = self.read_cached(&keys, ReadSource::Cache).await? {
            self.stats.record_hit();
            debug!(entries = snapshot.len(), "Leaderboard cache hit");
            return Ok(snapshot);
        }

        self.stats.record_miss();
        debug!("Leaderboard cache miss");
        self.regenerate(league_id).await?;

        match self.read_cached(&keys, ReadSource::Regenerated).await? {
            Some(snapshot) => Ok(snapshot),
            None => {
                warn!("Leaderboard keys missing right after regeneration");
                Err(CacheError::RetryExhausted {
                    operation: "get_leaderboard".to_string(),
                    attempts: 2,
                }
                .into())
            }
        }
    }

    /// Whether `candidate` is newer than the league's last cache write.
    /// An absent cache is always stale.
    #[instrument(skip_all, fields(league_id = %league_id))]
    pub async fn is_stale(&self, league_id: LeagueId, candidate: Timestamp) -> TenboResult<bool> {
        let keys = &self.keys(league_id);
        let updated = retry_with_backoff(&self.config.retry, "is_stale", move || {
            self.store.get(keys.updated())
        })
        .await?;

        match updated {
            None => Ok(true),
            Some(raw) => Ok(candidate > parse_timestamp(&raw)?),
        }
    }

    /// Recompute and atomically republish cached standings for `users`, or
    /// for every member when `users` is `None`.
    #[instrument(skip_all, fields(league_id = %league_id, min_matches = min_matches, users = ?users.map(|u| u.len())))]
    pub async fn invalidate(
        &self,
        league_id: LeagueId,
        min_matches: u32,
        users: Option<&[UserId]>,
    ) -> TenboResult<()> {
        let written = self.publish(league_id, min_matches, users).await?;
        self.stats.record_invalidation();
        debug!(written, "Leaderboard invalidated");
        Ok(())
    }

    /// Rebuild a league's cache keys from the full ledger.
    #[instrument(skip_all, fields(league_id = %league_id))]
    pub async fn regenerate(&self, league_id: LeagueId) -> TenboResult<()> {
        let started = Instant::now();
        let settings = self.ledger.league(league_id).await?;
        let written = self
            .publish(league_id, settings.min_matches_for_rank, None)
            .await?;
        self.stats.record_regeneration();
        info!(
            users = written,
            min_matches = settings.min_matches_for_rank,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Leaderboard regenerated"
        );
        Ok(())
    }

    /// Rank a league straight from the ledger with the exact comparator,
    /// bypassing the cache.
    #[instrument(skip_all, fields(league_id = %league_id))]
    pub async fn rank_from_ledger(&self, league_id: LeagueId) -> TenboResult<LeaderboardSnapshot> {
        let settings = self.ledger.league(league_id).await?;
        let standings = self.load_standings(league_id, None).await?;
        let entries = self
            .ranker(league_id, settings.min_matches_for_rank)
            .rank(standings);
        Ok(LeaderboardSnapshot {
            league_id,
            entries,
            last_updated: Utc::now(),
            source: ReadSource::Ledger,
        })
    }

    async fn read_cached(
        &self,
        keys: &LeagueKeys,
        source: ReadSource,
    ) -> TenboResult<Option<LeaderboardSnapshot>> {
        retry_with_backoff(&self.config.retry, "read_leaderboard", move || {
            self.try_read(keys, source)
        })
        .await
    }

    async fn try_read(
        &self,
        keys: &LeagueKeys,
        source: ReadSource,
    ) -> TenboResult<Option<LeaderboardSnapshot>> {
        if !self.store.exists(keys.updated()).await? {
            return Ok(None);
        }

        let watch = self.store.watch(&[keys.records()]).await?;
        let RawView {
            ranked_len,
            ids,
            records,
            updated,
        } = match self.read_raw(keys).await {
            Ok(view) => view,
            Err(e) => {
                if let Err(discard) = watch.discard().await {
                    debug!(error = %discard, "Failed to release watch");
                }
                return Err(e);
            }
        };

        let mut refresh = Batch::new();
        for key in keys.all() {
            refresh.expire(key, self.config.ttl);
        }
        if !watch.exec(refresh).await? {
            self.stats.record_watch_conflict();
            return Err(CacheError::WatchConflict {
                key: keys.records().to_string(),
            }
            .into());
        }

        let Some(updated) = updated else {
            return Ok(None);
        };

        let mut entries = Vec::with_capacity(ids.len());
        let mut rank = 0u32;
        for (position, (member, record)) in ids.iter().zip(records).enumerate() {
            let user_id = UserId::from_str(member).map_err(|e| CacheError::Serialization {
                reason: format!("bad member {member} in {}: {e}", keys),
            })?;
            let Some(record) = record else {
                self.stats.record_consistency_violation();
                error!(
                    league_id = %keys.league_id(),
                    user_id = %member,
                    "Listed user has no cached record"
                );
                return Err(CacheError::ConsistencyViolation {
                    league_id: keys.league_id(),
                    user_id: member.clone(),
                }
                .into());
            };
            let aggregate: Aggregate = serde_json::from_str(&record).map_err(|e| {
                CacheError::Serialization {
                    reason: format!("record of {member}: {e}"),
                }
            })?;

            let is_ranked = position < ranked_len;
            if is_ranked {
                rank += 1;
            }
            entries.push(RankedEntry {
                user_id,
                aggregate,
                rank: is_ranked.then_some(rank),
            });
        }

        Ok(Some(LeaderboardSnapshot {
            league_id: keys.league_id(),
            entries,
            last_updated: parse_timestamp(&updated)?,
            source,
        }))
    }

    /// Unchecked reads taken while `records` is watched.
    async fn read_raw(&self, keys: &LeagueKeys) -> TenboResult<RawView> {
        let ranked = self.store.zrevrange(keys.leaderboard(), 0, -1).await?;
        let unranked = self.store.zrevrange(keys.unranked(), 0, -1).await?;
        let updated = self.store.get(keys.updated()).await?;

        let ids: Vec<String> = ranked
            .iter()
            .chain(unranked.iter())
            .map(|(member, _)| member.clone())
            .collect();
        let records = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.hmget(keys.records(), &ids).await?
        };
        Ok(RawView {
            ranked_len: ranked.len(),
            ids,
            records,
            updated,
        })
    }

    /// Load standings for every member, or only for `users`.
    async fn load_standings(
        &self,
        league_id: LeagueId,
        users: Option<&[UserId]>,
    ) -> TenboResult<Vec<Standing>> {
        let mut members = self.ledger.members(league_id).await?;
        if let Some(users) = users {
            if let Some(missing) = users
                .iter()
                .find(|id| !members.iter().any(|m| m.user_id == **id))
            {
                return Err(LedgerError::UserNotFound {
                    league_id,
                    user_id: *missing,
                }
                .into());
            }
            members.retain(|m| users.contains(&m.user_id));
        }

        let transactions = self.ledger.transactions(league_id, users).await?;
        let mut by_user = aggregate_by_user(&transactions);

        Ok(members
            .into_iter()
            .map(|m| Standing {
                aggregate: by_user.remove(&m.user_id).unwrap_or_default(),
                user_id: m.user_id,
                display_name: m.display_name,
                soft_penalty: m.soft_penalty,
            })
            .collect())
    }

    /// Recompute and write standings; returns how many users were written.
    ///
    /// A partial write only lands on a live cache. When `updated` is absent
    /// the write covers the whole league instead, so a cold cache never
    /// holds a subset of members.
    async fn publish(
        &self,
        league_id: LeagueId,
        min_matches: u32,
        users: Option<&[UserId]>,
    ) -> TenboResult<usize> {
        let keys = &self.keys(league_id);
        let ranker = self.ranker(league_id, min_matches);

        if let Some(users) = users {
            let standings = self.load_standings(league_id, Some(users)).await?;
            let written = standings.len();
            let batch = &build_write_batch(keys, &ranker, standings, false, self.config.ttl, Utc::now())?;
            let landed = retry_with_backoff(&self.config.retry, "publish_leaderboard", move || {
                self.try_publish_partial(keys, batch)
            })
            .await?;
            if landed {
                return Ok(written);
            }
            debug!("No cached leaderboard; publishing every member");
        }

        let standings = self.load_standings(league_id, None).await?;
        let written = standings.len();
        let batch = &build_write_batch(keys, &ranker, standings, true, self.config.ttl, Utc::now())?;
        retry_with_backoff(&self.config.retry, "publish_leaderboard", move || {
            self.store.execute(batch.clone())
        })
        .await?;
        Ok(written)
    }

    /// Commit `batch` only while `updated` stays present. Returns false,
    /// writing nothing, when the league has no cache.
    async fn try_publish_partial(&self, keys: &LeagueKeys, batch: &Batch) -> TenboResult<bool> {
        let watch = self.store.watch(&[keys.updated()]).await?;
        if !self.store.exists(keys.updated()).await? {
            watch.discard().await?;
            return Ok(false);
        }
        if !watch.exec(batch.clone()).await? {
            self.stats.record_watch_conflict();
            return Err(CacheError::WatchConflict {
                key: keys.updated().to_string(),
            }
            .into());
        }
        Ok(true)
    }
}

/// Ranked ids first, then unranked ids, each paired with its record.
struct RawView {
    ranked_len: usize,
    ids: Vec<String>,
    records: Vec<Option<String>>,
    updated: Option<String>,
}

impl<S, L> Clone for LeaderboardCache<S, L>
where
    S: CacheStore,
    L: LedgerStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Build the single atomic batch that publishes `standings`.
///
/// With `full_population` set the three data keys are deleted first, so
/// users missing from `standings` disappear from the cache.
pub fn build_write_batch(
    keys: &LeagueKeys,
    ranker: &Ranker,
    standings: Vec<Standing>,
    full_population: bool,
    ttl: std::time::Duration,
    now: Timestamp,
) -> TenboResult<Batch> {
    let mut batch = Batch::new();
    if full_population {
        for key in keys.data() {
            batch.del(key);
        }
    }

    let (ranked, unranked) = ranker.partition(standings);
    for standing in &ranked {
        let member = standing.user_id.to_string();
        batch
            .hset(keys.records(), member.clone(), encode_record(&standing.aggregate)?)
            .zrem(keys.unranked(), member.clone())
            .zadd(keys.leaderboard(), member, packed_score(&standing.aggregate));
    }
    for standing in &unranked {
        let member = standing.user_id.to_string();
        batch
            .hset(keys.records(), member.clone(), encode_record(&standing.aggregate)?)
            .zrem(keys.leaderboard(), member.clone())
            .zadd(
                keys.unranked(),
                member,
                f64::from(standing.aggregate.num_matches),
            );
    }

    batch.set(keys.updated(), format_timestamp(now));
    for key in keys.all() {
        batch.expire(key, ttl);
    }
    Ok(batch)
}

fn encode_record(aggregate: &Aggregate) -> TenboResult<String> {
    serde_json::to_string(aggregate).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
        .into()
    })
}

/// Timestamps are stored as RFC 3339 with full sub-second precision.
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(raw: &str) -> TenboResult<Timestamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::Serialization {
                reason: format!("bad timestamp {raw:?}: {e}"),
            }
            .into()
        })
}
