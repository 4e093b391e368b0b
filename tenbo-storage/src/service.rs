//! Leaderboard service lifecycle.
//!
//! `LeaderboardService` is constructed explicitly with its store and ledger
//! handles and passed by reference to whoever serves leaderboards. There is
//! no process-wide registry.
//!
//! ```ignore
//! let service = LeaderboardService::new(store, ledger, LeaderboardConfig::from_env());
//! service.start().await?;
//!
//! let board = service.get_leaderboard(league_id).await?;
//!
//! // Later, on shutdown
//! service.stop();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tenbo_core::{CacheError, LeaderboardConfig, LeagueId, TenboResult, Timestamp, UserId};
use tokio::sync::watch;
use tracing::info;

use crate::cache::{
    retry_with_backoff, CacheStore, LeaderboardCache, LeaderboardSnapshot,
    LeaderboardStatsSnapshot,
};
use crate::ledger::LedgerStore;

/// Owns a [`LeaderboardCache`] and gates it behind start/stop.
pub struct LeaderboardService<S, L>
where
    S: CacheStore,
    L: LedgerStore,
{
    cache: LeaderboardCache<S, L>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl<S, L> LeaderboardService<S, L>
where
    S: CacheStore,
    L: LedgerStore,
{
    pub fn new(store: Arc<S>, ledger: Arc<L>, config: LeaderboardConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            cache: LeaderboardCache::new(store, ledger, config),
            started: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Validate configuration and check the store is reachable.
    ///
    /// A stopped service cannot be restarted.
    pub async fn start(&self) -> TenboResult<()> {
        if *self.shutdown_tx.borrow() {
            return Err(CacheError::ServiceStopped.into());
        }
        self.cache.config().validate()?;

        let store = self.cache.store();
        retry_with_backoff(&self.cache.config().retry, "ping", move || store.ping()).await?;

        self.started.store(true, Ordering::SeqCst);
        info!(
            key_prefix = %self.cache.config().key_prefix,
            ttl_secs = self.cache.config().ttl.as_secs(),
            max_attempts = self.cache.config().retry.max_attempts,
            "Leaderboard service started"
        );
        Ok(())
    }

    /// Stop serving. Every later call fails with `CacheError::ServiceStopped`.
    pub fn stop(&self) {
        let was_running = !self.shutdown_tx.send_replace(true);
        if was_running {
            info!("Leaderboard service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !*self.shutdown_tx.borrow()
    }

    /// Receiver that flips to `true` when the service stops.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn cache(&self) -> &LeaderboardCache<S, L> {
        &self.cache
    }

    pub fn stats(&self) -> LeaderboardStatsSnapshot {
        self.cache.stats().snapshot()
    }

    pub async fn get_leaderboard(&self, league_id: LeagueId) -> TenboResult<LeaderboardSnapshot> {
        self.ensure_running()?;
        self.cache.get_leaderboard(league_id).await
    }

    pub async fn is_stale(&self, league_id: LeagueId, candidate: Timestamp) -> TenboResult<bool> {
        self.ensure_running()?;
        self.cache.is_stale(league_id, candidate).await
    }

    pub async fn invalidate(
        &self,
        league_id: LeagueId,
        min_matches: u32,
        users: Option<&[UserId]>,
    ) -> TenboResult<()> {
        self.ensure_running()?;
        self.cache.invalidate(league_id, min_matches, users).await
    }

    pub async fn regenerate(&self, league_id: LeagueId) -> TenboResult<()> {
        self.ensure_running()?;
        self.cache.regenerate(league_id).await
    }

    pub async fn rank_from_ledger(&self, league_id: LeagueId) -> TenboResult<LeaderboardSnapshot> {
        self.ensure_running()?;
        self.cache.rank_from_ledger(league_id).await
    }

    fn ensure_running(&self) -> TenboResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(CacheError::ServiceStopped.into())
        }
    }
}
