//! Leaderboard cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for cache activity since startup.
#[derive(Debug, Default)]
pub struct LeaderboardStats {
    /// Reads served from existing cache keys.
    pub hits: AtomicU64,
    /// Reads that found no `updated` key.
    pub misses: AtomicU64,
    /// Full-population rebuilds from the ledger.
    pub regenerations: AtomicU64,
    /// Explicit invalidations, full or partial.
    pub invalidations: AtomicU64,
    /// Watch transactions aborted by a concurrent writer.
    pub watch_conflicts: AtomicU64,
    /// Ranked ids found without a record.
    pub consistency_violations: AtomicU64,
}

impl LeaderboardStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_regeneration(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_conflict(&self) {
        self.watch_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_consistency_violation(&self) {
        self.consistency_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> LeaderboardStatsSnapshot {
        LeaderboardStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            regenerations: self.regenerations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            watch_conflicts: self.watch_conflicts.load(Ordering::Relaxed),
            consistency_violations: self.consistency_violations.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderboardStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub regenerations: u64,
    pub invalidations: u64,
    pub watch_conflicts: u64,
    pub consistency_violations: u64,
}

impl LeaderboardStatsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = LeaderboardStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_watch_conflict();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.watch_conflicts, 1);
        assert_eq!(snapshot.regenerations, 0);
        assert!((snapshot.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_rate_without_reads() {
        assert_eq!(LeaderboardStatsSnapshot::default().hit_rate(), 0.0);
    }
}
