//! End-to-end tests for the leaderboard cache over the in-memory ledger and
//! cache store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tenbo_core::{Decimal, LeagueId, PlacementRange, SeatOutcome, SeatScore};
use tenbo_storage::cache::{Batch, InMemoryWatch, LeaderboardCache};
use tenbo_storage::{CacheStore, InMemoryCacheStore, InMemoryLedger, ReadSource};
use tenbo_test_utils::assertions::{
    assert_consistency_violation, assert_contiguous_ranks, assert_ranked_order,
    assert_retry_exhausted, assert_service_stopped, assert_unranked_members, league_contents,
};
use tenbo_test_utils::fixtures::{fast_config, LeagueFixture};
use tenbo_test_utils::{
    base_time, LedgerError, MatchId, TenboError, TenboResult, Transaction, TransactionKind, UserId,
};

type Cache = LeaderboardCache<InMemoryCacheStore, InMemoryLedger>;

/// Give `user` a starting balance of `total` and `matches` tied,
/// zero-delta match results.
fn history(league: &LeagueFixture, user: UserId, matches: u32, total: i64) -> TenboResult<()> {
    let mut txs = vec![Transaction::adjustment(
        TransactionKind::Initial,
        user,
        league.league_id,
        Decimal::from(total),
        base_time(),
        None,
    )];
    for _ in 0..matches {
        txs.push(Transaction::match_result(
            user,
            league.league_id,
            Decimal::ZERO,
            base_time(),
            MatchId::now_v7(),
            SeatOutcome {
                raw_score: 25_000,
                placement: PlacementRange::new(2, 3)?,
            },
        ));
    }
    league.ledger.append(league.league_id, txs)
}

struct Scenario {
    league: LeagueFixture,
    a: UserId,
    b: UserId,
    c: UserId,
    d: UserId,
    e: UserId,
}

fn scenario() -> TenboResult<Scenario> {
    let league = LeagueFixture::new(3)?;
    let a = league.add_player("Aki")?;
    let b = league.add_player("Ben")?;
    let c = league.add_flagged_player("Chi")?;
    let d = league.add_player("Dai")?;
    let e = league.add_player("Eri")?;

    history(&league, a, 3, 45)?;
    history(&league, b, 2, 60)?;
    history(&league, c, 3, -10)?;
    history(&league, d, 3, 45)?;
    history(&league, e, 1, 80)?;

    Ok(Scenario { league, a, b, c, d, e })
}

#[tokio::test]
async fn test_scenario_from_ledger_uses_salted_tiebreak() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());

    let board = cache.rank_from_ledger(s.league.league_id).await?;
    let ranker = cache.ranker(s.league.league_id, 3);
    let (first, second) = if ranker.tiebreak_key(s.a) < ranker.tiebreak_key(s.d) {
        (s.a, s.d)
    } else {
        (s.d, s.a)
    };

    assert_eq!(board.source, ReadSource::Ledger);
    assert_eq!(
        board.ranks(),
        vec![
            (first, Some(1)),
            (second, Some(2)),
            (s.c, Some(3)),
            (s.b, None),
            (s.e, None),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_scenario_through_cache() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());

    let board = cache.get_leaderboard(s.league.league_id).await?;
    assert_eq!(board.source, ReadSource::Regenerated);
    assert_contiguous_ranks(&board);

    let mut top_two: Vec<UserId> = board.ranked().take(2).map(|e| e.user_id).collect();
    let mut expected = vec![s.a, s.d];
    top_two.sort();
    expected.sort();
    assert_eq!(top_two, expected);
    assert_eq!(board.entry(s.c).and_then(|e| e.rank), Some(3));

    let unranked: Vec<UserId> = board.unranked().map(|e| e.user_id).collect();
    assert_eq!(unranked, vec![s.b, s.e]);
    assert_eq!(board.entry(s.b).map(|e| e.aggregate.num_matches), Some(2));
    Ok(())
}

#[tokio::test]
async fn test_distinct_scores_round_trip_matches_ledger_ranking() -> TenboResult<()> {
    let league = LeagueFixture::new(2)?;
    let mut users = Vec::new();
    for (i, (matches, total)) in [(2, 30), (4, -5), (2, 12), (3, 70), (1, 90)].into_iter().enumerate() {
        let user = league.add_player(&format!("p{i}"))?;
        history(&league, user, matches, total)?;
        users.push(user);
    }
    let cache: Cache = league.cache(fast_config());

    let cached = cache.get_leaderboard(league.league_id).await?;
    let exact = cache.rank_from_ledger(league.league_id).await?;
    assert_eq!(cached.ranks(), exact.ranks());
    assert_ranked_order(&cached, &[users[3], users[0], users[2], users[1]]);
    assert_unranked_members(&cached, &[users[4]]);
    Ok(())
}

#[tokio::test]
async fn test_invalidate_is_idempotent() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());
    let keys = cache.keys(s.league.league_id);

    cache.invalidate(s.league.league_id, 3, None).await?;
    let once = league_contents(s.league.store.as_ref(), &keys).await?;
    cache.invalidate(s.league.league_id, 3, None).await?;
    let twice = league_contents(s.league.store.as_ref(), &keys).await?;
    assert_eq!(once, twice);

    cache.invalidate(s.league.league_id, 3, Some(&[s.a, s.b])).await?;
    let partial_once = league_contents(s.league.store.as_ref(), &keys).await?;
    cache.invalidate(s.league.league_id, 3, Some(&[s.a, s.b])).await?;
    let partial_twice = league_contents(s.league.store.as_ref(), &keys).await?;
    assert_eq!(partial_once, partial_twice);
    assert_eq!(partial_once, once);

    assert_eq!(cache.stats().snapshot().invalidations, 4);
    Ok(())
}

#[tokio::test]
async fn test_partial_invalidate_moves_user_into_ranked_set() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());
    let before = cache.get_leaderboard(s.league.league_id).await?;
    assert_eq!(before.entry(s.b).and_then(|e| e.rank), None);

    history(&s.league, s.b, 1, 0)?;
    cache.invalidate(s.league.league_id, 3, Some(&[s.b])).await?;

    let after = cache.get_leaderboard(s.league.league_id).await?;
    assert!(after.was_cache_hit());
    assert_eq!(after.entry(s.b).and_then(|e| e.rank), Some(1));
    assert_unranked_members(&after, &[s.e]);
    assert!(after.last_updated > before.last_updated);

    let contents = league_contents(s.league.store.as_ref(), &cache.keys(s.league.league_id)).await?;
    let b = s.b.to_string();
    assert!(contents.leaderboard.iter().any(|(m, _)| *m == b));
    assert!(!contents.unranked.iter().any(|(m, _)| *m == b));
    Ok(())
}

#[tokio::test]
async fn test_full_invalidate_drops_departed_members() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());
    cache.get_leaderboard(s.league.league_id).await?;

    s.league.ledger.remove_member(s.league.league_id, s.c)?;
    cache.invalidate(s.league.league_id, 3, None).await?;

    let board = cache.get_leaderboard(s.league.league_id).await?;
    assert!(board.entry(s.c).is_none());
    assert_eq!(board.len(), 4);

    let contents = league_contents(s.league.store.as_ref(), &cache.keys(s.league.league_id)).await?;
    assert!(!contents.records.contains_key(&s.c.to_string()));
    Ok(())
}

#[tokio::test]
async fn test_torn_reads_retry_within_budget() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());
    cache.get_leaderboard(s.league.league_id).await?;

    s.league.store.inject_watch_conflicts(2);
    let board = cache.get_leaderboard(s.league.league_id).await?;
    assert!(board.was_cache_hit());
    assert_eq!(cache.stats().snapshot().watch_conflicts, 2);

    s.league.store.inject_watch_conflicts(3);
    let result = cache.get_leaderboard(s.league.league_id).await;
    assert_retry_exhausted(&result, "read_leaderboard");
    assert_eq!(cache.stats().snapshot().watch_conflicts, 5);
    Ok(())
}

/// Cache store that lets a second cache commit a full invalidate right
/// after the first listing of `trigger_key`, mid-way through a read.
struct WriteBetweenListings {
    inner: Arc<InMemoryCacheStore>,
    writer: Cache,
    league_id: LeagueId,
    min_matches: u32,
    trigger_key: String,
    fired: AtomicBool,
}

#[async_trait]
impl CacheStore for WriteBetweenListings {
    type Watch = InMemoryWatch;

    async fn ping(&self) -> TenboResult<()> {
        self.inner.ping().await
    }

    async fn exists(&self, key: &str) -> TenboResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> TenboResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> TenboResult<()> {
        self.inner.set(key, value).await
    }

    async fn del(&self, keys: &[&str]) -> TenboResult<u64> {
        self.inner.del(keys).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> TenboResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> TenboResult<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> TenboResult<()> {
        self.inner.hset(key, field, value).await
    }

    async fn hget(&self, key: &str, field: &str) -> TenboResult<Option<String>> {
        self.inner.hget(key, field).await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> TenboResult<Vec<Option<String>>> {
        self.inner.hmget(key, fields).await
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> TenboResult<(u64, Vec<(String, String)>)> {
        self.inner.hscan(key, cursor, count).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> TenboResult<()> {
        self.inner.zadd(key, member, score).await
    }

    async fn zrem(&self, key: &str, member: &str) -> TenboResult<bool> {
        self.inner.zrem(key, member).await
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> TenboResult<Vec<(String, f64)>> {
        let members = self.inner.zrevrange(key, start, stop).await?;
        if key == self.trigger_key && !self.fired.swap(true, Ordering::SeqCst) {
            self.writer
                .invalidate(self.league_id, self.min_matches, None)
                .await?;
        }
        Ok(members)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> TenboResult<Vec<(String, f64)>> {
        self.inner.zrange_by_score(key, min, max).await
    }

    async fn zrevrange_by_score(&self, key: &str, max: f64, min: f64) -> TenboResult<Vec<(String, f64)>> {
        self.inner.zrevrange_by_score(key, max, min).await
    }

    async fn execute(&self, batch: Batch) -> TenboResult<()> {
        self.inner.execute(batch).await
    }

    async fn watch(&self, keys: &[&str]) -> TenboResult<InMemoryWatch> {
        self.inner.watch(keys).await
    }
}

// Paused time keeps the writer's TTL refresh identical to the previous one,
// so only the records rewrite marks the watched key.
#[tokio::test(start_paused = true)]
async fn test_threshold_change_committed_mid_read_is_never_torn() -> TenboResult<()> {
    let s = scenario()?;
    let league_id = s.league.league_id;
    let writer: Cache = s.league.cache(fast_config());
    let before = writer.get_leaderboard(league_id).await?;
    assert_unranked_members(&before, &[s.b, s.e]);

    let store = WriteBetweenListings {
        inner: Arc::clone(&s.league.store),
        writer: writer.clone(),
        league_id,
        min_matches: 2,
        trigger_key: writer.keys(league_id).leaderboard().to_string(),
        fired: AtomicBool::new(false),
    };
    let reader = LeaderboardCache::new(Arc::new(store), Arc::clone(&s.league.ledger), fast_config());

    let board = reader.get_leaderboard(league_id).await?;
    assert!(board.was_cache_hit());
    assert_eq!(reader.stats().snapshot().watch_conflicts, 1);
    assert_eq!(board.len(), 5);
    assert!(board.entry(s.b).and_then(|e| e.rank).is_some());
    assert_unranked_members(&board, &[s.e]);
    assert_contiguous_ranks(&board);

    let after = writer.get_leaderboard(league_id).await?;
    assert_eq!(board.ranks(), after.ranks());
    Ok(())
}

#[tokio::test]
async fn test_partial_invalidate_on_cold_cache_publishes_whole_league() -> TenboResult<()> {
    let mut league = LeagueFixture::new(1)?;
    let mut players = Vec::new();
    for i in 0..8 {
        players.push(league.add_player(&format!("p{i}"))?);
    }
    league.play(&[
        (players[0], 40_000),
        (players[1], 30_000),
        (players[2], 20_000),
        (players[3], 10_000),
    ])?;
    league.play(&[
        (players[4], 45_000),
        (players[5], 28_000),
        (players[6], 15_000),
        (players[7], 12_000),
    ])?;
    let cache: Cache = league.cache(fast_config());

    cache.invalidate(league.league_id, 1, Some(&players[4..8])).await?;
    let board = cache.get_leaderboard(league.league_id).await?;
    let exact = cache.rank_from_ledger(league.league_id).await?;
    assert!(board.was_cache_hit());
    assert_eq!(board.len(), 8);
    assert_eq!(board.ranks(), exact.ranks());

    league.adjust(players[7], Decimal::from(200))?;
    cache.invalidate(league.league_id, 1, Some(&players[7..8])).await?;
    let board = cache.get_leaderboard(league.league_id).await?;
    assert_eq!(board.len(), 8);
    assert_eq!(board.entry(players[7]).and_then(|e| e.rank), Some(1));
    assert_eq!(board.ranks(), cache.rank_from_ledger(league.league_id).await?.ranks());
    Ok(())
}

#[tokio::test]
async fn test_soft_penalty_change_demotes_on_equal_score() -> TenboResult<()> {
    let league = LeagueFixture::new(1)?;
    let a = league.add_player("Aki")?;
    let b = league.add_player("Ben")?;
    history(&league, a, 2, 20)?;
    history(&league, b, 2, 20)?;
    let cache: Cache = league.cache(fast_config());

    league.ledger.set_soft_penalty(league.league_id, a, true)?;
    let board = cache.rank_from_ledger(league.league_id).await?;
    assert_ranked_order(&board, &[b, a]);

    league.ledger.set_soft_penalty(league.league_id, a, false)?;
    league.ledger.set_soft_penalty(league.league_id, b, true)?;
    let board = cache.rank_from_ledger(league.league_id).await?;
    assert_ranked_order(&board, &[a, b]);
    Ok(())
}

#[tokio::test]
async fn test_listed_user_without_record_is_a_consistency_violation() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());
    cache.get_leaderboard(s.league.league_id).await?;

    let ghost = UserId::now_v7();
    let keys = cache.keys(s.league.league_id);
    let mut batch = Batch::new();
    batch.zadd(keys.leaderboard(), ghost.to_string(), 1.0e9);
    s.league.store.execute(batch).await?;

    let result = cache.get_leaderboard(s.league.league_id).await;
    assert_consistency_violation(&result, ghost);

    let stats = cache.stats().snapshot();
    assert_eq!(stats.consistency_violations, 1);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.regenerations, 1);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_store_exhausts_retries() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());

    s.league.store.set_unreachable(true);
    let result = cache.get_leaderboard(s.league.league_id).await;
    assert_retry_exhausted(&result, "read_leaderboard");

    s.league.store.set_unreachable(false);
    assert!(cache.get_leaderboard(s.league.league_id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_ledger_outage_on_miss_is_not_retried() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());

    s.league.ledger.set_unavailable(true);
    let err = cache.get_leaderboard(s.league.league_id).await.unwrap_err();
    assert!(matches!(err, TenboError::Ledger(LedgerError::Unavailable { .. })));
    assert_eq!(cache.stats().snapshot().misses, 1);
    assert_eq!(cache.stats().snapshot().regenerations, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_expired_keys_are_regenerated() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config().with_ttl(Duration::from_secs(60)));

    cache.get_leaderboard(s.league.league_id).await?;
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(cache.get_leaderboard(s.league.league_id).await?.was_cache_hit());

    // The hit above refreshed the TTL.
    tokio::time::advance(Duration::from_secs(45)).await;
    assert!(cache.get_leaderboard(s.league.league_id).await?.was_cache_hit());

    tokio::time::advance(Duration::from_secs(61)).await;
    let board = cache.get_leaderboard(s.league.league_id).await?;
    assert_eq!(board.source, ReadSource::Regenerated);
    assert_eq!(cache.stats().snapshot().regenerations, 2);
    Ok(())
}

#[tokio::test]
async fn test_is_stale_tracks_writes() -> TenboResult<()> {
    let s = scenario()?;
    let cache: Cache = s.league.cache(fast_config());
    let league_id = s.league.league_id;

    let board = cache.get_leaderboard(league_id).await?;
    assert!(!cache.is_stale(league_id, board.last_updated).await?);

    cache.invalidate(league_id, 3, Some(&[s.a])).await?;
    assert!(!cache.is_stale(league_id, board.last_updated).await?);

    s.league.store.del(&cache.keys(league_id).all()).await?;
    assert!(cache.is_stale(league_id, board.last_updated).await?);
    Ok(())
}

#[tokio::test]
async fn test_chombo_allowance_and_match_edit_flow_into_cache() -> TenboResult<()> {
    let mut league = LeagueFixture::new(1)?;
    let a = league.add_player("Aki")?;
    let b = league.add_player("Ben")?;
    let c = league.add_player("Chi")?;
    let d = league.add_player("Dai")?;

    let mut completed = league.table(&[(a, 40_000), (b, 30_000), (c, 20_000), (d, 10_000)]);
    completed.seats[0] = SeatScore {
        user_id: a,
        raw_score: 40_000,
        chombos: vec!["false tsumo".into(), "wrong riichi".into(), "exposed tile".into()],
        free_chombos: 2,
    };
    let settlement = league.record(&completed)?;

    let chombo_deltas: Vec<Decimal> = settlement
        .transactions
        .iter()
        .filter(|t| t.kind == TransactionKind::Chombo)
        .map(|t| t.delta)
        .collect();
    assert_eq!(chombo_deltas, vec![Decimal::ZERO, Decimal::ZERO, Decimal::from(-20)]);
    assert_eq!(settlement.seats[0].chargeable_chombos, 1);
    assert_eq!(settlement.seats[0].remaining_free_chombos, 0);

    let cache: Cache = league.cache(fast_config());
    let board = cache.get_leaderboard(league.league_id).await?;
    let aki = board.entry(a).map(|e| e.aggregate.clone());
    assert_eq!(aki.as_ref().map(|g| g.score), Some(Decimal::from(25)));
    assert_eq!(aki.as_ref().map(|g| g.first_places()), Some(1));
    assert_ranked_order(&board, &[a, b, c, d]);

    // Edit the match: Ben actually won.
    let mut edited = completed.clone();
    edited.seats[0].raw_score = 30_000;
    edited.seats[0].chombos.clear();
    edited.seats[1].raw_score = 40_000;
    league.record(&edited)?;
    cache.invalidate(league.league_id, 1, Some(&[a, b])).await?;

    let board = cache.get_leaderboard(league.league_id).await?;
    assert_ranked_order(&board, &[b, a, c, d]);
    assert_eq!(
        board.entry(b).map(|e| e.aggregate.score),
        Some(Decimal::from(45))
    );
    assert_eq!(board.entry(a).map(|e| e.aggregate.num_matches), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_service_lifecycle() -> TenboResult<()> {
    let s = scenario()?;
    let service = s.league.service(fast_config());
    assert_service_stopped(&service.get_leaderboard(s.league.league_id).await);

    service.start().await?;
    let board = service.get_leaderboard(s.league.league_id).await?;
    assert_eq!(board.len(), 5);
    service.invalidate(s.league.league_id, 3, Some(&[s.a])).await?;
    assert_eq!(service.stats().invalidations, 1);

    service.stop();
    assert_service_stopped(&service.get_leaderboard(s.league.league_id).await);
    assert_service_stopped(&service.invalidate(s.league.league_id, 3, None).await);
    assert_service_stopped(&service.start().await);
    Ok(())
}
