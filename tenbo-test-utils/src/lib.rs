//! tenbo Test Utilities
//!
//! Shared test infrastructure for the tenbo workspace:
//! - Proptest generators for ledger and standings types
//! - A league fixture wiring an in-memory ledger to an in-memory cache
//! - Assertions and raw cache inspection helpers

pub use tenbo_core::{
    aggregate_by_user, settle, Aggregate, CacheError, CompletedMatch, ConfigError, Decimal,
    LeaderboardConfig, LeagueId, LedgerError, MatchId, PlacementRange, RankedEntry, Ranker,
    RetryPolicy, SeatOutcome, SeatScore, Settlement, Standing, TableRules, TenboError,
    TenboResult, Timestamp, Transaction, TransactionKind, UserId,
};
pub use tenbo_storage::{
    CacheStore, InMemoryCacheStore, InMemoryLedger, LeaderboardCache, LeaderboardService,
    LeaderboardSnapshot, LeagueKeys, LeagueSettings, Member, ReadSource,
};

use chrono::{Duration, TimeZone, Utc};
use tracing_subscriber::EnvFilter;

/// Fixed instant so generated ledgers are reproducible.
pub fn base_time() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 4, 1, 19, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Route `tracing` output through the test harness, filtered by `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ledger and standings types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        any::<[u8; 16]>().prop_map(|b| UserId::new(Uuid::from_bytes(b)))
    }

    pub fn arb_league_id() -> impl Strategy<Value = LeagueId> {
        any::<[u8; 16]>().prop_map(|b| LeagueId::new(Uuid::from_bytes(b)))
    }

    /// Point delta with one decimal place, as settlements produce.
    pub fn arb_delta() -> impl Strategy<Value = Decimal> {
        (-1500i64..1500).prop_map(|tenths| Decimal::new(tenths, 1))
    }

    /// Final table score; always a multiple of 100.
    pub fn arb_raw_score() -> impl Strategy<Value = i64> {
        (-300i64..900).prop_map(|hundreds| hundreds * 100)
    }

    pub fn arb_placement_range() -> impl Strategy<Value = PlacementRange> {
        (1u8..=4, 0u8..=3).prop_filter_map("placement out of table", |(min, span)| {
            PlacementRange::new(min, min.checked_add(span)?.min(4)).ok()
        })
    }

    pub fn arb_transaction_kind() -> impl Strategy<Value = TransactionKind> {
        prop_oneof![
            4 => Just(TransactionKind::MatchResult),
            1 => Just(TransactionKind::Chombo),
            1 => Just(TransactionKind::Initial),
            1 => Just(TransactionKind::OtherAdjustment),
        ]
    }

    /// Any kind of transaction for `user` in `league`.
    pub fn arb_transaction(user: UserId, league: LeagueId) -> impl Strategy<Value = Transaction> {
        (
            arb_transaction_kind(),
            arb_delta(),
            arb_raw_score(),
            arb_placement_range(),
            0i64..10_000,
        )
            .prop_map(move |(kind, delta, raw_score, placement, minutes)| {
                let time = base_time() + Duration::minutes(minutes);
                match kind {
                    TransactionKind::MatchResult => Transaction::match_result(
                        user,
                        league,
                        delta,
                        time,
                        MatchId::now_v7(),
                        SeatOutcome {
                            raw_score,
                            placement,
                        },
                    ),
                    TransactionKind::Chombo => {
                        Transaction::chombo(user, league, delta, time, MatchId::now_v7(), "dealt in")
                    }
                    other => Transaction::adjustment(other, user, league, delta, time, None),
                }
            })
    }

    /// A user's transaction history of up to `max` entries.
    pub fn arb_history(
        user: UserId,
        league: LeagueId,
        max: usize,
    ) -> impl Strategy<Value = Vec<Transaction>> {
        prop::collection::vec(arb_transaction(user, league), 0..max)
    }

    /// Aggregate produced by folding a generated history.
    pub fn arb_aggregate() -> impl Strategy<Value = Aggregate> {
        arb_history(UserId::now_v7(), LeagueId::now_v7(), 12)
            .prop_map(|history| Aggregate::from_transactions(&history))
    }

    /// Standing with a generated aggregate and flag.
    pub fn arb_standing() -> impl Strategy<Value = Standing> {
        (arb_user_id(), "[a-z]{3,8}", any::<bool>(), arb_aggregate()).prop_map(
            |(user_id, display_name, soft_penalty, aggregate)| Standing {
                user_id,
                display_name,
                soft_penalty,
                aggregate,
            },
        )
    }

    /// Four raw scores that, with no leftover bets, sum to four starting stacks.
    pub fn arb_balanced_table() -> impl Strategy<Value = [i64; 4]> {
        (arb_raw_score(), arb_raw_score(), arb_raw_score()).prop_map(|(a, b, c)| {
            let d = 4 * fixtures::STARTING_POINTS - a - b - c;
            [a, b, c, d]
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! A league backed by an in-memory ledger and cache store.

    use super::*;
    use std::sync::Arc;

    pub const STARTING_POINTS: i64 = 25_000;

    /// Common four-player rules: 30k return, 35/5/-15/-25 uma, -20 chombo.
    pub fn standard_rules() -> TableRules {
        TableRules {
            starting_points: STARTING_POINTS,
            return_points: 30_000,
            uma: vec![
                Decimal::from(35),
                Decimal::from(5),
                Decimal::from(-15),
                Decimal::from(-25),
            ],
            chombo_delta: Decimal::from(-20),
        }
    }

    /// Config with immediate retries, for tests that must not sleep.
    pub fn fast_config() -> LeaderboardConfig {
        LeaderboardConfig::default().with_retry(RetryPolicy::immediate(3))
    }

    /// One league seeded into a shared ledger and cache store.
    pub struct LeagueFixture {
        pub league_id: LeagueId,
        pub ledger: Arc<InMemoryLedger>,
        pub store: Arc<InMemoryCacheStore>,
        pub rules: TableRules,
        next_minute: i64,
    }

    impl LeagueFixture {
        pub fn new(min_matches_for_rank: u32) -> TenboResult<Self> {
            Self::with_backends(
                min_matches_for_rank,
                Arc::new(InMemoryLedger::new()),
                Arc::new(InMemoryCacheStore::new()),
            )
        }

        /// Seed a new league into existing backends.
        pub fn with_backends(
            min_matches_for_rank: u32,
            ledger: Arc<InMemoryLedger>,
            store: Arc<InMemoryCacheStore>,
        ) -> TenboResult<Self> {
            init_test_tracing();
            let league_id = LeagueId::now_v7();
            ledger.upsert_league(LeagueSettings {
                league_id,
                name: "Thursday league".to_string(),
                min_matches_for_rank,
            })?;
            Ok(Self {
                league_id,
                ledger,
                store,
                rules: standard_rules(),
                next_minute: 0,
            })
        }

        pub fn add_player(&self, name: &str) -> TenboResult<UserId> {
            let user_id = UserId::now_v7();
            self.ledger.add_member(self.league_id, Member::new(user_id, name))?;
            Ok(user_id)
        }

        pub fn add_flagged_player(&self, name: &str) -> TenboResult<UserId> {
            let user_id = UserId::now_v7();
            self.ledger
                .add_member(self.league_id, Member::new(user_id, name).with_soft_penalty(true))?;
            Ok(user_id)
        }

        fn tick(&mut self) -> Timestamp {
            self.next_minute += 90;
            base_time() + Duration::minutes(self.next_minute)
        }

        /// Build a completed match without chombos.
        pub fn table(&mut self, seats: &[(UserId, i64)]) -> CompletedMatch {
            CompletedMatch {
                match_id: MatchId::now_v7(),
                league_id: self.league_id,
                completed_at: self.tick(),
                leftover_bets: 0,
                seats: seats
                    .iter()
                    .map(|(user_id, raw_score)| SeatScore {
                        user_id: *user_id,
                        raw_score: *raw_score,
                        chombos: Vec::new(),
                        free_chombos: 0,
                    })
                    .collect(),
            }
        }

        /// Settle `completed` with the fixture rules and record it.
        pub fn record(&self, completed: &CompletedMatch) -> TenboResult<Settlement> {
            let settlement = settle(&self.rules, completed)?;
            self.ledger
                .record_settlement(self.league_id, completed.match_id, settlement.clone())?;
            Ok(settlement)
        }

        /// Settle and record a chombo-free match; returns its id.
        pub fn play(&mut self, seats: &[(UserId, i64)]) -> TenboResult<MatchId> {
            let completed = self.table(seats);
            self.record(&completed)?;
            Ok(completed.match_id)
        }

        /// Append an administrative adjustment.
        pub fn adjust(&mut self, user_id: UserId, delta: Decimal) -> TenboResult<()> {
            let time = self.tick();
            self.ledger.append(
                self.league_id,
                vec![Transaction::adjustment(
                    TransactionKind::OtherAdjustment,
                    user_id,
                    self.league_id,
                    delta,
                    time,
                    Some("correction".to_string()),
                )],
            )
        }

        pub fn cache(&self, config: LeaderboardConfig) -> LeaderboardCache<InMemoryCacheStore, InMemoryLedger> {
            LeaderboardCache::new(Arc::clone(&self.store), Arc::clone(&self.ledger), config)
        }

        pub fn service(
            &self,
            config: LeaderboardConfig,
        ) -> LeaderboardService<InMemoryCacheStore, InMemoryLedger> {
            LeaderboardService::new(Arc::clone(&self.store), Arc::clone(&self.ledger), config)
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions and raw cache inspection for leaderboard tests.

    use super::*;
    use std::collections::BTreeMap;
    use tenbo_storage::cache::hscan_all;

    /// Raw contents of a league's data keys.
    #[derive(Debug, Clone, PartialEq)]
    pub struct LeagueContents {
        pub records: BTreeMap<String, String>,
        pub leaderboard: Vec<(String, f64)>,
        pub unranked: Vec<(String, f64)>,
    }

    /// Read a league's records hash and both sorted sets straight from the store.
    pub async fn league_contents<S: CacheStore>(store: &S, keys: &LeagueKeys) -> TenboResult<LeagueContents> {
        Ok(LeagueContents {
            records: hscan_all(store, keys.records(), 100).await?.into_iter().collect(),
            leaderboard: store.zrevrange(keys.leaderboard(), 0, -1).await?,
            unranked: store.zrevrange(keys.unranked(), 0, -1).await?,
        })
    }

    #[track_caller]
    pub fn assert_ranked_order(snapshot: &LeaderboardSnapshot, expected: &[UserId]) {
        let ranked: Vec<UserId> = snapshot.ranked().map(|e| e.user_id).collect();
        assert_eq!(ranked, expected, "ranked order differs");
    }

    #[track_caller]
    pub fn assert_unranked_members(snapshot: &LeaderboardSnapshot, expected: &[UserId]) {
        let mut unranked: Vec<UserId> = snapshot.unranked().map(|e| e.user_id).collect();
        let mut expected = expected.to_vec();
        unranked.sort();
        expected.sort();
        assert_eq!(unranked, expected, "unranked membership differs");
    }

    /// Ranks run 1..=N over the ranked prefix, followed only by unranked entries.
    #[track_caller]
    pub fn assert_contiguous_ranks(snapshot: &LeaderboardSnapshot) {
        let mut seen_unranked = false;
        let mut expected = 1u32;
        for entry in &snapshot.entries {
            match entry.rank {
                Some(rank) => {
                    assert!(!seen_unranked, "ranked entry after an unranked one");
                    assert_eq!(rank, expected, "rank gap at {}", entry.user_id);
                    expected += 1;
                }
                None => seen_unranked = true,
            }
        }
    }

    #[track_caller]
    pub fn assert_retry_exhausted<T: std::fmt::Debug>(result: &TenboResult<T>, operation: &str) {
        match result {
            Err(TenboError::Cache(CacheError::RetryExhausted { operation: op, .. })) => {
                assert_eq!(op, operation, "wrong operation in RetryExhausted");
            }
            other => panic!("Expected RetryExhausted for {operation}, got: {other:?}"),
        }
    }

    #[track_caller]
    pub fn assert_consistency_violation<T: std::fmt::Debug>(result: &TenboResult<T>, user_id: UserId) {
        match result {
            Err(TenboError::Cache(CacheError::ConsistencyViolation { user_id: id, .. })) => {
                assert_eq!(*id, user_id.to_string(), "wrong user in ConsistencyViolation");
            }
            other => panic!("Expected ConsistencyViolation for {user_id}, got: {other:?}"),
        }
    }

    #[track_caller]
    pub fn assert_service_stopped<T: std::fmt::Debug>(result: &TenboResult<T>) {
        match result {
            Err(TenboError::Cache(CacheError::ServiceStopped)) => {}
            other => panic!("Expected ServiceStopped, got: {other:?}"),
        }
    }
}
