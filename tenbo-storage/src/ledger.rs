//! Ledger store seam and in-memory implementation.
//!
//! The relational ledger is the source of truth for standings. The cache
//! orchestrator only reads from it: league settings, membership, and batched
//! transaction fetches for a whole league or an explicit user subset.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tenbo_core::{LeagueId, LedgerError, MatchId, Settlement, TenboResult, Transaction, UserId};

/// League configuration the orchestrator depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueSettings {
    pub league_id: LeagueId,
    pub name: String,
    /// Matches a user must play before they are ranked.
    pub min_matches_for_rank: u32,
}

/// A user's membership in a league.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub soft_penalty: bool,
}

impl Member {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            soft_penalty: false,
        }
    }

    pub fn with_soft_penalty(mut self, soft_penalty: bool) -> Self {
        self.soft_penalty = soft_penalty;
        self
    }
}

/// Read access to the ledger.
///
/// Fetch order is unspecified; the aggregate fold does not depend on it.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fails with `LedgerError::LeagueNotFound` for an unknown league.
    async fn league(&self, league_id: LeagueId) -> TenboResult<LeagueSettings>;

    async fn members(&self, league_id: LeagueId) -> TenboResult<Vec<Member>>;

    /// Transactions of every member, or only of `users` when given.
    async fn transactions(
        &self,
        league_id: LeagueId,
        users: Option<&[UserId]>,
    ) -> TenboResult<Vec<Transaction>>;
}

#[derive(Debug)]
struct LeagueBook {
    settings: LeagueSettings,
    members: BTreeMap<UserId, Member>,
    transactions: Vec<Transaction>,
}

/// In-memory ledger for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    leagues: RwLock<HashMap<LeagueId, LeagueBook>>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail with `LedgerError::Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Create or reconfigure a league. Existing members and transactions
    /// are kept.
    pub fn upsert_league(&self, settings: LeagueSettings) -> TenboResult<()> {
        let mut leagues = self.write()?;
        match leagues.get_mut(&settings.league_id) {
            Some(book) => book.settings = settings,
            None => {
                leagues.insert(
                    settings.league_id,
                    LeagueBook {
                        settings,
                        members: BTreeMap::new(),
                        transactions: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn add_member(&self, league_id: LeagueId, member: Member) -> TenboResult<()> {
        let mut leagues = self.write()?;
        let book = book_mut(&mut leagues, league_id)?;
        book.members.insert(member.user_id, member);
        Ok(())
    }

    /// Remove a member and every transaction of theirs in the league.
    pub fn remove_member(&self, league_id: LeagueId, user_id: UserId) -> TenboResult<Member> {
        let mut leagues = self.write()?;
        let book = book_mut(&mut leagues, league_id)?;
        let member = book
            .members
            .remove(&user_id)
            .ok_or(LedgerError::UserNotFound { league_id, user_id })?;
        book.transactions.retain(|tx| tx.user_id != user_id);
        Ok(member)
    }

    pub fn set_soft_penalty(
        &self,
        league_id: LeagueId,
        user_id: UserId,
        soft_penalty: bool,
    ) -> TenboResult<()> {
        let mut leagues = self.write()?;
        let book = book_mut(&mut leagues, league_id)?;
        let member = book
            .members
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound { league_id, user_id })?;
        member.soft_penalty = soft_penalty;
        Ok(())
    }

    /// Append transactions. All of them must belong to `league_id` and to
    /// current members; nothing is appended otherwise.
    pub fn append(&self, league_id: LeagueId, transactions: Vec<Transaction>) -> TenboResult<()> {
        let mut leagues = self.write()?;
        let book = book_mut(&mut leagues, league_id)?;
        check_members(book, league_id, &transactions)?;
        book.transactions.extend(transactions);
        Ok(())
    }

    /// Delete every transaction keyed to `match_id` and append the
    /// replacements in one step. Returns how many were removed.
    pub fn replace_match(
        &self,
        league_id: LeagueId,
        match_id: MatchId,
        transactions: Vec<Transaction>,
    ) -> TenboResult<usize> {
        let mut leagues = self.write()?;
        let book = book_mut(&mut leagues, league_id)?;
        check_members(book, league_id, &transactions)?;

        let before = book.transactions.len();
        book.transactions.retain(|tx| tx.match_ref != Some(match_id));
        let removed = before - book.transactions.len();
        book.transactions.extend(transactions);
        Ok(removed)
    }

    /// Record a settled match, replacing any earlier settlement of it.
    pub fn record_settlement(
        &self,
        league_id: LeagueId,
        match_id: MatchId,
        settlement: Settlement,
    ) -> TenboResult<usize> {
        self.replace_match(league_id, match_id, settlement.transactions)
    }

    fn read(&self) -> TenboResult<RwLockReadGuard<'_, HashMap<LeagueId, LeagueBook>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                reason: "in-memory ledger marked unavailable".to_string(),
            }
            .into());
        }
        self.leagues.read().map_err(|_| poisoned())
    }

    fn write(&self) -> TenboResult<RwLockWriteGuard<'_, HashMap<LeagueId, LeagueBook>>> {
        self.leagues.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> tenbo_core::TenboError {
    LedgerError::Unavailable {
        reason: "ledger lock poisoned".to_string(),
    }
    .into()
}

fn book_mut(
    leagues: &mut HashMap<LeagueId, LeagueBook>,
    league_id: LeagueId,
) -> TenboResult<&mut LeagueBook> {
    leagues
        .get_mut(&league_id)
        .ok_or_else(|| LedgerError::LeagueNotFound { league_id }.into())
}

fn book(leagues: &HashMap<LeagueId, LeagueBook>, league_id: LeagueId) -> TenboResult<&LeagueBook> {
    leagues
        .get(&league_id)
        .ok_or_else(|| LedgerError::LeagueNotFound { league_id }.into())
}

fn check_members(book: &LeagueBook, league_id: LeagueId, transactions: &[Transaction]) -> TenboResult<()> {
    for tx in transactions {
        if tx.league_id != league_id || !book.members.contains_key(&tx.user_id) {
            return Err(LedgerError::UserNotFound {
                league_id,
                user_id: tx.user_id,
            }
            .into());
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn league(&self, league_id: LeagueId) -> TenboResult<LeagueSettings> {
        let leagues = self.read()?;
        Ok(book(&leagues, league_id)?.settings.clone())
    }

    async fn members(&self, league_id: LeagueId) -> TenboResult<Vec<Member>> {
        let leagues = self.read()?;
        Ok(book(&leagues, league_id)?.members.values().cloned().collect())
    }

    async fn transactions(
        &self,
        league_id: LeagueId,
        users: Option<&[UserId]>,
    ) -> TenboResult<Vec<Transaction>> {
        let leagues = self.read()?;
        let book = book(&leagues, league_id)?;
        let wanted: Option<HashSet<UserId>> = users.map(|ids| ids.iter().copied().collect());
        Ok(book
            .transactions
            .iter()
            .filter(|tx| book.members.contains_key(&tx.user_id))
            .filter(|tx| wanted.as_ref().map_or(true, |w| w.contains(&tx.user_id)))
            .cloned()
            .collect())
    }
}
