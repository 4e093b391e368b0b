//! Cache store contract.
//!
//! This module defines the primitive set the leaderboard orchestrator needs
//! from a shared key-value store: strings, hashes, sorted sets, per-key TTL,
//! atomic batches and optimistic watch transactions. Any Redis-compatible
//! store satisfies it; `InMemoryCacheStore` implements it for tests and
//! single-process deployments.

use std::time::Duration;

use async_trait::async_trait;
use tenbo_core::TenboResult;

/// A single mutating command inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { key: String, value: String },
    Del { key: String },
    Expire { key: String, ttl: Duration },
    HSet { key: String, field: String, value: String },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, member: String },
}

impl Command {
    /// The key this command touches.
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. }
            | Command::Del { key }
            | Command::Expire { key, .. }
            | Command::HSet { key, .. }
            | Command::ZAdd { key, .. }
            | Command::ZRem { key, .. } => key,
        }
    }
}

/// Ordered list of commands applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.push(Command::Set {
            key: key.to_string(),
            value: value.into(),
        })
    }

    pub fn del(&mut self, key: &str) -> &mut Self {
        self.push(Command::Del { key: key.to_string() })
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.push(Command::Expire {
            key: key.to_string(),
            ttl,
        })
    }

    pub fn hset(&mut self, key: &str, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Command::HSet {
            key: key.to_string(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn zadd(&mut self, key: &str, member: impl Into<String>, score: f64) -> &mut Self {
        self.push(Command::ZAdd {
            key: key.to_string(),
            member: member.into(),
            score,
        })
    }

    pub fn zrem(&mut self, key: &str, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZRem {
            key: key.to_string(),
            member: member.into(),
        })
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl IntoIterator for Batch {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

/// An open optimistic transaction.
///
/// Created by [`CacheStore::watch`]. Reads issued through the store between
/// `watch` and `exec` see live data; `exec` applies its batch only if no
/// watched key was modified in the meantime.
#[async_trait]
pub trait WatchSession: Send {
    /// Apply `batch` atomically. Returns `false`, without applying anything,
    /// when a watched key changed since the session was opened.
    async fn exec(self, batch: Batch) -> TenboResult<bool>;

    /// Abandon the session without applying anything.
    async fn discard(self) -> TenboResult<()>;
}

/// Cache store trait for pluggable shared-store implementations.
///
/// Implementations must be safe to share across tasks. A key holding the
/// wrong kind of value for a command fails with `CacheError::WrongType`.
/// An unreachable store fails with `CacheError::Unreachable`, which callers
/// treat as retryable.
#[async_trait]
pub trait CacheStore: Send + Sync {
    type Watch: WatchSession;

    /// Round-trip check used at service start.
    async fn ping(&self) -> TenboResult<()>;

    async fn exists(&self, key: &str) -> TenboResult<bool>;

    async fn get(&self, key: &str) -> TenboResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> TenboResult<()>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[&str]) -> TenboResult<u64>;

    /// Set a key's TTL. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> TenboResult<bool>;

    /// Remaining TTL. `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> TenboResult<Option<Duration>>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> TenboResult<()>;

    async fn hget(&self, key: &str, field: &str) -> TenboResult<Option<String>>;

    /// Read many fields at once; the result lines up with `fields`.
    async fn hmget(&self, key: &str, fields: &[String]) -> TenboResult<Vec<Option<String>>>;

    /// Incremental scan. Start with cursor 0; a returned cursor of 0 means
    /// the scan is complete.
    async fn hscan(&self, key: &str, cursor: u64, count: usize)
        -> TenboResult<(u64, Vec<(String, String)>)>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> TenboResult<()>;

    /// Returns whether the member was present.
    async fn zrem(&self, key: &str, member: &str) -> TenboResult<bool>;

    /// Members by descending score over an inclusive index range. Negative
    /// indices count from the end, so `(0, -1)` is the whole set.
    async fn zrevrange(&self, key: &str, start: isize, stop: isize)
        -> TenboResult<Vec<(String, f64)>>;

    /// Members with `min <= score <= max`, ascending.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> TenboResult<Vec<(String, f64)>>;

    /// Members with `min <= score <= max`, descending.
    async fn zrevrange_by_score(&self, key: &str, max: f64, min: f64)
        -> TenboResult<Vec<(String, f64)>>;

    /// Apply a batch atomically with no watched keys.
    async fn execute(&self, batch: Batch) -> TenboResult<()>;

    /// Open an optimistic transaction watching `keys`.
    async fn watch(&self, keys: &[&str]) -> TenboResult<Self::Watch>;
}

/// Collect a whole hash with repeated `hscan` calls.
pub async fn hscan_all<S>(store: &S, key: &str, page: usize) -> TenboResult<Vec<(String, String)>>
where
    S: CacheStore + ?Sized,
{
    let mut out = Vec::new();
    let mut cursor = 0;
    loop {
        let (next, mut chunk) = store.hscan(key, cursor, page).await?;
        out.append(&mut chunk);
        if next == 0 {
            return Ok(out);
        }
        cursor = next;
    }
}
