//! In-memory cache store.
//!
//! Implements the full [`CacheStore`] primitive set over a mutex-guarded map.
//! Expiry is lazy and measured with `tokio::time::Instant`, so tests can
//! pause and advance time. Every write to a key bumps its sequence number,
//! even one that leaves the value unchanged, as Redis does for `SET`,
//! `HSET` and `EXPIRE`. A watch session records the numbers it saw and
//! `exec` aborts if any of them moved.
//!
//! The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tenbo_core::{CacheError, TenboResult};
use tokio::time::Instant;

use super::traits::{Batch, CacheStore, Command, WatchSession};

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    sequences: HashMap<String, u64>,
    next_sequence: u64,
}

impl Keyspace {
    fn bump(&mut self, key: &str) {
        self.next_sequence += 1;
        self.sequences.insert(key.to_string(), self.next_sequence);
    }

    fn sequence(&self, key: &str) -> u64 {
        self.sequences.get(key).copied().unwrap_or(0)
    }

    /// Drop `key` if it has expired. Expiry counts as a modification.
    fn purge(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
            self.bump(key);
        }
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        self.purge(key, now);
        self.entries.get(key)
    }

    /// Apply commands to staged copies of their keys, then commit every
    /// staged key at once. Nothing is committed if any command fails.
    fn apply(&mut self, commands: &[Command], now: Instant) -> TenboResult<()> {
        let mut staged: Vec<(String, Option<Entry>, bool)> = Vec::new();

        for command in commands {
            let key = command.key();
            let slot = match staged.iter().position(|(k, _, _)| k == key) {
                Some(index) => index,
                None => {
                    let current = self.live(key, now).cloned();
                    staged.push((key.to_string(), current, false));
                    staged.len() - 1
                }
            };
            let (_, entry, written) = &mut staged[slot];
            *written |= apply_command(entry, command, now)?;
        }

        for (key, slot, written) in staged {
            let before = self.entries.get(&key);
            if !written && before == slot.as_ref() {
                continue;
            }
            match slot {
                Some(entry) => {
                    self.entries.insert(key.clone(), entry);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
            self.bump(&key);
        }
        Ok(())
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::WrongType {
        key: key.to_string(),
    }
}

/// Apply one command to a staged slot. Returns whether the command counts
/// as a write to the key regardless of whether the value changed.
fn apply_command(slot: &mut Option<Entry>, command: &Command, now: Instant) -> TenboResult<bool> {
    let written = match command {
        Command::Set { .. } | Command::HSet { .. } | Command::ZAdd { .. } => true,
        Command::Expire { .. } => slot.is_some(),
        Command::Del { .. } | Command::ZRem { .. } => false,
    };
    match command {
        Command::Set { value, .. } => {
            *slot = Some(Entry::new(Value::Str(value.clone())));
        }
        Command::Del { .. } => {
            *slot = None;
        }
        Command::Expire { ttl, .. } => {
            if let Some(entry) = slot.as_mut() {
                entry.expires_at = Some(now + *ttl);
            }
        }
        Command::HSet { key, field, value } => {
            let entry = slot.get_or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
            match &mut entry.value {
                Value::Hash(hash) => {
                    hash.insert(field.clone(), value.clone());
                }
                _ => return Err(wrong_type(key).into()),
            }
        }
        Command::ZAdd { key, member, score } => {
            let entry = slot.get_or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())));
            match &mut entry.value {
                Value::ZSet(set) => {
                    set.insert(member.clone(), *score);
                }
                _ => return Err(wrong_type(key).into()),
            }
        }
        Command::ZRem { key, member } => {
            let emptied = match slot.as_mut().map(|e| &mut e.value) {
                None => false,
                Some(Value::ZSet(set)) => {
                    set.remove(member);
                    set.is_empty()
                }
                Some(_) => return Err(wrong_type(key).into()),
            };
            if emptied {
                *slot = None;
            }
        }
    }
    Ok(written)
}

/// Resolve a Redis-style inclusive index range against a length.
fn index_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Ascending by score, ties by member.
fn sorted_members(set: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|(ma, sa), (mb, sb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)));
    members
}

#[derive(Debug, Default)]
struct Shared {
    keyspace: Mutex<Keyspace>,
    unreachable: AtomicBool,
    injected_conflicts: AtomicU32,
}

/// Shared in-process cache store.
///
/// Cloning yields another handle to the same keyspace.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    shared: Arc<Shared>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `CacheError::Unreachable` until
    /// reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.shared.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Abort the next `count` watch sessions at `exec`, as if a concurrent
    /// writer had touched a watched key.
    pub fn inject_watch_conflicts(&self, count: u32) {
        self.shared.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn key_count(&self) -> TenboResult<usize> {
        let now = Instant::now();
        let keyspace = self.lock()?;
        Ok(keyspace.entries.values().filter(|e| !e.is_expired(now)).count())
    }

    fn lock(&self) -> TenboResult<MutexGuard<'_, Keyspace>> {
        lock_keyspace(&self.shared)
    }

    fn check_reachable(&self) -> TenboResult<()> {
        if self.shared.unreachable.load(Ordering::SeqCst) {
            return Err(CacheError::Unreachable {
                reason: "in-memory store marked unreachable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> TenboResult<T>) -> TenboResult<T> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut keyspace = self.lock()?;
        f(keyspace.live(key, now).map(|e| &e.value))
    }

    fn write(&self, commands: &[Command]) -> TenboResult<()> {
        self.check_reachable()?;
        let now = Instant::now();
        self.lock()?.apply(commands, now)
    }

    fn zset<T>(&self, key: &str, f: impl FnOnce(&HashMap<String, f64>) -> T) -> TenboResult<T> {
        self.read(key, |value| match value {
            None => Ok(f(&HashMap::new())),
            Some(Value::ZSet(set)) => Ok(f(set)),
            Some(_) => Err(wrong_type(key).into()),
        })
    }

    fn hash<T>(&self, key: &str, f: impl FnOnce(&HashMap<String, String>) -> T) -> TenboResult<T> {
        self.read(key, |value| match value {
            None => Ok(f(&HashMap::new())),
            Some(Value::Hash(hash)) => Ok(f(hash)),
            Some(_) => Err(wrong_type(key).into()),
        })
    }
}

fn lock_keyspace(shared: &Shared) -> TenboResult<MutexGuard<'_, Keyspace>> {
    shared
        .keyspace
        .lock()
        .map_err(|_| CacheError::LockPoisoned.into())
}

/// Watch session over an [`InMemoryCacheStore`].
#[derive(Debug)]
pub struct InMemoryWatch {
    shared: Arc<Shared>,
    observed: Vec<(String, u64)>,
}

#[async_trait]
impl WatchSession for InMemoryWatch {
    async fn exec(self, batch: Batch) -> TenboResult<bool> {
        let injected = self
            .shared
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Ok(false);
        }

        if self.shared.unreachable.load(Ordering::SeqCst) {
            return Err(CacheError::Unreachable {
                reason: "in-memory store marked unreachable".to_string(),
            }
            .into());
        }

        let now = Instant::now();
        let mut keyspace = lock_keyspace(&self.shared)?;
        for (key, _) in &self.observed {
            keyspace.purge(key, now);
        }
        if self
            .observed
            .iter()
            .any(|(key, seen)| keyspace.sequence(key) != *seen)
        {
            return Ok(false);
        }
        keyspace.apply(batch.commands(), now)?;
        Ok(true)
    }

    async fn discard(self) -> TenboResult<()> {
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    type Watch = InMemoryWatch;

    async fn ping(&self) -> TenboResult<()> {
        self.check_reachable()?;
        self.lock().map(|_| ())
    }

    async fn exists(&self, key: &str) -> TenboResult<bool> {
        self.read(key, |value| Ok(value.is_some()))
    }

    async fn get(&self, key: &str) -> TenboResult<Option<String>> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key).into()),
        })
    }

    async fn set(&self, key: &str, value: &str) -> TenboResult<()> {
        self.write(&[Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        }])
    }

    async fn del(&self, keys: &[&str]) -> TenboResult<u64> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut keyspace = self.lock()?;
        let mut removed = 0;
        for key in keys {
            if keyspace.live(key, now).is_some() {
                keyspace.entries.remove(*key);
                keyspace.bump(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> TenboResult<bool> {
        let existed = self.exists(key).await?;
        self.write(&[Command::Expire {
            key: key.to_string(),
            ttl,
        }])?;
        Ok(existed)
    }

    async fn ttl(&self, key: &str) -> TenboResult<Option<Duration>> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut keyspace = self.lock()?;
        Ok(keyspace
            .live(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> TenboResult<()> {
        self.write(&[Command::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }])
    }

    async fn hget(&self, key: &str, field: &str) -> TenboResult<Option<String>> {
        self.hash(key, |hash| hash.get(field).cloned())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> TenboResult<Vec<Option<String>>> {
        self.hash(key, |hash| fields.iter().map(|f| hash.get(f).cloned()).collect())
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> TenboResult<(u64, Vec<(String, String)>)> {
        self.hash(key, |hash| {
            let mut fields: Vec<_> = hash.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            let start = cursor as usize;
            let end = start.saturating_add(count.max(1)).min(fields.len());
            let page = fields
                .get(start..end)
                .unwrap_or_default()
                .iter()
                .map(|(f, v)| ((*f).clone(), (*v).clone()))
                .collect();
            let next = if end >= fields.len() { 0 } else { end as u64 };
            (next, page)
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> TenboResult<()> {
        self.write(&[Command::ZAdd {
            key: key.to_string(),
            member: member.to_string(),
            score,
        }])
    }

    async fn zrem(&self, key: &str, member: &str) -> TenboResult<bool> {
        let present = self.zset(key, |set| set.contains_key(member))?;
        self.write(&[Command::ZRem {
            key: key.to_string(),
            member: member.to_string(),
        }])?;
        Ok(present)
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> TenboResult<Vec<(String, f64)>> {
        self.zset(key, |set| {
            let mut members = sorted_members(set);
            members.reverse();
            match index_range(members.len(), start, stop) {
                Some((from, to)) => members[from..=to].to_vec(),
                None => Vec::new(),
            }
        })
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> TenboResult<Vec<(String, f64)>> {
        self.zset(key, |set| {
            sorted_members(set)
                .into_iter()
                .filter(|(_, s)| *s >= min && *s <= max)
                .collect()
        })
    }

    async fn zrevrange_by_score(&self, key: &str, max: f64, min: f64) -> TenboResult<Vec<(String, f64)>> {
        let mut members = self.zrange_by_score(key, min, max).await?;
        members.reverse();
        Ok(members)
    }

    async fn execute(&self, batch: Batch) -> TenboResult<()> {
        self.write(batch.commands())
    }

    async fn watch(&self, keys: &[&str]) -> TenboResult<InMemoryWatch> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut keyspace = self.lock()?;
        let observed = keys
            .iter()
            .map(|key| {
                keyspace.purge(key, now);
                (key.to_string(), keyspace.sequence(key))
            })
            .collect();
        Ok(InMemoryWatch {
            shared: Arc::clone(&self.shared),
            observed,
        })
    }
}
