//! Redis cache store.
//!
//! Plain commands share one multiplexed connection. Each watch session opens
//! its own connection, since `WATCH` state is per connection and would leak
//! across callers on a shared one. That costs one connection setup per
//! watch, so every read attempt pays a TCP round trip (plus TLS and `AUTH`
//! when configured) before its first command. Batches run as `MULTI`/`EXEC`
//! pipelines; a nil `EXEC` reply means a watched key changed.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, Pipeline, RedisError};
use tenbo_core::{CacheError, TenboError, TenboResult};
use tracing::debug;

use super::traits::{Batch, CacheStore, Command, WatchSession};

fn store_error(e: RedisError, key: &str) -> TenboError {
    if e.code() == Some("WRONGTYPE") {
        return CacheError::WrongType {
            key: key.to_string(),
        }
        .into();
    }
    if e.kind() == ErrorKind::TypeError {
        return CacheError::Serialization {
            reason: e.to_string(),
        }
        .into();
    }
    CacheError::Unreachable {
        reason: e.to_string(),
    }
    .into()
}

fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn pipeline(batch: Batch) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in batch {
        match command {
            Command::Set { key, value } => {
                pipe.cmd("SET").arg(key).arg(value);
            }
            Command::Del { key } => {
                pipe.cmd("DEL").arg(key);
            }
            Command::Expire { key, ttl } => {
                pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl));
            }
            Command::HSet { key, field, value } => {
                pipe.cmd("HSET").arg(key).arg(field).arg(value);
            }
            Command::ZAdd { key, member, score } => {
                pipe.cmd("ZADD").arg(key).arg(score).arg(member);
            }
            Command::ZRem { key, member } => {
                pipe.cmd("ZREM").arg(key).arg(member);
            }
        }
    }
    pipe
}

/// Cache store backed by a Redis server or cluster-compatible proxy.
#[derive(Clone)]
pub struct RedisCacheStore {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisCacheStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub async fn connect(url: &str) -> TenboResult<Self> {
        let client = Client::open(url).map_err(|e| store_error(e, url))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| store_error(e, url))?;
        debug!(url = url, "Connected to redis cache store");
        Ok(Self { client, conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

/// `WATCH` session on a dedicated connection.
pub struct RedisWatch {
    conn: MultiplexedConnection,
    key: String,
}

#[async_trait]
impl WatchSession for RedisWatch {
    async fn exec(mut self, batch: Batch) -> TenboResult<bool> {
        let reply: Option<redis::Value> = pipeline(batch)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| store_error(e, &self.key))?;
        Ok(reply.is_some())
    }

    async fn discard(mut self) -> TenboResult<()> {
        let _: () = redis::cmd("UNWATCH")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| store_error(e, &self.key))?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    type Watch = RedisWatch;

    async fn ping(&self) -> TenboResult<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| store_error(e, "PING"))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> TenboResult<bool> {
        let found: bool = self.conn().exists(key).await.map_err(|e| store_error(e, key))?;
        Ok(found)
    }

    async fn get(&self, key: &str) -> TenboResult<Option<String>> {
        let value: Option<String> = self.conn().get(key).await.map_err(|e| store_error(e, key))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> TenboResult<()> {
        let _: () = self.conn().set(key, value).await.map_err(|e| store_error(e, key))?;
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> TenboResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self
            .conn()
            .del(keys)
            .await
            .map_err(|e| store_error(e, keys[0]))?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> TenboResult<bool> {
        let set: bool = self
            .conn()
            .pexpire(key, millis(ttl))
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(set)
    }

    async fn ttl(&self, key: &str) -> TenboResult<Option<Duration>> {
        let remaining: i64 = self.conn().pttl(key).await.map_err(|e| store_error(e, key))?;
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> TenboResult<()> {
        let _: () = self
            .conn()
            .hset(key, field, value)
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> TenboResult<Option<String>> {
        let value: Option<String> = self
            .conn()
            .hget(key, field)
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(value)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> TenboResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(values)
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> TenboResult<(u64, Vec<(String, String)>)> {
        let page: (u64, Vec<(String, String)>) = redis::cmd("HSCAN")
            .arg(key)
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(page)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> TenboResult<()> {
        let _: () = self
            .conn()
            .zadd(key, member, score)
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> TenboResult<bool> {
        let removed: u64 = self
            .conn()
            .zrem(key, member)
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(removed > 0)
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> TenboResult<Vec<(String, f64)>> {
        let members: Vec<(String, f64)> = self
            .conn()
            .zrevrange_withscores(key, start, stop)
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(members)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> TenboResult<Vec<(String, f64)>> {
        let members: Vec<(String, f64)> = self
            .conn()
            .zrangebyscore_withscores(key, min, max)
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(members)
    }

    async fn zrevrange_by_score(&self, key: &str, max: f64, min: f64) -> TenboResult<Vec<(String, f64)>> {
        let members: Vec<(String, f64)> = self
            .conn()
            .zrevrangebyscore_withscores(key, max, min)
            .await
            .map_err(|e| store_error(e, key))?;
        Ok(members)
    }

    async fn execute(&self, batch: Batch) -> TenboResult<()> {
        let key = batch
            .commands()
            .first()
            .map(|c| c.key().to_string())
            .unwrap_or_default();
        let _: redis::Value = pipeline(batch)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| store_error(e, &key))?;
        Ok(())
    }

    /// Opens a fresh connection for the session; it closes when the session
    /// is executed, discarded or dropped.
    async fn watch(&self, keys: &[&str]) -> TenboResult<RedisWatch> {
        let key = keys.first().map(|k| k.to_string()).unwrap_or_default();
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| store_error(e, &key))?;
        let _: () = redis::cmd("WATCH")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(e, &key))?;
        Ok(RedisWatch { conn, key })
    }
}
