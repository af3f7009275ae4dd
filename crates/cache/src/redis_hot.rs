//! Hot tier backed by a Redis server.
//!
//! Candle and history series are sorted sets scored by time; single values
//! are plain strings written with `SETEX`.

use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use gridfeed_core::{Error, Result};
use redis::{Client, Connection};
use tracing::debug;

use crate::hot::HotCache;
use crate::query::Order;

/// Keys fetched per `SCAN` step.
const SCAN_COUNT: usize = 100;

/// [`HotCache`] over one synchronous Redis connection.
pub struct RedisHotCache {
    #[allow(dead_code)] // keeps the client alive with its connection
    client: Client,
    connection: Mutex<Connection>,
}

impl RedisHotCache {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub fn open(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::hot_cache(format!("failed to create Redis client: {e}")))?;
        let connection = client
            .get_connection()
            .map_err(|e| Error::hot_cache(format!("failed to connect to Redis: {e}")))?;
        debug!(url, "connected to Redis");
        Ok(Self {
            client,
            connection: Mutex::new(connection),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn failed(op: &'static str) -> impl Fn(redis::RedisError) -> Error {
    move |e| Error::hot_cache(format!("Redis {op} failed: {e}"))
}

/// Score bound in Redis syntax: `-inf`/`+inf`, `x` inclusive, `(x` exclusive.
fn score_bound(bound: Bound<i64>, unbounded: &str) -> String {
    match bound {
        Bound::Included(x) => x.to_string(),
        Bound::Excluded(x) => format!("({x}"),
        Bound::Unbounded => unbounded.to_string(),
    }
}

/// `LIMIT` count; a negative count returns every member.
fn limit_count(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(-1)
}

/// Rank bound of `ZREMRANGEBYRANK` that keeps the `max_entries` highest scores.
fn trim_stop(max_entries: usize) -> i64 {
    i64::try_from(max_entries)
        .map(|n| -(n.saturating_add(1)))
        .unwrap_or(i64::MIN)
}

impl HotCache for RedisHotCache {
    fn add(&self, key: &str, members: &[(i64, String)]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        // a sorted set keys on the member, so clear each score before adding
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (score, member) in members {
            pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg(*score).arg(*score).ignore();
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
        }
        pipe.query::<()>(&mut *self.conn()).map_err(failed("ZADD"))
    }

    fn range_by_score(
        &self,
        key: &str,
        min: Bound<i64>,
        max: Bound<i64>,
        limit: usize,
        order: Order,
    ) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let min = score_bound(min, "-inf");
        let max = score_bound(max, "+inf");
        let mut cmd = match order {
            Order::Asc => {
                let mut cmd = redis::cmd("ZRANGEBYSCORE");
                cmd.arg(key).arg(min).arg(max);
                cmd
            }
            Order::Desc => {
                let mut cmd = redis::cmd("ZREVRANGEBYSCORE");
                cmd.arg(key).arg(max).arg(min);
                cmd
            }
        };
        cmd.arg("LIMIT").arg(0).arg(limit_count(limit));
        cmd.query(&mut *self.conn()).map_err(failed("ZRANGEBYSCORE"))
    }

    fn trim(&self, key: &str, max_entries: usize) -> Result<()> {
        redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(0)
            .arg(trim_stop(max_entries))
            .query::<()>(&mut *self.conn())
            .map_err(failed("ZREMRANGEBYRANK"))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query::<()>(&mut *self.conn())
            .map_err(failed("EXPIRE"))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query(&mut *self.conn())
            .map_err(failed("GET"))
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query::<()>(&mut *self.conn())
            .map_err(failed("SETEX"))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query(&mut *self.conn())
            .map_err(failed("DEL"))?;
        Ok(removed > 0)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query(&mut *conn)
                .map_err(failed("SCAN"))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
