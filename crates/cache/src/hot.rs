//! Hot tier: bounded, TTL'd, score-ordered cache.
//!
//! Values are opaque strings (JSON-encoded candles and tickers). Candle series
//! live in ordered sets scored by candle time; tickers are plain values.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gridfeed_core::{CacheConfig, Clock, Error, HotTierConfig, Result, SystemClock};
use tracing::info;

use crate::query::Order;
use crate::redis_hot::RedisHotCache;

/// Ordered-set and key/value operations the orchestrator needs from a hot cache.
pub trait HotCache: Send + Sync {
    /// Add scored members; a member at an existing score replaces it.
    fn add(&self, key: &str, members: &[(i64, String)]) -> Result<()>;

    /// Members with scores inside `(min, max)`, at most `limit`, in `order`.
    fn range_by_score(
        &self,
        key: &str,
        min: Bound<i64>,
        max: Bound<i64>,
        limit: usize,
        order: Order,
    ) -> Result<Vec<String>>;

    /// Keep only the `max_entries` highest-scored members.
    fn trim(&self, key: &str, max_entries: usize) -> Result<()>;

    /// Drop `key` once `ttl` has elapsed.
    fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Plain value, if present and not expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace a plain value and set its TTL.
    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Live keys matching a glob pattern (`*` matches any run of characters).
    fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Open the hot tier backend `config` selects. `clock` drives expiry of the
/// in-process backend.
pub fn open_hot_cache(config: &CacheConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn HotCache>> {
    match &config.hot {
        HotTierConfig::Memory => {
            info!(backend = "memory", "opened hot tier");
            Ok(Arc::new(MemoryHotCache::with_clock(clock)))
        }
        HotTierConfig::Redis { url } => {
            let cache = RedisHotCache::open(url)?;
            info!(backend = "redis", "opened hot tier");
            Ok(Arc::new(cache))
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Sorted(BTreeMap<i64, String>),
    Plain(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process hot cache. Expiry is checked against the injected clock.
pub struct MemoryHotCache {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryHotCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live members under `key` (0 for plain values).
    pub fn len(&self, key: &str) -> usize {
        let now = self.clock.now();
        match self.read().get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Sorted(set) => set.len(),
                Value::Plain(_) => 0,
            },
            _ => 0,
        }
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    fn live_sorted_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<&'a mut BTreeMap<i64, String>> {
        let stale = entries.get(key).map_or(false, |e| e.is_expired(now));
        if stale {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(BTreeMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Sorted(set) => Ok(set),
            Value::Plain(_) => Err(Error::hot_cache(format!(
                "key {key} holds a plain value, not an ordered set"
            ))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryHotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HotCache for MemoryHotCache {
    fn add(&self, key: &str, members: &[(i64, String)]) -> Result<()> {
        let now = self.clock.now();
        let mut entries = self.write();
        let set = Self::live_sorted_mut(&mut entries, key, now)?;
        for (score, member) in members {
            set.insert(*score, member.clone());
        }
        Ok(())
    }

    fn range_by_score(
        &self,
        key: &str,
        min: Bound<i64>,
        max: Bound<i64>,
        limit: usize,
        order: Order,
    ) -> Result<Vec<String>> {
        if limit == 0 || is_empty_range(min, max) {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let entries = self.read();
        let set = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Sorted(set) => set,
                Value::Plain(_) => {
                    return Err(Error::hot_cache(format!("key {key} is not an ordered set")))
                }
            },
            _ => return Ok(Vec::new()),
        };

        let range = set.range((min, max));
        let members: Vec<String> = match order {
            Order::Asc => range.take(limit).map(|(_, v)| v.clone()).collect(),
            Order::Desc => range.rev().take(limit).map(|(_, v)| v.clone()).collect(),
        };
        Ok(members)
    }

    fn trim(&self, key: &str, max_entries: usize) -> Result<()> {
        let mut entries = self.write();
        if let Some(Entry {
            value: Value::Sorted(set),
            ..
        }) = entries.get_mut(key)
        {
            while set.len() > max_entries {
                set.pop_first();
            }
        }
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let at = deadline(self.clock.now(), ttl);
        if let Some(entry) = self.write().get_mut(key) {
            entry.expires_at = Some(at);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        match self.read().get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Plain(v) => Ok(Some(v.clone())),
                Value::Sorted(_) => Err(Error::hot_cache(format!("key {key} is an ordered set"))),
            },
            _ => Ok(None),
        }
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let at = deadline(self.clock.now(), ttl);
        self.write().insert(
            key.to_string(),
            Entry {
                value: Value::Plain(value),
                expires_at: Some(at),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .write()
            .remove(key)
            .map_or(false, |e| !e.is_expired(now)))
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .read()
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn deadline(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64);
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn is_empty_range(min: Bound<i64>, max: Bound<i64>) -> bool {
    match (min, max) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
        _ => false,
    }
}

/// Match `text` against a pattern where `*` stands for any run of characters.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // no '*' at all
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
