//! Typed, best-effort access to the hot tier.
//!
//! Every data type has its own key prefix, TTL and size bound. Failures are
//! logged and reported as a miss or `false`; the hot tier never fails a caller.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use gridfeed_core::{CacheConfig, CacheDataType, Error, Result, Timestamped};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::hot::HotCache;
use crate::query::Order;

/// Hot tier key counts per data type. Types whose keys could not be listed
/// are absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HotStats {
    pub counts: BTreeMap<CacheDataType, usize>,
}

impl HotStats {
    pub fn get(&self, data_type: CacheDataType) -> usize {
        self.counts.get(&data_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Hot cache backend plus the per-type settings applied to it.
#[derive(Clone)]
pub struct HotTier {
    cache: Arc<dyn HotCache>,
    config: CacheConfig,
}

impl HotTier {
    pub fn new(cache: Arc<dyn HotCache>, config: CacheConfig) -> Self {
        Self { cache, config }
    }

    pub fn backend(&self) -> &Arc<dyn HotCache> {
        &self.cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Single value of `data_type` under `key`.
    pub fn get_value<T: DeserializeOwned>(&self, data_type: CacheDataType, key: &str) -> Option<T> {
        let raw = match self.cache.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "hot tier read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, data_type = %data_type, "hot tier hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "undecodable hot tier value");
                None
            }
        }
    }

    /// Replace a single value; it expires after the type's TTL.
    pub fn set_value<T: Serialize>(&self, data_type: CacheDataType, key: &str, value: &T) -> bool {
        let ttl = self.config.ttl(data_type);
        let result = serde_json::to_string(value)
            .map_err(Error::from)
            .and_then(|raw| self.cache.set(key, raw, ttl));
        self.report(key, "hot tier write failed", result)
    }

    pub fn delete(&self, key: &str) -> bool {
        match self.cache.delete(key) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key, error = %e, "failed to delete hot tier key");
                false
            }
        }
    }

    /// Whole series under `key`, ascending. `None` on a miss.
    pub fn get_series<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        let items: Vec<T> = self.range(key, Bound::Unbounded, Bound::Unbounded, usize::MAX);
        if items.is_empty() {
            None
        } else {
            debug!(key, count = items.len(), "hot tier series hit");
            Some(items)
        }
    }

    /// Newest `limit` members scored inside `(min, max)`, ascending.
    ///
    /// One undecodable member voids the whole read.
    pub fn range<T: DeserializeOwned>(
        &self,
        key: &str,
        min: Bound<i64>,
        max: Bound<i64>,
        limit: usize,
    ) -> Vec<T> {
        let members = match self.cache.range_by_score(key, min, max, limit, Order::Desc) {
            Ok(members) => members,
            Err(e) => {
                warn!(key, error = %e, "hot tier read failed");
                return Vec::new();
            }
        };

        let mut items = Vec::with_capacity(members.len());
        for raw in members.iter().rev() {
            match serde_json::from_str(raw) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(key, error = %e, "undecodable hot tier entry, ignoring key");
                    return Vec::new();
                }
            }
        }
        items
    }

    /// Replace the series under `key` with `items`.
    pub fn set_series<T: Serialize + Timestamped>(
        &self,
        data_type: CacheDataType,
        key: &str,
        items: &[T],
    ) -> bool {
        if items.is_empty() {
            return false;
        }
        let result = self
            .cache
            .delete(key)
            .and_then(|_| self.write_series(data_type, key, items));
        self.report(key, "hot tier series write failed", result)
    }

    /// Add `items` to the series under `key`, then trim it and refresh its TTL.
    /// An item at an existing time replaces it.
    pub fn append<T: Serialize + Timestamped>(
        &self,
        data_type: CacheDataType,
        key: &str,
        items: &[T],
    ) -> bool {
        if items.is_empty() {
            return false;
        }
        let result = self.write_series(data_type, key, items);
        self.report(key, "hot tier series write failed", result)
    }

    fn write_series<T: Serialize + Timestamped>(
        &self,
        data_type: CacheDataType,
        key: &str,
        items: &[T],
    ) -> Result<()> {
        let members = items
            .iter()
            .map(|item| Ok((item.timestamp(), serde_json::to_string(item)?)))
            .collect::<Result<Vec<_>>>()?;
        self.cache.add(key, &members)?;
        if let Some(max) = self.config.max_entries(data_type) {
            self.cache.trim(key, max)?;
        }
        self.cache.expire(key, self.config.ttl(data_type))
    }

    /// Delete keys matching `pattern`, or every key of every data type when
    /// `None`. Returns the number of keys removed.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let deleted = match pattern {
            Some(p) => self.delete_matching(p),
            None => CacheDataType::ALL
                .iter()
                .map(|t| self.delete_matching(&t.pattern()))
                .sum(),
        };
        info!(pattern = pattern.unwrap_or("*"), deleted, "cleared hot tier keys");
        deleted
    }

    /// Delete every key of the given data types.
    pub fn clear_types(&self, types: &[CacheDataType]) -> usize {
        types.iter().map(|t| self.delete_matching(&t.pattern())).sum()
    }

    fn delete_matching(&self, pattern: &str) -> usize {
        let keys = match self.cache.keys(pattern) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern, error = %e, "failed to list hot tier keys");
                return 0;
            }
        };
        keys.iter().filter(|key| self.delete(key)).count()
    }

    /// Key counts per data type.
    pub fn stats(&self) -> HotStats {
        let mut stats = HotStats::default();
        for data_type in CacheDataType::ALL {
            match self.cache.keys(&data_type.pattern()) {
                Ok(keys) => {
                    stats.counts.insert(data_type, keys.len());
                }
                Err(e) => warn!(data_type = %data_type, error = %e, "failed to list hot tier keys"),
            }
        }
        stats
    }

    fn report(&self, key: &str, message: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "{message}");
                false
            }
        }
    }
}
