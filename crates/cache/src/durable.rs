//! Durable tier: authoritative, upsert-indexed candle storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use gridfeed_core::{CacheKey, CacheRange, Candle, Result, TimestampSecs};

use crate::query::{Order, RangeQuery};

/// Storage interface of the durable tier.
///
/// One record per `(key, time)`. Implementations must tolerate concurrent
/// reads; writes are serialized by the orchestrator.
pub trait DurableStore: Send + Sync {
    /// Insert or replace every candle. Returns the number of records written.
    fn upsert_many(&self, key: &CacheKey, candles: &[Candle]) -> Result<usize>;

    /// Candles inside the query window, `limit` at most, in `query.order`.
    ///
    /// With `Order::Desc` the newest candles are selected, so callers wanting
    /// the latest window ascending reverse the result.
    fn range_query(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>>;

    /// Oldest time, newest time and record count of a series.
    fn aggregate_range(&self, key: &CacheKey) -> Result<CacheRange>;
}

/// Durable store kept in process memory. Data is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<CacheKey, BTreeMap<TimestampSecs, Candle>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of series held.
    pub fn series_count(&self) -> usize {
        self.series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl DurableStore for MemoryStore {
    fn upsert_many(&self, key: &CacheKey, candles: &[Candle]) -> Result<usize> {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        let records = series.entry(key.clone()).or_default();
        for candle in candles {
            records.insert(candle.time, candle.clone());
        }
        Ok(candles.len())
    }

    fn range_query(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let Some(records) = series.get(key) else {
            return Ok(Vec::new());
        };

        let window = records.values().filter(|c| query.contains(c.time));
        let candles: Vec<Candle> = match query.order {
            Order::Asc => window.take(query.limit).cloned().collect(),
            Order::Desc => window.rev().take(query.limit).cloned().collect(),
        };
        Ok(candles)
    }

    fn aggregate_range(&self, key: &CacheKey) -> Result<CacheRange> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let Some(records) = series.get(key) else {
            return Ok(CacheRange::default());
        };
        Ok(CacheRange {
            oldest: records.keys().next().copied(),
            newest: records.keys().next_back().copied(),
            count: records.len() as u64,
        })
    }
}
