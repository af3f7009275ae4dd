//! Tiered cache orchestrator.
//!
//! Composes the hot tier and the durable tier behind one read path and one
//! write path, and decides when a source adapter must be called.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use gridfeed_core::{
    CacheConfig, CacheDataType, CacheKey, CacheRange, Candle, Clock, Config, Result, SystemClock,
    TickerKey, TickerSnapshot,
};
use gridfeed_sources::{SourceAdapterExt, SourceRegistry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::derivative::DerivativeCache;
use crate::durable::DurableStore;
use crate::hot::HotCache;
use crate::query::{Order, RangeQuery};
use crate::retry::RetryPolicy;
use crate::tier::{HotStats, HotTier};

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Served by the hot tier.
    Hot(Vec<Candle>),
    /// Served by the durable tier.
    Durable(Vec<Candle>),
    /// Neither tier holds matching candles.
    Miss,
}

impl Lookup {
    pub fn candles(&self) -> &[Candle] {
        match self {
            Lookup::Hot(c) | Lookup::Durable(c) => c,
            Lookup::Miss => &[],
        }
    }

    pub fn into_candles(self) -> Vec<Candle> {
        match self {
            Lookup::Hot(c) | Lookup::Durable(c) => c,
            Lookup::Miss => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candles().len()
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    /// Name of the serving tier.
    pub fn tier(&self) -> &'static str {
        match self {
            Lookup::Hot(_) => "hot",
            Lookup::Durable(_) => "durable",
            Lookup::Miss => "miss",
        }
    }
}

/// How an orchestrated read balances the cache against the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Serve from cache; call the source only when the cache is short.
    CacheFirst,
    /// Call the source; fall back to cache only when the source fails.
    FreshFirst,
}

/// Owner of both cache tiers.
pub struct CacheOrchestrator {
    registry: Arc<SourceRegistry>,
    hot: HotTier,
    durable: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
    retry: RetryPolicy,
}

impl CacheOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        hot: Arc<dyn HotCache>,
        durable: Arc<dyn DurableStore>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            hot: HotTier::new(hot, config.cache.clone()),
            durable,
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }

    /// Use `clock` for retry backoff.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &CacheConfig {
        self.hot.config()
    }

    pub fn hot_tier(&self) -> &HotTier {
        &self.hot
    }

    // ---------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------

    /// Validate, upsert into the durable tier, then mirror into the hot tier.
    ///
    /// Invalid candles are dropped and logged. Duplicate times within the
    /// batch keep the last occurrence. Returns the number of records written.
    pub fn persist(&self, key: &CacheKey, candles: &[Candle]) -> Result<usize> {
        let mut by_time: BTreeMap<i64, Candle> = BTreeMap::new();
        for candle in candles {
            match candle.validate() {
                Ok(()) => {
                    by_time.insert(candle.time, candle.clone());
                }
                Err(e) => warn!(key = %key, error = %e, "dropping invalid candle"),
            }
        }
        if by_time.is_empty() {
            return Ok(0);
        }
        let batch: Vec<Candle> = by_time.into_values().collect();

        let written = {
            let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
            self.retry
                .run(&*self.clock, |_| self.durable.upsert_many(key, &batch))?
        };
        debug!(key = %key, count = written, "persisted candles");

        self.mirror_to_hot(key, &batch);
        Ok(written)
    }

    /// Best-effort copy into the hot tier, followed by trim and TTL refresh.
    fn mirror_to_hot(&self, key: &CacheKey, candles: &[Candle]) {
        self.hot.append(CacheDataType::Candles, &key.hot_key(), candles);
    }

    // ---------------------------------------------------------------
    // Read path
    // ---------------------------------------------------------------

    /// Read through hot then durable tier. Results are ascending by time.
    ///
    /// A durable hit primes the hot tier when the query is unbounded, or
    /// when `prime_on_bounded_reads` is set.
    pub fn lookup(&self, key: &CacheKey, query: &RangeQuery) -> Result<Lookup> {
        if query.limit == 0 {
            return Ok(Lookup::Miss);
        }

        let hot = self.read_hot(key, query);
        if !hot.is_empty() {
            debug!(key = %key, count = hot.len(), "hot tier hit");
            return Ok(Lookup::Hot(hot));
        }

        let mut candles = self
            .durable
            .range_query(key, &query.with_order(Order::Desc))?;
        if candles.is_empty() {
            debug!(key = %key, "cache miss");
            return Ok(Lookup::Miss);
        }
        candles.reverse();
        debug!(key = %key, count = candles.len(), "durable tier hit");

        if !query.is_bounded() || self.config().prime_on_bounded_reads {
            self.mirror_to_hot(key, &candles);
        }
        Ok(Lookup::Durable(candles))
    }

    fn read_hot(&self, key: &CacheKey, query: &RangeQuery) -> Vec<Candle> {
        self.hot
            .range(&key.hot_key(), query.min_bound(), query.max_bound(), query.limit)
    }

    /// Cached candles, ascending. Empty when neither tier has any.
    pub fn get_from_cache(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>> {
        Ok(self.lookup(key, query)?.into_candles())
    }

    /// Oldest, newest and count of the durable records of a series.
    pub fn get_cache_range(&self, key: &CacheKey) -> Result<CacheRange> {
        self.durable.aggregate_range(key)
    }

    // ---------------------------------------------------------------
    // Orchestrated fetch
    // ---------------------------------------------------------------

    /// Fetch with the chosen strategy.
    pub fn get(&self, key: &CacheKey, query: &RangeQuery, strategy: FetchStrategy) -> Result<Vec<Candle>> {
        match strategy {
            FetchStrategy::CacheFirst => self.get_with_auto_fetch(key, query),
            FetchStrategy::FreshFirst => self.get_fresh_with_fallback(key, query),
        }
    }

    /// Serve from cache when it holds `limit` candles, else fetch and persist.
    ///
    /// When the source fails the cached candles are returned if there are
    /// any; otherwise the source error propagates.
    pub fn get_with_auto_fetch(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>> {
        let cached = self.lookup_or_empty(key, query);
        if cached.len() >= query.limit {
            info!(key = %key, count = cached.len(), "serving from cache");
            return Ok(cached);
        }

        info!(
            key = %key,
            cached = cached.len(),
            limit = query.limit,
            "cache short, fetching from source"
        );
        match self.fetch_and_persist(key, query) {
            Ok(fetched) => Ok(fetched),
            Err(e) if !cached.is_empty() => {
                warn!(key = %key, error = %e, count = cached.len(), "source failed, serving cached candles");
                Ok(cached)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch from the source first; fall back to cache only when it fails.
    pub fn get_fresh_with_fallback(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>> {
        match self.fetch_and_persist(key, query) {
            Ok(fetched) => Ok(fetched),
            Err(e) => {
                let cached = self.lookup_or_empty(key, query);
                if cached.is_empty() {
                    return Err(e);
                }
                warn!(key = %key, error = %e, count = cached.len(), "source failed, serving cached candles");
                Ok(cached)
            }
        }
    }

    fn lookup_or_empty(&self, key: &CacheKey, query: &RangeQuery) -> Vec<Candle> {
        match self.lookup(key, query) {
            Ok(found) => found.into_candles(),
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed");
                Vec::new()
            }
        }
    }

    /// Call the source, persist what it returned, apply the `after` filter.
    ///
    /// Persist failures are logged and do not fail the fetch.
    fn fetch_and_persist(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>> {
        let adapter = self.registry.require(&key.source)?;
        let mut candles =
            adapter.get_candles(&key.symbol, &key.granularity, query.limit, query.before)?;
        info!(key = %key, count = candles.len(), "fetched candles from source");

        if !candles.is_empty() {
            if let Err(e) = self.persist(key, &candles) {
                warn!(key = %key, error = %e, "failed to persist fetched candles");
            }
        }
        if let Some(after) = query.after {
            candles.retain(|c| c.time > after);
        }
        Ok(candles)
    }

    // ---------------------------------------------------------------
    // Tickers
    // ---------------------------------------------------------------

    /// Latest ticker, served from the hot tier while its TTL holds.
    pub fn get_ticker(&self, key: &TickerKey) -> Result<TickerSnapshot> {
        let hot_key = key.hot_key();
        if let Some(ticker) = self.hot.get_value(CacheDataType::Ticker, &hot_key) {
            return Ok(ticker);
        }

        let adapter = self.registry.require(&key.source)?;
        let ticker = adapter.get_ticker(&key.symbol)?;
        self.hot.set_value(CacheDataType::Ticker, &hot_key, &ticker);
        Ok(ticker)
    }

    // ---------------------------------------------------------------
    // Derivative data
    // ---------------------------------------------------------------

    /// Funding rate and basis data held in the hot tier.
    pub fn derivatives(&self) -> DerivativeCache<'_> {
        DerivativeCache::new(&self.hot)
    }

    /// Delete every funding and basis key. Returns the number removed.
    pub fn clear_derivatives(&self) -> usize {
        self.derivatives().clear()
    }

    // ---------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------

    /// Delete hot tier keys matching `pattern`, or every key of every data
    /// type when `None`. Returns the number of keys removed.
    pub fn clear_hot(&self, pattern: Option<&str>) -> usize {
        self.hot.clear(pattern)
    }

    /// Key counts per data type in the hot tier.
    pub fn hot_stats(&self) -> HotStats {
        self.hot.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryStore;
    use crate::hot::MemoryHotCache;
    use crate::sqlite::SqliteStore;
    use gridfeed_core::{ContractBasis, DerivativeKey, Error, FundingRate, ManualClock, MarketMode};
    use gridfeed_sources::StaticSource;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::ops::Bound;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Harness {
        orchestrator: CacheOrchestrator,
        source: Arc<StaticSource>,
        hot: Arc<MemoryHotCache>,
        clock: Arc<ManualClock>,
    }

    fn make_harness_with(durable: Arc<dyn DurableStore>, config: Config) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let source = Arc::new(StaticSource::new("okx"));
        let registry = Arc::new(SourceRegistry::new());
        registry.register(source.clone());
        let hot = Arc::new(MemoryHotCache::with_clock(clock.clone()));
        let orchestrator = CacheOrchestrator::new(registry, hot.clone(), durable, &config)
            .with_clock(clock.clone());
        Harness {
            orchestrator,
            source,
            hot,
            clock,
        }
    }

    fn make_harness() -> Harness {
        make_harness_with(Arc::new(MemoryStore::new()), Config::default())
    }

    fn make_key() -> CacheKey {
        CacheKey::new("okx", "BTCUSDT", MarketMode::Spot, "1m")
    }

    fn make_candle(time: i64, close: Decimal) -> Candle {
        Candle::new(time, close, close + dec!(1), close - dec!(1), close, dec!(3))
    }

    fn series(times: &[i64]) -> Vec<Candle> {
        times.iter().map(|t| make_candle(*t, Decimal::from(*t))).collect()
    }

    fn times(candles: &[Candle]) -> Vec<i64> {
        candles.iter().map(|c| c.time).collect()
    }

    /// Fails the first `failures` writes with contention.
    struct ContendedStore {
        inner: MemoryStore,
        failures: u32,
        attempts: AtomicU32,
    }

    impl DurableStore for ContendedStore {
        fn upsert_many(&self, key: &CacheKey, candles: &[Candle]) -> Result<usize> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::contention("database is locked"));
            }
            self.inner.upsert_many(key, candles)
        }

        fn range_query(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>> {
            self.inner.range_query(key, query)
        }

        fn aggregate_range(&self, key: &CacheKey) -> Result<CacheRange> {
            self.inner.aggregate_range(key)
        }
    }

    /// Hot tier whose every operation fails.
    struct BrokenHotCache;

    impl HotCache for BrokenHotCache {
        fn add(&self, _: &str, _: &[(i64, String)]) -> Result<()> {
            Err(Error::hot_cache("connection refused"))
        }
        fn range_by_score(&self, _: &str, _: Bound<i64>, _: Bound<i64>, _: usize, _: Order) -> Result<Vec<String>> {
            Err(Error::hot_cache("connection refused"))
        }
        fn trim(&self, _: &str, _: usize) -> Result<()> {
            Err(Error::hot_cache("connection refused"))
        }
        fn expire(&self, _: &str, _: Duration) -> Result<()> {
            Err(Error::hot_cache("connection refused"))
        }
        fn get(&self, _: &str) -> Result<Option<String>> {
            Err(Error::hot_cache("connection refused"))
        }
        fn set(&self, _: &str, _: String, _: Duration) -> Result<()> {
            Err(Error::hot_cache("connection refused"))
        }
        fn delete(&self, _: &str) -> Result<bool> {
            Err(Error::hot_cache("connection refused"))
        }
        fn keys(&self, _: &str) -> Result<Vec<String>> {
            Err(Error::hot_cache("connection refused"))
        }
    }

    #[test]
    fn test_persist_last_write_wins() {
        let h = make_harness();
        let key = make_key();

        h.orchestrator.persist(&key, &[make_candle(60, dec!(1))]).unwrap();
        h.orchestrator.persist(&key, &[make_candle(60, dec!(2))]).unwrap();

        let cached = h.orchestrator.get_from_cache(&key, &RangeQuery::latest(10)).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].close, dec!(2));
        assert_eq!(h.orchestrator.get_cache_range(&key).unwrap().count, 1);
    }

    #[test]
    fn test_persist_drops_invalid_and_dedupes() {
        let h = make_harness();
        let key = make_key();
        let mut inverted = make_candle(120, dec!(5));
        inverted.high = dec!(1);
        let batch = vec![
            make_candle(0, dec!(1)),
            make_candle(60, dec!(1)),
            inverted,
            make_candle(60, dec!(9)),
        ];

        let written = h.orchestrator.persist(&key, &batch).unwrap();

        // only the missing timestamp is dropped; an inverted range is stored as reported
        assert_eq!(written, 2);
        let cached = h.orchestrator.get_from_cache(&key, &RangeQuery::latest(10)).unwrap();
        assert_eq!(times(&cached), vec![60, 120]);
        assert_eq!(cached[0].close, dec!(9));
        assert_eq!(cached[1].high, dec!(1));
    }

    #[test]
    fn test_persist_mirrors_to_hot_with_trim() {
        let mut config = Config::default();
        config.cache.candles.max_entries = Some(3);
        let h = make_harness_with(Arc::new(MemoryStore::new()), config);
        let key = make_key();

        h.orchestrator.persist(&key, &series(&[60, 120, 180, 240, 300])).unwrap();

        assert_eq!(h.hot.len(&key.hot_key()), 3);
        let found = h.orchestrator.lookup(&key, &RangeQuery::latest(10)).unwrap();
        assert_eq!(found.tier(), "hot");
        assert_eq!(times(found.candles()), vec![180, 240, 300]);
    }

    #[test]
    fn test_contention_retried_with_backoff() {
        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
            failures: 2,
            attempts: AtomicU32::new(0),
        });
        let h = make_harness_with(store.clone(), Config::default());
        let key = make_key();

        let written = h.orchestrator.persist(&key, &series(&[60, 120])).unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert!(h.clock.total_slept() >= Duration::from_millis(300));
        let range = store.inner.aggregate_range(&key).unwrap();
        assert_eq!((range.oldest, range.newest, range.count), (Some(60), Some(120), 2));
    }

    #[test]
    fn test_contention_exhausted_propagates() {
        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
            failures: 10,
            attempts: AtomicU32::new(0),
        });
        let h = make_harness_with(store.clone(), Config::default());

        let err = h.orchestrator.persist(&make_key(), &series(&[60])).unwrap_err();

        assert!(err.is_contention());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(h.hot.len(&make_key().hot_key()), 0);
    }

    #[test]
    fn test_durable_fallback_primes_hot_only_when_unbounded() {
        let durable = Arc::new(MemoryStore::new());
        let key = make_key();
        durable.upsert_many(&key, &series(&[60, 120, 180])).unwrap();
        let h = make_harness_with(durable, Config::default());

        let bounded = h
            .orchestrator
            .lookup(&key, &RangeQuery::latest(10).before(180))
            .unwrap();
        assert_eq!(bounded.tier(), "durable");
        assert_eq!(times(bounded.candles()), vec![60, 120]);
        assert_eq!(h.hot.len(&key.hot_key()), 0);

        let latest = h.orchestrator.lookup(&key, &RangeQuery::latest(2)).unwrap();
        assert_eq!(latest.tier(), "durable");
        assert_eq!(times(latest.candles()), vec![120, 180]);
        assert_eq!(h.hot.len(&key.hot_key()), 2);

        let again = h.orchestrator.lookup(&key, &RangeQuery::latest(2)).unwrap();
        assert_eq!(again.tier(), "hot");
    }

    #[test]
    fn test_bounded_reads_prime_when_configured() {
        let durable = Arc::new(MemoryStore::new());
        let key = make_key();
        durable.upsert_many(&key, &series(&[60, 120, 180])).unwrap();
        let mut config = Config::default();
        config.cache.prime_on_bounded_reads = true;
        let h = make_harness_with(durable, config);

        h.orchestrator
            .lookup(&key, &RangeQuery::latest(10).after(60))
            .unwrap();

        assert_eq!(h.hot.len(&key.hot_key()), 2);
    }

    #[test]
    fn test_hot_hit_is_not_reverified() {
        let h = make_harness();
        let key = make_key();
        // hot tier only; durable tier never sees it
        let members: Vec<(i64, String)> = series(&[60])
            .iter()
            .map(|c| (c.time, serde_json::to_string(c).unwrap()))
            .collect();
        h.hot.add(&key.hot_key(), &members).unwrap();

        let found = h.orchestrator.lookup(&key, &RangeQuery::latest(5)).unwrap();

        assert_eq!(found.tier(), "hot");
        assert!(h.orchestrator.get_cache_range(&key).unwrap().is_empty());
    }

    #[test]
    fn test_miss() {
        let h = make_harness();
        assert!(h
            .orchestrator
            .lookup(&make_key(), &RangeQuery::latest(5))
            .unwrap()
            .is_miss());
    }

    #[test]
    fn test_auto_fetch_skips_source_when_cache_full() {
        let h = make_harness();
        let key = make_key();
        h.orchestrator.persist(&key, &series(&[60, 120, 180])).unwrap();

        let candles = h.orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(3)).unwrap();

        assert_eq!(times(&candles), vec![60, 120, 180]);
        assert_eq!(h.source.candle_calls(), 0);
    }

    #[test]
    fn test_auto_fetch_end_to_end_from_empty_cache() {
        let h = make_harness();
        let key = make_key();
        h.source.insert_candles("BTCUSDT", "1m", &series(&[600, 660, 720]));

        let candles = h.orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(3)).unwrap();

        assert_eq!(times(&candles), vec![600, 660, 720]);
        assert_eq!(h.source.candle_calls(), 1);
        let range = h.orchestrator.get_cache_range(&key).unwrap();
        assert_eq!(
            range,
            CacheRange {
                oldest: Some(600),
                newest: Some(720),
                count: 3
            }
        );
    }

    #[test]
    fn test_auto_fetch_applies_after_filter() {
        let h = make_harness();
        let key = make_key();
        h.source.insert_candles("BTCUSDT", "1m", &series(&[600, 660, 720]));

        let candles = h
            .orchestrator
            .get_with_auto_fetch(&key, &RangeQuery::latest(3).after(600))
            .unwrap();

        assert_eq!(times(&candles), vec![660, 720]);
        // the full fetch is still persisted
        assert_eq!(h.orchestrator.get_cache_range(&key).unwrap().count, 3);
    }

    #[test]
    fn test_auto_fetch_degrades_to_partial_cache() {
        let h = make_harness();
        let key = make_key();
        h.orchestrator.persist(&key, &series(&[60])).unwrap();
        h.source.set_failing(true);

        let candles = h.orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(5)).unwrap();

        assert_eq!(times(&candles), vec![60]);
        assert_eq!(h.source.candle_calls(), 1);
    }

    #[test]
    fn test_auto_fetch_empty_cache_failing_source_errors() {
        let h = make_harness();
        h.source.set_failing(true);

        let err = h
            .orchestrator
            .get_with_auto_fetch(&make_key(), &RangeQuery::latest(5))
            .unwrap_err();

        assert!(err.is_adapter());
    }

    #[test]
    fn test_auto_fetch_unknown_source() {
        let h = make_harness();
        let key = CacheKey::new("kraken", "BTCUSDT", MarketMode::Spot, "1m");

        let err = h.orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(5)).unwrap_err();

        assert!(matches!(err, Error::UnknownSource(_)));
    }

    #[test]
    fn test_fresh_first_prefers_source() {
        let h = make_harness();
        let key = make_key();
        h.orchestrator.persist(&key, &series(&[60, 120, 180])).unwrap();
        h.source.insert_candles("BTCUSDT", "1m", &[make_candle(180, dec!(7))]);

        let candles = h
            .orchestrator
            .get(&key, &RangeQuery::latest(3), FetchStrategy::FreshFirst)
            .unwrap();

        assert_eq!(h.source.candle_calls(), 1);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(7));
    }

    #[test]
    fn test_fresh_first_falls_back_to_cache() {
        let h = make_harness();
        let key = make_key();
        h.orchestrator.persist(&key, &series(&[60, 120])).unwrap();
        h.source.set_failing(true);

        let candles = h
            .orchestrator
            .get(&key, &RangeQuery::latest(3), FetchStrategy::FreshFirst)
            .unwrap();

        assert_eq!(times(&candles), vec![60, 120]);
    }

    #[test]
    fn test_hot_failures_never_raise() {
        let clock = Arc::new(ManualClock::default());
        let source = Arc::new(StaticSource::new("okx"));
        source.insert_candles("BTCUSDT", "1m", &series(&[60, 120]));
        source.insert_ticker(TickerSnapshot::new("BTCUSDT", dec!(1)));
        let registry = Arc::new(SourceRegistry::new());
        registry.register(source.clone());
        let orchestrator = CacheOrchestrator::new(
            registry,
            Arc::new(BrokenHotCache),
            Arc::new(MemoryStore::new()),
            &Config::default(),
        )
        .with_clock(clock);
        let key = make_key();

        let fetched = orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(2)).unwrap();
        assert_eq!(times(&fetched), vec![60, 120]);

        let cached = orchestrator.get_from_cache(&key, &RangeQuery::latest(2)).unwrap();
        assert_eq!(times(&cached), vec![60, 120]);

        assert!(orchestrator.get_ticker(&key.ticker_key()).is_ok());
        assert_eq!(orchestrator.clear_hot(None), 0);
        assert_eq!(orchestrator.hot_stats(), HotStats::default());
    }

    #[test]
    fn test_ticker_cached_until_ttl() {
        let h = make_harness();
        h.source.insert_ticker(TickerSnapshot::new("BTCUSDT", dec!(100)));
        let key = TickerKey::new("okx", "btcusdt", MarketMode::Spot);

        assert_eq!(h.orchestrator.get_ticker(&key).unwrap().last, dec!(100));
        h.source.insert_ticker(TickerSnapshot::new("BTCUSDT", dec!(101)));
        assert_eq!(h.orchestrator.get_ticker(&key).unwrap().last, dec!(100));
        assert_eq!(h.source.ticker_calls(), 1);

        h.clock.advance(Duration::from_secs(31));
        assert_eq!(h.orchestrator.get_ticker(&key).unwrap().last, dec!(101));
        assert_eq!(h.source.ticker_calls(), 2);
    }

    #[test]
    fn test_clear_hot_and_stats() {
        let h = make_harness();
        h.source.insert_ticker(TickerSnapshot::new("BTCUSDT", dec!(1)));
        h.orchestrator.persist(&make_key(), &series(&[60])).unwrap();
        h.orchestrator
            .persist(&CacheKey::new("okx", "ETHUSDT", MarketMode::Spot, "1m"), &series(&[60]))
            .unwrap();
        h.orchestrator
            .get_ticker(&TickerKey::new("okx", "BTCUSDT", MarketMode::Spot))
            .unwrap();

        let stats = h.orchestrator.hot_stats();
        assert_eq!(stats.get(CacheDataType::Candles), 2);
        assert_eq!(stats.get(CacheDataType::Ticker), 1);
        assert_eq!(stats.total(), 3);
        assert_eq!(h.orchestrator.clear_hot(Some("candles:okx:ETH*")), 1);
        assert_eq!(h.orchestrator.clear_hot(None), 2);
        assert_eq!(h.orchestrator.hot_stats().total(), 0);
    }

    #[test]
    fn test_ticker_ttl_follows_config() {
        let mut config = Config::default();
        config.cache.ticker.ttl_secs = 5;
        let h = make_harness_with(Arc::new(MemoryStore::new()), config);
        h.source.insert_ticker(TickerSnapshot::new("BTCUSDT", dec!(100)));
        let key = TickerKey::new("okx", "BTCUSDT", MarketMode::Spot);

        h.orchestrator.get_ticker(&key).unwrap();
        h.clock.advance(Duration::from_secs(5));
        h.orchestrator.get_ticker(&key).unwrap();

        assert_eq!(h.source.ticker_calls(), 2);
    }

    #[test]
    fn test_derivatives_share_the_hot_tier() {
        let h = make_harness();
        let key = DerivativeKey::new("okx", "BTCUSDT");
        h.orchestrator.persist(&make_key(), &series(&[60])).unwrap();
        let derivatives = h.orchestrator.derivatives();
        derivatives.save_funding_rate(&key, &FundingRate::new(60, dec!(0.0001)));
        derivatives.save_basis_history(&key, &[ContractBasis::new(60, dec!(101), dec!(100))]);

        assert!(h.hot.get("funding_rate:okx:BTCUSDT").unwrap().is_some());
        let stats = h.orchestrator.hot_stats();
        assert_eq!(stats.get(CacheDataType::FundingRate), 1);
        assert_eq!(stats.get(CacheDataType::BasisHistory), 1);

        assert_eq!(h.orchestrator.clear_derivatives(), 2);
        assert_eq!(h.orchestrator.hot_stats().total(), 1);
        assert_eq!(
            h.orchestrator.lookup(&make_key(), &RangeQuery::latest(1)).unwrap().tier(),
            "hot"
        );
    }

    #[test]
    fn test_sqlite_backed_end_to_end() {
        let durable = Arc::new(SqliteStore::open_in_memory().unwrap());
        let h = make_harness_with(durable, Config::default());
        let key = make_key();
        h.source.insert_candles("BTCUSDT", "1m", &series(&[600, 660, 720]));

        let first = h.orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(3)).unwrap();
        h.orchestrator.clear_hot(None);
        let second = h.orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(3)).unwrap();

        assert_eq!(first, second);
        assert_eq!(h.source.candle_calls(), 1);
    }
}
