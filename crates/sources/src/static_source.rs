//! In-memory source adapter.
//!
//! Serves preloaded candles and tickers. Used for replaying recorded data
//! and as a deterministic stand-in for a network source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use gridfeed_core::{Candle, Error, Result, TickerSnapshot};

use crate::adapter::{LiveBuffer, SourceAdapter};
use crate::capability::{SourceCapability, SourceMetadata};
use crate::normalize::{NativeRequest, Normalizer};

#[derive(Default)]
struct Store {
    /// (native symbol, native granularity) -> candles with native timestamps, ascending
    candles: HashMap<(String, String), Vec<Candle>>,
    /// native symbol -> ticker
    tickers: HashMap<String, TickerSnapshot>,
    requests: Vec<NativeRequest>,
}

/// Adapter backed by in-process data.
pub struct StaticSource {
    metadata: SourceMetadata,
    capability: SourceCapability,
    normalizer: Normalizer,
    live: Option<Arc<dyn LiveBuffer>>,
    store: Mutex<Store>,
    failing: AtomicBool,
    candle_calls: AtomicUsize,
    ticker_calls: AtomicUsize,
}

impl StaticSource {
    /// Source serving 1m through 1d with a 300-candle fetch cap.
    pub fn new(name: &str) -> Self {
        let capability = SourceCapability {
            max_candles_per_fetch: 300,
            ..SourceCapability::with_granularities(["1m", "5m", "15m", "1h", "4h", "1d"])
        };
        Self {
            metadata: SourceMetadata::exchange(name, name),
            normalizer: Normalizer::new(capability.symbol_format),
            capability,
            live: None,
            store: Mutex::new(Store::default()),
            failing: AtomicBool::new(false),
            candle_calls: AtomicUsize::new(0),
            ticker_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_capability(mut self, capability: SourceCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach a live buffer and advertise streaming support.
    pub fn with_live_buffer(mut self, buffer: Arc<dyn LiveBuffer>) -> Self {
        self.capability.supports_streaming = true;
        self.live = Some(buffer);
        self
    }

    /// Load canonical candles; later loads replace samples with the same time.
    pub fn insert_candles(&self, symbol: &str, granularity: &str, candles: &[Candle]) {
        let request = self.normalizer.normalize(symbol, granularity, None);
        let mut store = self.lock();
        let series = store
            .candles
            .entry((request.symbol, request.granularity))
            .or_default();
        for candle in candles {
            let mut native = candle.clone();
            native.time = self.normalizer.timestamp(candle.time);
            match series.binary_search_by_key(&native.time, |c| c.time) {
                Ok(i) => series[i] = native,
                Err(i) => series.insert(i, native),
            }
        }
    }

    /// Load a ticker under its canonical symbol.
    pub fn insert_ticker(&self, ticker: TickerSnapshot) {
        let native = self.normalizer.symbol(&ticker.symbol);
        self.lock().tickers.insert(native, ticker);
    }

    /// Make every fetch fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of candle fetches received.
    pub fn candle_calls(&self) -> usize {
        self.candle_calls.load(Ordering::SeqCst)
    }

    /// Number of ticker fetches received.
    pub fn ticker_calls(&self) -> usize {
        self.ticker_calls.load(Ordering::SeqCst)
    }

    /// Candle requests received, in native units.
    pub fn requests(&self) -> Vec<NativeRequest> {
        self.lock().requests.clone()
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::adapter(&self.metadata.name, "source unavailable"));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SourceAdapter for StaticSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn capability(&self) -> &SourceCapability {
        &self.capability
    }

    fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    fn fetch_candles_native(
        &self,
        symbol: &str,
        granularity: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        let mut store = self.lock();
        store.requests.push(NativeRequest {
            symbol: symbol.to_string(),
            granularity: granularity.to_string(),
            timestamp: before,
        });
        drop(store);
        self.check_failing()?;

        let store = self.lock();
        let Some(series) = store
            .candles
            .get(&(symbol.to_string(), granularity.to_string()))
        else {
            return Ok(Vec::new());
        };
        let eligible: Vec<&Candle> = series
            .iter()
            .filter(|c| before.map_or(true, |b| c.time < b))
            .collect();
        let skip = eligible.len().saturating_sub(limit);
        Ok(eligible.into_iter().skip(skip).cloned().collect())
    }

    fn fetch_ticker_native(&self, symbol: &str) -> Result<TickerSnapshot> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        self.lock()
            .tickers
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::adapter(&self.metadata.name, format!("no ticker for {symbol}")))
    }

    fn live_buffer(&self) -> Option<Arc<dyn LiveBuffer>> {
        self.live.clone()
    }
}
