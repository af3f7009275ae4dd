//! Live candle buffer fed by a streaming connection.
//!
//! Holds the most recent candles per (symbol, granularity). A connection
//! pushes whole candle updates or raw trades; the ingestion manager reads
//! the tail with [`LiveBuffer::get_latest`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use gridfeed_core::{granularity, period_start, Candle, Error, Result, TimestampSecs};
use gridfeed_sources::{canonical_symbol, LiveBuffer};
use rust_decimal::Decimal;

/// Default number of samples kept per series (two hours of 1s candles).
pub const DEFAULT_CAPACITY: usize = 7_200;

/// Bounded, time-ordered candle buffer.
pub struct CandleBuffer {
    series: Mutex<HashMap<(String, String), VecDeque<Candle>>>,
    capacity: usize,
}

impl CandleBuffer {
    /// Create a buffer keeping at most `capacity` samples per series.
    pub fn new(capacity: usize) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add or revise a candle.
    ///
    /// A candle whose time is already buffered replaces that sample, which is
    /// how the still-open period gets updated.
    pub fn push(&self, symbol: &str, granularity: &str, candle: Candle) {
        let mut series = self.lock();
        let samples = series.entry(series_key(symbol, granularity)).or_default();
        upsert_sample(samples, candle);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Add several candle updates in order.
    pub fn push_all(&self, symbol: &str, granularity: &str, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.push(symbol, granularity, candle);
        }
    }

    /// Fold a trade into the candle of its period.
    ///
    /// The first trade of a period opens it; later trades move high, low and
    /// close and add to the volume.
    pub fn push_trade(
        &self,
        symbol: &str,
        granularity: &str,
        ts: TimestampSecs,
        price: Decimal,
        size: Decimal,
    ) -> Result<()> {
        let period = granularity::to_seconds(granularity)
            .ok_or_else(|| Error::validation(format!("unknown granularity {granularity}")))?;
        if ts <= 0 {
            return Err(Error::validation(format!("trade has no valid timestamp (ts={ts})")));
        }
        let start = period_start(ts, period);

        let mut series = self.lock();
        let samples = series.entry(series_key(symbol, granularity)).or_default();
        match samples.binary_search_by_key(&start, |c| c.time) {
            Ok(i) => fold_trade(&mut samples[i], price, size),
            Err(i) => samples.insert(i, Candle::new(start, price, price, price, price, size)),
        }
        while samples.len() > self.capacity {
            samples.pop_front();
        }
        Ok(())
    }

    /// Number of samples buffered for a series.
    pub fn len(&self, symbol: &str, granularity: &str) -> usize {
        self.lock()
            .get(&series_key(symbol, granularity))
            .map_or(0, VecDeque::len)
    }

    /// Drop every buffered sample.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), VecDeque<Candle>>> {
        self.series.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CandleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LiveBuffer for CandleBuffer {
    fn get_latest(&self, symbol: &str, granularity: &str, limit: usize) -> Vec<Candle> {
        let series = self.lock();
        let Some(samples) = series.get(&series_key(symbol, granularity)) else {
            return Vec::new();
        };
        let skip = samples.len().saturating_sub(limit);
        samples.iter().skip(skip).cloned().collect()
    }
}

fn series_key(symbol: &str, granularity: &str) -> (String, String) {
    (canonical_symbol(symbol), granularity.to_string())
}

fn upsert_sample(samples: &mut VecDeque<Candle>, candle: Candle) {
    match samples.back() {
        Some(last) if last.time < candle.time => samples.push_back(candle),
        None => samples.push_back(candle),
        Some(_) => match samples.binary_search_by_key(&candle.time, |c| c.time) {
            Ok(i) => samples[i] = candle,
            Err(i) => samples.insert(i, candle),
        },
    }
}

fn fold_trade(candle: &mut Candle, price: Decimal, size: Decimal) {
    candle.high = candle.high.max(price);
    candle.low = candle.low.min(price);
    candle.close = price;
    candle.volume += size;
}
