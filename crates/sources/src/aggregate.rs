//! Granularity aggregation.
//!
//! Builds coarse candles out of finer ones so a source can serve a period it
//! does not offer natively.

use gridfeed_core::{period_start, Candle, TimestampSecs};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A coarse candle being merged from fine ones.
#[derive(Debug, Clone)]
struct BucketInProgress {
    start: TimestampSecs,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl BucketInProgress {
    fn new(start: TimestampSecs, first: &Candle) -> Self {
        Self {
            start,
            open: first.open,
            high: first.high,
            low: first.low,
            close: first.close,
            volume: first.volume,
        }
    }

    fn add(&mut self, candle: &Candle) {
        self.high = self.high.max(candle.high);
        self.low = self.low.min(candle.low);
        self.close = candle.close;
        self.volume += candle.volume;
    }

    fn to_candle(&self) -> Candle {
        Candle::new(
            self.start,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }
}

/// Merge `fine` candles into buckets of `period_secs`.
///
/// Bucket start is `floor(time / period) * period`; open comes from the
/// earliest candle, close from the latest, high/low are the extremes and
/// volume is the sum. Output is ascending by time.
pub fn aggregate_candles(fine: &[Candle], period_secs: i64) -> Vec<Candle> {
    if period_secs <= 0 {
        return Vec::new();
    }

    let mut sorted: Vec<&Candle> = fine.iter().collect();
    sorted.sort_by_key(|c| c.time);

    let mut buckets: BTreeMap<TimestampSecs, BucketInProgress> = BTreeMap::new();
    for candle in sorted {
        let start = period_start(candle.time, period_secs);
        buckets
            .entry(start)
            .and_modify(|b| b.add(candle))
            .or_insert_with(|| BucketInProgress::new(start, candle));
    }

    buckets.values().map(BucketInProgress::to_candle).collect()
}

/// Keep only the last `limit` candles.
pub fn take_last(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}
