//! Source adapter contract.
//!
//! Adapters implement [`SourceAdapter`] in source-native units. Callers use
//! the [`SourceAdapterExt`] wrapper, which normalizes the request, serves
//! unsupported periods by aggregation and returns canonical values.

use std::sync::Arc;

use gridfeed_core::{granularity, Candle, Error, Result, TickerSnapshot, TimestampSecs};
use tracing::debug;

use crate::aggregate::{aggregate_candles, take_last};
use crate::capability::{SourceCapability, SourceMetadata};
use crate::normalize::{canonical_symbol, Normalizer};

/// Bounded, time-ordered feed of the most recent samples of a live connection.
pub trait LiveBuffer: Send + Sync {
    /// Up to `limit` most recent samples, ascending by time.
    ///
    /// Symbol and granularity are canonical. Returns an empty vector rather
    /// than blocking when nothing is available.
    fn get_latest(&self, symbol: &str, granularity: &str, limit: usize) -> Vec<Candle>;
}

/// Per-source implementation of the fetch contract.
///
/// `fetch_*_native` take and return source-native symbols, granularities and
/// timestamps. They never retry: errors surface as [`Error::Adapter`].
pub trait SourceAdapter: Send + Sync {
    fn metadata(&self) -> &SourceMetadata;

    fn capability(&self) -> &SourceCapability;

    fn normalizer(&self) -> &Normalizer;

    /// Fetch up to `limit` candles older than `before`, native units.
    fn fetch_candles_native(
        &self,
        symbol: &str,
        granularity: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>>;

    /// Fetch the current ticker, native symbol.
    fn fetch_ticker_native(&self, symbol: &str) -> Result<TickerSnapshot>;

    /// Live buffer fed by the source's streaming connection, if any.
    fn live_buffer(&self) -> Option<Arc<dyn LiveBuffer>> {
        None
    }

    /// Unique source name.
    fn name(&self) -> &str {
        &self.metadata().name
    }
}

/// Canonical-unit operations available on every adapter.
pub trait SourceAdapterExt: SourceAdapter {
    /// Fetch `limit` candles ending before `before` (seconds, exclusive).
    ///
    /// Periods missing from the capability are aggregated from the coarsest
    /// supported period that divides them at least twice.
    fn get_candles(
        &self,
        symbol: &str,
        granularity: &str,
        limit: usize,
        before: Option<TimestampSecs>,
    ) -> Result<Vec<Candle>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let capability = self.capability();
        if capability.supports_granularity(granularity) {
            return self.fetch_direct(symbol, granularity, limit, before);
        }

        let requested_secs = granularity::to_seconds(granularity)
            .ok_or_else(|| Error::unsupported_granularity(self.name(), granularity))?;
        let (base, ratio) = granularity::aggregation_base(granularity, &capability.granularities)
            .ok_or_else(|| Error::unsupported_granularity(self.name(), granularity))?;

        let ratio = usize::try_from(ratio).unwrap_or(usize::MAX);
        let fine_limit = limit
            .saturating_mul(ratio)
            .min(capability.max_candles_per_fetch);
        debug!(
            source = self.name(),
            requested = granularity,
            base,
            ratio,
            fine_limit,
            "aggregating candles"
        );

        let fine = self.fetch_direct(symbol, base, fine_limit, before)?;
        let coarse = aggregate_candles(&fine, requested_secs);
        Ok(take_last(coarse, limit))
    }

    /// Fetch a natively supported granularity and convert back to canonical units.
    fn fetch_direct(
        &self,
        symbol: &str,
        granularity: &str,
        limit: usize,
        before: Option<TimestampSecs>,
    ) -> Result<Vec<Candle>> {
        let limit = limit.min(self.capability().max_candles_per_fetch);
        let request = self.normalizer().normalize(symbol, granularity, before);
        let mut candles = self.fetch_candles_native(
            &request.symbol,
            &request.granularity,
            limit,
            request.timestamp,
        )?;

        let normalizer = self.normalizer();
        for candle in &mut candles {
            candle.time = normalizer.denormalize_timestamp(candle.time);
        }
        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }

    /// Fetch the current ticker; the snapshot carries the canonical symbol.
    fn get_ticker(&self, symbol: &str) -> Result<TickerSnapshot> {
        let native = self.normalizer().symbol(symbol);
        let mut ticker = self.fetch_ticker_native(&native)?;
        ticker.symbol = canonical_symbol(symbol);
        Ok(ticker)
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        self.capability().supports_symbol(&canonical_symbol(symbol))
    }

    fn validate_granularity(&self, granularity: &str) -> bool {
        self.capability().supports_granularity(granularity)
    }

    /// Nearest supported granularity to `granularity`.
    fn closest_granularity(&self, granularity: &str) -> Option<String> {
        granularity::find_closest_supported(granularity, &self.capability().granularities)
            .map(str::to_string)
    }
}

impl<T: SourceAdapter + ?Sized> SourceAdapterExt for T {}
