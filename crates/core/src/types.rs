//! Core data types for the gridfeed system.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Timestamp in seconds since Unix epoch (UTC).
pub type TimestampSecs = i64;

/// Floor a timestamp to the start of its period.
#[inline]
pub fn period_start(ts: TimestampSecs, period_secs: i64) -> TimestampSecs {
    ts.div_euclid(period_secs) * period_secs
}

/// One OHLCV sample for a fixed time period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Period start (seconds).
    pub time: TimestampSecs,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Total volume.
    pub volume: Decimal,
}

impl Candle {
    /// Create a candle.
    pub fn new(
        time: TimestampSecs,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// OHLCV signature used to detect in-place revisions of one period.
    #[inline]
    pub fn signature(&self) -> Signature {
        Signature {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }

    /// Period start as a UTC datetime.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time, 0).single()
    }

    /// Check the record before it reaches storage.
    ///
    /// Only the timestamp is checked; prices are stored as the source
    /// reported them.
    pub fn validate(&self) -> Result<(), Error> {
        if self.time <= 0 {
            return Err(Error::validation(format!(
                "candle has no valid timestamp (time={})",
                self.time
            )));
        }
        Ok(())
    }
}

/// Value derived from a candle's OHLCV fields.
///
/// Decimal equality is numeric, so `1.0` and `1.00` produce equal signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Latest quote snapshot for a symbol. No history is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    /// Canonical symbol (e.g., "BTCUSDT").
    pub symbol: String,
    /// Last traded price.
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    /// Absolute change over 24h.
    pub change_24h: Option<Decimal>,
    /// Percentage change over 24h.
    pub change_24h_pct: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
}

impl TickerSnapshot {
    /// Snapshot with only a last price.
    pub fn new(symbol: impl Into<String>, last: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            last,
            bid: None,
            ask: None,
            high_24h: None,
            low_24h: None,
            change_24h: None,
            change_24h_pct: None,
            volume_24h: None,
        }
    }

    /// Fill the 24h change fields from the opening price of the window.
    pub fn with_open_24h(mut self, open_24h: Decimal) -> Self {
        if !open_24h.is_zero() {
            let change = self.last - open_24h;
            self.change_24h = Some(change);
            self.change_24h_pct = Some(change / open_24h * Decimal::ONE_HUNDRED);
        }
        self
    }

    /// Mid price, when both sides are known.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Market segment a series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    #[default]
    Spot,
    Swap,
    Futures,
}

impl MarketMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketMode::Spot => "spot",
            MarketMode::Swap => "swap",
            MarketMode::Futures => "futures",
        }
    }
}

impl fmt::Display for MarketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(MarketMode::Spot),
            "swap" | "perp" | "perpetual" => Ok(MarketMode::Swap),
            "futures" | "future" => Ok(MarketMode::Futures),
            other => Err(Error::config(format!("unknown market mode: {other}"))),
        }
    }
}

/// Record with a time that orders it within a series.
pub trait Timestamped {
    fn timestamp(&self) -> TimestampSecs;
}

impl Timestamped for Candle {
    fn timestamp(&self) -> TimestampSecs {
        self.time
    }
}

/// Kind of data held under a hot tier key. Each kind has its own key prefix,
/// TTL and size bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDataType {
    Candles,
    FundingRate,
    FundingHistory,
    Basis,
    BasisHistory,
    Ticker,
}

impl CacheDataType {
    pub const ALL: [CacheDataType; 6] = [
        CacheDataType::Candles,
        CacheDataType::FundingRate,
        CacheDataType::FundingHistory,
        CacheDataType::Basis,
        CacheDataType::BasisHistory,
        CacheDataType::Ticker,
    ];

    /// Funding and basis data, current values and histories.
    pub const DERIVATIVES: [CacheDataType; 4] = [
        CacheDataType::FundingRate,
        CacheDataType::FundingHistory,
        CacheDataType::Basis,
        CacheDataType::BasisHistory,
    ];

    /// Key prefix, e.g. `funding_history`.
    pub fn prefix(self) -> &'static str {
        match self {
            CacheDataType::Candles => "candles",
            CacheDataType::FundingRate => "funding_rate",
            CacheDataType::FundingHistory => "funding_history",
            CacheDataType::Basis => "basis",
            CacheDataType::BasisHistory => "basis_history",
            CacheDataType::Ticker => "ticker",
        }
    }

    /// Glob matching every key of this type.
    pub fn pattern(self) -> String {
        format!("{}:*", self.prefix())
    }

    /// Held as a time-ordered series rather than a single value.
    pub fn is_series(self) -> bool {
        matches!(
            self,
            CacheDataType::Candles | CacheDataType::FundingHistory | CacheDataType::BasisHistory
        )
    }
}

impl fmt::Display for CacheDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for CacheDataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheDataType::ALL
            .into_iter()
            .find(|t| t.prefix() == s)
            .ok_or_else(|| Error::config(format!("unknown cache data type: {s}")))
    }
}

/// Identifies one candle series in both cache tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub source: String,
    pub symbol: String,
    pub mode: MarketMode,
    pub granularity: String,
}

impl CacheKey {
    /// Build a key, normalizing source to lower case and symbol to upper case.
    pub fn new(
        source: impl AsRef<str>,
        symbol: impl AsRef<str>,
        mode: MarketMode,
        granularity: impl Into<String>,
    ) -> Self {
        Self {
            source: source.as_ref().to_ascii_lowercase(),
            symbol: symbol.as_ref().to_ascii_uppercase(),
            mode,
            granularity: granularity.into(),
        }
    }

    /// Key of the ticker snapshot for the same market.
    pub fn ticker_key(&self) -> TickerKey {
        TickerKey {
            source: self.source.clone(),
            symbol: self.symbol.clone(),
            mode: self.mode,
        }
    }

    /// Hot tier key, e.g. `candles:okx:BTCUSDT:spot:1m`.
    pub fn hot_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            CacheDataType::Candles,
            self.source,
            self.symbol,
            self.mode,
            self.granularity
        )
    }

    /// Stream key, e.g. `okx::BTCUSDT::spot::1s`.
    pub fn stream_key(&self) -> String {
        format!(
            "{}::{}::{}::{}",
            self.source, self.symbol, self.mode, self.granularity
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.source, self.symbol, self.mode, self.granularity
        )
    }
}

/// Identifies one ticker snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickerKey {
    pub source: String,
    pub symbol: String,
    pub mode: MarketMode,
}

impl TickerKey {
    pub fn new(source: impl AsRef<str>, symbol: impl AsRef<str>, mode: MarketMode) -> Self {
        Self {
            source: source.as_ref().to_ascii_lowercase(),
            symbol: symbol.as_ref().to_ascii_uppercase(),
            mode,
        }
    }

    /// Hot tier key, e.g. `ticker:okx:BTCUSDT:spot`.
    pub fn hot_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            CacheDataType::Ticker,
            self.source,
            self.symbol,
            self.mode
        )
    }
}

/// Summary of the durable records of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheRange {
    pub oldest: Option<TimestampSecs>,
    pub newest: Option<TimestampSecs>,
    pub count: u64,
}

impl CacheRange {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
