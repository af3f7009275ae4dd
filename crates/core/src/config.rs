//! Configuration structures for the gridfeed system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{CacheDataType, MarketMode};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hot tier configuration.
    pub cache: CacheConfig,
    /// Durable write retry configuration.
    pub retry: RetryConfig,
    /// Durable store configuration.
    pub store: StoreConfig,
    /// Real-time ingestion configuration.
    pub ingestion: IngestionConfig,
}

impl Config {
    /// Parse a JSON document; missing sections take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.display(), streams = config.ingestion.streams.len(), "loaded config");
        Ok(config)
    }
}

/// TTL and size bound of one hot tier data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeConfig {
    /// Time-to-live of a key (seconds).
    pub ttl_secs: u64,
    /// Maximum members kept per series (oldest trimmed first). `None` is unbounded.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl DataTypeConfig {
    pub const fn new(ttl_secs: u64, max_entries: Option<usize>) -> Self {
        Self {
            ttl_secs,
            max_entries,
        }
    }

    /// Built-in settings of a data type.
    pub fn for_type(data_type: CacheDataType) -> Self {
        match data_type {
            CacheDataType::Candles => Self::new(86_400, Some(5_000)),
            CacheDataType::FundingRate => Self::new(3_600, None),
            CacheDataType::FundingHistory => Self::new(86_400, Some(200)),
            CacheDataType::Basis => Self::new(1_800, None),
            CacheDataType::BasisHistory => Self::new(3_600, Some(1_000)),
            CacheDataType::Ticker => Self::new(30, None),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Backend of the hot tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum HotTierConfig {
    /// In-process cache, lost on restart.
    #[default]
    Memory,
    /// Redis server, e.g. `redis://127.0.0.1:6379/0`.
    Redis { url: String },
}

/// Hot tier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub hot: HotTierConfig,
    pub candles: DataTypeConfig,
    pub funding_rate: DataTypeConfig,
    pub funding_history: DataTypeConfig,
    pub basis: DataTypeConfig,
    pub basis_history: DataTypeConfig,
    pub ticker: DataTypeConfig,
    /// Allow bounded (`before`/`after`) durable reads to prime the hot tier.
    pub prime_on_bounded_reads: bool,
}

impl CacheConfig {
    pub fn for_type(&self, data_type: CacheDataType) -> &DataTypeConfig {
        match data_type {
            CacheDataType::Candles => &self.candles,
            CacheDataType::FundingRate => &self.funding_rate,
            CacheDataType::FundingHistory => &self.funding_history,
            CacheDataType::Basis => &self.basis,
            CacheDataType::BasisHistory => &self.basis_history,
            CacheDataType::Ticker => &self.ticker,
        }
    }

    pub fn for_type_mut(&mut self, data_type: CacheDataType) -> &mut DataTypeConfig {
        match data_type {
            CacheDataType::Candles => &mut self.candles,
            CacheDataType::FundingRate => &mut self.funding_rate,
            CacheDataType::FundingHistory => &mut self.funding_history,
            CacheDataType::Basis => &mut self.basis,
            CacheDataType::BasisHistory => &mut self.basis_history,
            CacheDataType::Ticker => &mut self.ticker,
        }
    }

    pub fn ttl(&self, data_type: CacheDataType) -> Duration {
        self.for_type(data_type).ttl()
    }

    pub fn max_entries(&self, data_type: CacheDataType) -> Option<usize> {
        self.for_type(data_type).max_entries
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot: HotTierConfig::default(),
            candles: DataTypeConfig::for_type(CacheDataType::Candles),
            funding_rate: DataTypeConfig::for_type(CacheDataType::FundingRate),
            funding_history: DataTypeConfig::for_type(CacheDataType::FundingHistory),
            basis: DataTypeConfig::for_type(CacheDataType::Basis),
            basis_history: DataTypeConfig::for_type(CacheDataType::BasisHistory),
            ticker: DataTypeConfig::for_type(CacheDataType::Ticker),
            prime_on_bounded_reads: false,
        }
    }
}

/// Durable write retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total write attempts before the contention error is surfaced.
    pub max_retries: u32,
    /// Base of the exponential backoff (ms): `base * 2^attempt`.
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 100,
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. `None` keeps the store in memory.
    pub path: Option<PathBuf>,
    /// SQLite busy timeout (ms). Zero reports contention immediately.
    pub busy_timeout_ms: u64,
}

/// Real-time ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Default delay between worker ticks (ms).
    pub poll_interval_ms: u64,
    /// Default number of samples pulled per tick.
    pub batch_size: usize,
    /// Upper bound of the failure backoff (ms).
    pub backoff_ceiling_ms: u64,
    /// Spawn workers for `streams` at startup.
    pub auto_start: bool,
    /// Streams to ingest.
    pub streams: Vec<StreamSpec>,
}

impl IngestionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 200,
            backoff_ceiling_ms: 30_000,
            auto_start: true,
            streams: Vec::new(),
        }
    }
}

/// One configured real-time stream.
///
/// The poll interval is given either as `poll_interval_ms` or as
/// `poll_interval` in (fractional) seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStreamSpec")]
pub struct StreamSpec {
    pub source: String,
    pub symbol: String,
    pub mode: MarketMode,
    pub granularity: String,
    /// Overrides the default poll interval (ms).
    pub poll_interval_ms: Option<u64>,
    /// Overrides the default batch size.
    pub batch_size: Option<usize>,
}

#[derive(Deserialize)]
struct RawStreamSpec {
    source: String,
    symbol: String,
    #[serde(default)]
    mode: MarketMode,
    #[serde(default = "default_stream_granularity", alias = "bar")]
    granularity: String,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    poll_interval: Option<f64>,
    #[serde(default)]
    batch_size: Option<usize>,
}

impl TryFrom<RawStreamSpec> for StreamSpec {
    type Error = Error;

    fn try_from(raw: RawStreamSpec) -> Result<Self> {
        let poll_interval_ms = match (raw.poll_interval_ms, raw.poll_interval) {
            (Some(_), Some(_)) => {
                return Err(Error::config(format!(
                    "stream {}:{} sets both poll_interval and poll_interval_ms",
                    raw.source, raw.symbol
                )))
            }
            (Some(0), None) => {
                return Err(Error::config(format!(
                    "stream {}:{} has a zero poll interval",
                    raw.source, raw.symbol
                )))
            }
            (Some(ms), None) => Some(ms),
            (None, Some(secs)) => Some(poll_interval_from_secs(secs)?),
            (None, None) => None,
        };
        if raw.batch_size == Some(0) {
            return Err(Error::config(format!(
                "stream {}:{} has a zero batch size",
                raw.source, raw.symbol
            )));
        }
        Ok(Self {
            source: raw.source,
            symbol: raw.symbol,
            mode: raw.mode,
            granularity: raw.granularity,
            poll_interval_ms,
            batch_size: raw.batch_size,
        })
    }
}

/// Convert a poll interval in seconds to whole milliseconds.
///
/// Rejects values that are not finite, not positive, or shorter than 1ms.
pub fn poll_interval_from_secs(secs: f64) -> Result<u64> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::config(format!("poll interval must be positive, got {secs}")));
    }
    let ms = (secs * 1000.0).round();
    if ms < 1.0 {
        return Err(Error::config(format!("poll interval {secs}s is below 1ms")));
    }
    Ok(ms.min(u64::MAX as f64) as u64)
}

fn default_stream_granularity() -> String {
    "1s".to_string()
}

impl StreamSpec {
    pub fn new(source: impl Into<String>, symbol: impl Into<String>, granularity: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            symbol: symbol.into(),
            mode: MarketMode::Spot,
            granularity: granularity.into(),
            poll_interval_ms: None,
            batch_size: None,
        }
    }

    /// Parse a stream list.
    ///
    /// Accepts a JSON array of objects, or the compact form
    /// `source:symbol:bar[:poll_secs[:batch]]` with entries separated by commas.
    pub fn parse_list(raw: &str) -> Result<Vec<StreamSpec>> {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            return Ok(serde_json::from_str(trimmed)?);
        }

        let mut specs = Vec::new();
        for item in trimmed.split(',') {
            let parts: Vec<&str> = item
                .split(':')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            let Some(source) = parts.first() else {
                continue;
            };
            let mut spec = StreamSpec::new(
                *source,
                parts.get(1).copied().unwrap_or("BTCUSDT"),
                parts.get(2).copied().unwrap_or("1s"),
            );
            if let Some(poll) = parts.get(3) {
                let secs: f64 = poll
                    .parse()
                    .map_err(|_| Error::config(format!("invalid poll interval '{poll}' in '{item}'")))?;
                let ms = poll_interval_from_secs(secs)
                    .map_err(|e| Error::config(format!("invalid poll interval '{poll}' in '{item}': {e}")))?;
                spec.poll_interval_ms = Some(ms);
            }
            if let Some(batch) = parts.get(4) {
                let size = batch
                    .parse::<usize>()
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or_else(|| Error::config(format!("invalid batch size '{batch}' in '{item}'")))?;
                spec.batch_size = Some(size);
            }
            specs.push(spec);
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.max_entries(CacheDataType::Candles), Some(5_000));
        assert_eq!(config.cache.ttl(CacheDataType::Candles), Duration::from_secs(86_400));
        assert_eq!(config.cache.hot, HotTierConfig::Memory);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_base_ms, 100);
        assert!(!config.cache.prime_on_bounded_reads);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            Config::from_json_str(r#"{"cache": {"candles": {"ttl_secs": 60, "max_entries": 10}}}"#)
                .unwrap();
        assert_eq!(config.cache.max_entries(CacheDataType::Candles), Some(10));
        assert_eq!(config.cache.ttl(CacheDataType::Candles), Duration::from_secs(60));
        assert_eq!(config.cache.ticker.ttl_secs, 30);
        assert_eq!(config.ingestion.batch_size, 200);
    }

    #[test]
    fn test_per_type_defaults() {
        let cache = CacheConfig::default();
        let table: Vec<(u64, Option<usize>)> = CacheDataType::ALL
            .iter()
            .map(|t| (cache.for_type(*t).ttl_secs, cache.max_entries(*t)))
            .collect();
        assert_eq!(
            table,
            vec![
                (86_400, Some(5_000)),
                (3_600, None),
                (86_400, Some(200)),
                (1_800, None),
                (3_600, Some(1_000)),
                (30, None),
            ]
        );
    }

    #[test]
    fn test_hot_backend_selection() {
        let config = Config::from_json_str(
            r#"{"cache": {"hot": {"backend": "redis", "url": "redis://127.0.0.1:6379/0"}}}"#,
        )
        .unwrap();
        assert_eq!(
            config.cache.hot,
            HotTierConfig::Redis {
                url: "redis://127.0.0.1:6379/0".to_string()
            }
        );
        assert!(Config::from_json_str(r#"{"cache": {"hot": {"backend": "memcached"}}}"#).is_err());
    }

    #[test]
    fn test_parse_stream_list_compact() {
        let specs = StreamSpec::parse_list("okx:BTCUSDT:1s:0.5:50, okx:ETHUSDT:1m").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].poll_interval_ms, Some(500));
        assert_eq!(specs[0].batch_size, Some(50));
        assert_eq!(specs[1].symbol, "ETHUSDT");
        assert_eq!(specs[1].granularity, "1m");
        assert_eq!(specs[1].poll_interval_ms, None);
    }

    #[test]
    fn test_parse_stream_list_json() {
        let specs = StreamSpec::parse_list(
            r#"[{"source": "okx", "symbol": "BTCUSDT", "bar": "1m", "mode": "swap"}]"#,
        )
        .unwrap();
        assert_eq!(specs[0].granularity, "1m");
        assert_eq!(specs[0].mode, MarketMode::Swap);
    }

    #[test]
    fn test_parse_stream_list_defaults_and_errors() {
        let specs = StreamSpec::parse_list("binance").unwrap();
        assert_eq!(specs[0].symbol, "BTCUSDT");
        assert_eq!(specs[0].granularity, "1s");

        assert!(StreamSpec::parse_list("okx:BTCUSDT:1s:fast").is_err());
        assert!(StreamSpec::parse_list("okx:BTCUSDT:1s:1:0").is_err());
    }

    #[test]
    fn test_compact_poll_interval_must_be_positive() {
        for poll in ["-1", "NaN", "inf", "0", "0.0001"] {
            let raw = format!("okx:BTCUSDT:1s:{poll}");
            assert!(StreamSpec::parse_list(&raw).is_err(), "{raw}");
        }
        let specs = StreamSpec::parse_list("okx:BTCUSDT:1s:0.001").unwrap();
        assert_eq!(specs[0].poll_interval_ms, Some(1));
    }

    #[test]
    fn test_json_poll_interval_in_seconds() {
        let specs = StreamSpec::parse_list(
            r#"[{"source": "okx", "symbol": "BTCUSDT", "bar": "1s", "poll_interval": 0.5, "batch_size": 50}]"#,
        )
        .unwrap();
        assert_eq!(specs[0].poll_interval_ms, Some(500));
        assert_eq!(specs[0].batch_size, Some(50));

        let specs =
            StreamSpec::parse_list(r#"[{"source": "okx", "symbol": "BTCUSDT", "poll_interval_ms": 250}]"#)
                .unwrap();
        assert_eq!(specs[0].poll_interval_ms, Some(250));
    }

    #[test]
    fn test_json_poll_interval_rejects_bad_values() {
        for body in [
            r#""poll_interval": -1"#,
            r#""poll_interval": 0"#,
            r#""poll_interval_ms": 0"#,
            r#""poll_interval": 1, "poll_interval_ms": 1000"#,
            r#""batch_size": 0"#,
        ] {
            let raw = format!(r#"[{{"source": "okx", "symbol": "BTCUSDT", {body}}}]"#);
            assert!(StreamSpec::parse_list(&raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn test_stream_spec_serializes_in_milliseconds() {
        let mut spec = StreamSpec::new("okx", "BTCUSDT", "1m");
        spec.poll_interval_ms = Some(750);
        let raw = serde_json::to_string(&spec).unwrap();

        let back: StreamSpec = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, spec);
    }
}
