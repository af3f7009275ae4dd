//! Conversion between canonical and source-native forms.
//!
//! Canonical forms: symbols are upper case with no separator (`BTCUSDT`),
//! granularities use the names of [`gridfeed_core::granularity`], timestamps
//! are Unix seconds.

use serde::{Deserialize, Serialize};

/// Quote assets recognized when splitting a concatenated symbol, longest first.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH"];

/// Native symbol layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolFormat {
    /// `BTCUSDT`
    Concatenated,
    /// `BTC-USDT`, `BTC/USD`
    Separated(char),
    /// `btcusdt`
    Lowercase,
}

/// Unit of native timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

/// Canonical form of a user-supplied symbol: `btc-usdt` becomes `BTCUSDT`.
pub fn canonical_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | '/' | '_' | ' '))
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Split a concatenated upper-case symbol into base and quote.
///
/// Returns an empty quote when no known quote suffix leaves a non-empty base.
pub fn split_symbol(symbol: &str) -> (&str, &str) {
    for quote in KNOWN_QUOTES {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return (base, &symbol[base.len()..]);
            }
        }
    }
    (symbol, "")
}

/// A request expressed in source-native units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRequest {
    pub symbol: String,
    pub granularity: String,
    pub timestamp: Option<i64>,
}

/// Pure, reversible conversions for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    format: SymbolFormat,
    time_unit: TimeUnit,
    /// (canonical asset, native asset)
    asset_aliases: Vec<(String, String)>,
    /// (canonical granularity, native granularity)
    granularities: Vec<(String, String)>,
}

impl Normalizer {
    pub fn new(format: SymbolFormat) -> Self {
        Self {
            format,
            time_unit: TimeUnit::Seconds,
            asset_aliases: Vec::new(),
            granularities: Vec::new(),
        }
    }

    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    /// Rename an asset on the source side (e.g. `BTC` -> `XBT`).
    pub fn with_asset_alias(mut self, canonical: &str, native: &str) -> Self {
        self.asset_aliases
            .push((canonical.to_ascii_uppercase(), native.to_ascii_uppercase()));
        self
    }

    /// Map a canonical granularity to its native name.
    pub fn with_granularity(mut self, canonical: &str, native: &str) -> Self {
        self.granularities.push((canonical.to_string(), native.to_string()));
        self
    }

    /// Map several granularities at once.
    pub fn with_granularities(self, pairs: &[(&str, &str)]) -> Self {
        pairs
            .iter()
            .fold(self, |n, (canonical, native)| n.with_granularity(canonical, native))
    }

    pub fn format(&self) -> SymbolFormat {
        self.format
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Convert symbol, granularity and timestamp in one call.
    pub fn normalize(&self, symbol: &str, granularity: &str, timestamp: Option<i64>) -> NativeRequest {
        NativeRequest {
            symbol: self.symbol(symbol),
            granularity: self.granularity(granularity),
            timestamp: timestamp.map(|ts| self.timestamp(ts)),
        }
    }

    /// Canonical symbol to native symbol.
    pub fn symbol(&self, canonical: &str) -> String {
        let canonical = canonical_symbol(canonical);
        let (base, quote) = split_symbol(&canonical);
        let base = self.alias_out(base);
        let quote = self.alias_out(quote);
        match self.format {
            SymbolFormat::Concatenated => format!("{base}{quote}"),
            SymbolFormat::Separated(sep) if !quote.is_empty() => format!("{base}{sep}{quote}"),
            SymbolFormat::Separated(_) => base,
            SymbolFormat::Lowercase => format!("{base}{quote}").to_ascii_lowercase(),
        }
    }

    /// Native symbol to canonical symbol.
    pub fn denormalize_symbol(&self, native: &str) -> String {
        let upper = native.to_ascii_uppercase();
        let (base, quote) = match self.format {
            SymbolFormat::Separated(sep) => match upper.split_once(sep) {
                Some((base, quote)) => (base.to_string(), quote.to_string()),
                None => (upper.clone(), String::new()),
            },
            SymbolFormat::Concatenated | SymbolFormat::Lowercase => self.split_native(&upper),
        };
        format!("{}{}", self.alias_in(&base), self.alias_in(&quote))
    }

    /// Canonical granularity to native granularity.
    pub fn granularity(&self, canonical: &str) -> String {
        self.granularities
            .iter()
            .find(|(c, _)| c == canonical)
            .map(|(_, n)| n.clone())
            .unwrap_or_else(|| canonical.to_string())
    }

    /// Native granularity to canonical granularity.
    pub fn denormalize_granularity(&self, native: &str) -> String {
        self.granularities
            .iter()
            .find(|(_, n)| n == native)
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| native.to_string())
    }

    /// Seconds to native timestamp.
    pub fn timestamp(&self, secs: i64) -> i64 {
        match self.time_unit {
            TimeUnit::Seconds => secs,
            TimeUnit::Milliseconds => secs.saturating_mul(1_000),
        }
    }

    /// Native timestamp to seconds.
    pub fn denormalize_timestamp(&self, native: i64) -> i64 {
        match self.time_unit {
            TimeUnit::Seconds => native,
            TimeUnit::Milliseconds => native.div_euclid(1_000),
        }
    }

    fn alias_out(&self, asset: &str) -> String {
        self.asset_aliases
            .iter()
            .find(|(c, _)| c == asset)
            .map(|(_, n)| n.clone())
            .unwrap_or_else(|| asset.to_string())
    }

    fn alias_in(&self, asset: &str) -> String {
        self.asset_aliases
            .iter()
            .find(|(_, n)| n == asset)
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| asset.to_string())
    }

    /// Split a native concatenated symbol, trying aliased quote names too.
    fn split_native(&self, native: &str) -> (String, String) {
        for (_, alias) in &self.asset_aliases {
            if let Some(base) = native.strip_suffix(alias.as_str()) {
                if !base.is_empty() && split_symbol(base).1.is_empty() {
                    return (base.to_string(), alias.clone());
                }
            }
        }
        let (base, quote) = split_symbol(native);
        (base.to_string(), quote.to_string())
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(SymbolFormat::Concatenated)
    }
}
