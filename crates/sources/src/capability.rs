//! Static description of what a source offers.

use serde::{Deserialize, Serialize};

use crate::normalize::SymbolFormat;

/// Kind of external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Trading venue.
    Exchange,
    /// Data aggregator.
    Aggregator,
    /// Charting tool.
    Charting,
}

/// Descriptive information about a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Unique lower-case identifier (e.g., "okx").
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    pub description: String,
    pub source_type: SourceType,
    pub website: Option<String>,
    /// Requests must go through a proxy.
    pub requires_proxy: bool,
}

impl SourceMetadata {
    /// Exchange metadata with empty descriptive fields.
    pub fn exchange(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            display_name: display_name.into(),
            description: String::new(),
            source_type: SourceType::Exchange,
            website: None,
            requires_proxy: false,
        }
    }
}

/// What a source can serve. Immutable per adapter instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCapability {
    /// Natively supported granularities, in declaration order.
    pub granularities: Vec<String>,
    /// Maximum candles returned by a single fetch.
    pub max_candles_per_fetch: usize,
    pub supports_ticker: bool,
    /// Source feeds a live buffer.
    pub supports_streaming: bool,
    /// Native symbol layout.
    pub symbol_format: SymbolFormat,
    /// Canonical symbols served; empty means unrestricted.
    pub supported_symbols: Vec<String>,
    pub rate_limit_per_minute: Option<u32>,
    pub requires_proxy: bool,
}

impl SourceCapability {
    /// Capability serving the given granularities.
    pub fn with_granularities<S: Into<String>>(granularities: impl IntoIterator<Item = S>) -> Self {
        Self {
            granularities: granularities.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether `granularity` is served without aggregation.
    pub fn supports_granularity(&self, granularity: &str) -> bool {
        self.granularities.iter().any(|g| g == granularity)
    }

    /// Whether `symbol` (canonical form) may be requested.
    pub fn supports_symbol(&self, symbol: &str) -> bool {
        self.supported_symbols.is_empty() || self.supported_symbols.iter().any(|s| s == symbol)
    }
}

impl Default for SourceCapability {
    fn default() -> Self {
        Self {
            granularities: Vec::new(),
            max_candles_per_fetch: 100,
            supports_ticker: true,
            supports_streaming: false,
            symbol_format: SymbolFormat::Concatenated,
            supported_symbols: Vec::new(),
            rate_limit_per_minute: None,
            requires_proxy: false,
        }
    }
}
