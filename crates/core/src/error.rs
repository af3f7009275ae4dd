//! Error types for the gridfeed system.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gridfeed system.
#[derive(Error, Debug)]
pub enum Error {
    /// Network or parse failure reported by an external source.
    #[error("Adapter error ({source_name}): {message}")]
    Adapter {
        source_name: String,
        message: String,
    },

    /// Neither an exact nor an aggregatable granularity is available.
    #[error("Unsupported granularity {granularity} for source {source_name}")]
    UnsupportedGranularity {
        source_name: String,
        granularity: String,
    },

    /// Durable tier is locked or busy; the write may succeed if retried.
    #[error("Store contention: {0}")]
    StoreContention(String),

    /// Any other durable tier failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed record.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Hot tier failure.
    #[error("Hot cache error: {0}")]
    HotCache(String),

    /// No adapter registered under this name.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// The adapter offers no live buffer.
    #[error("Source {0} does not support real-time streaming")]
    StreamingUnsupported(String),

    /// No stream registered under this key.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an adapter error.
    pub fn adapter(source: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Adapter {
            source_name: source.into(),
            message: msg.into(),
        }
    }

    /// Create an unsupported granularity error.
    pub fn unsupported_granularity(source: impl Into<String>, granularity: impl Into<String>) -> Self {
        Error::UnsupportedGranularity {
            source_name: source.into(),
            granularity: granularity.into(),
        }
    }

    /// Create a store contention error.
    pub fn contention(msg: impl Into<String>) -> Self {
        Error::StoreContention(msg.into())
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a hot cache error.
    pub fn hot_cache(msg: impl Into<String>) -> Self {
        Error::HotCache(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether retrying the same durable write may succeed.
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::StoreContention(_))
    }

    /// Whether the error came from an external source.
    pub fn is_adapter(&self) -> bool {
        matches!(self, Error::Adapter { .. })
    }
}
