//! Source adapters for the gridfeed system.
//!
//! This crate provides:
//! - The adapter contract and its canonical-unit wrapper
//! - Source capabilities and metadata
//! - Symbol, granularity and timestamp normalization
//! - Candle aggregation for unsupported periods
//! - The source registry
//! - An in-memory adapter

pub mod adapter;
pub mod aggregate;
pub mod capability;
pub mod normalize;
pub mod registry;
pub mod static_source;

pub use adapter::{LiveBuffer, SourceAdapter, SourceAdapterExt};
pub use aggregate::{aggregate_candles, take_last};
pub use capability::{SourceCapability, SourceMetadata, SourceType};
pub use normalize::{canonical_symbol, split_symbol, NativeRequest, Normalizer, SymbolFormat, TimeUnit};
pub use registry::SourceRegistry;
pub use static_source::StaticSource;
