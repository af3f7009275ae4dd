//! Core types and configuration for the gridfeed system.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (candles, ticker snapshots, cache keys)
//! - Derivative records (funding rates, contract basis)
//! - The granularity table
//! - Configuration structures
//! - Common error types
//! - Clock and logging helpers

pub mod clock;
pub mod config;
pub mod derivative;
pub mod error;
pub mod granularity;
pub mod logging;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    poll_interval_from_secs, CacheConfig, Config, DataTypeConfig, HotTierConfig, IngestionConfig,
    RetryConfig, StoreConfig, StreamSpec,
};
pub use derivative::{ContractBasis, DerivativeKey, FundingRate, DEFAULT_CONTRACT_TYPE};
pub use error::{Error, Result};
pub use types::*;
