//! Tiered candle cache for the gridfeed system.
//!
//! This crate provides:
//! - The hot tier interface with in-process and Redis implementations
//! - Typed, per-data-type access to the hot tier, including derivative data
//! - The durable tier interface with in-memory and SQLite implementations
//! - The write retry policy
//! - The cache orchestrator combining both tiers with the source registry

pub mod derivative;
pub mod durable;
pub mod hot;
pub mod orchestrator;
pub mod query;
pub mod redis_hot;
pub mod retry;
pub mod sqlite;
pub mod tier;

pub use derivative::DerivativeCache;
pub use durable::{DurableStore, MemoryStore};
pub use hot::{open_hot_cache, HotCache, MemoryHotCache};
pub use orchestrator::{CacheOrchestrator, FetchStrategy, Lookup};
pub use query::{Order, RangeQuery};
pub use retry::RetryPolicy;
pub use redis_hot::RedisHotCache;
pub use sqlite::SqliteStore;
pub use tier::{HotStats, HotTier};
