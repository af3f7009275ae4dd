//! Real-time ingestion for the gridfeed system.
//!
//! This crate handles:
//! - Live candle buffers fed by candle updates or raw trades
//! - Per-stream state and delta detection
//! - Worker management for continuously ingested streams

pub mod live_buffer;
pub mod manager;
pub mod stream;

pub use live_buffer::{CandleBuffer, DEFAULT_CAPACITY};
pub use manager::IngestionManager;
pub use stream::{compute_delta, StopFlag, StreamContext, StreamOptions, StreamStatus};
