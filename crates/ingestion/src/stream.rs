//! Per-stream state and delta detection.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gridfeed_core::{CacheKey, Candle, IngestionConfig, Signature, StreamSpec, TimestampSecs};
use serde::Serialize;

/// Per-stream tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Delay between ticks when the last one succeeded.
    pub poll_interval: Duration,
    /// Samples pulled from the live buffer per tick.
    pub batch_size: usize,
    /// Spawn a worker. When false the stream only advances through `run_once`.
    pub autostart: bool,
}

impl StreamOptions {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size,
            autostart: true,
        }
    }

    /// Defaults from `config`, overridden by what `spec` sets.
    pub fn for_spec(config: &IngestionConfig, spec: &StreamSpec) -> Self {
        let mut options = Self::from_config(config);
        if let Some(ms) = spec.poll_interval_ms {
            options.poll_interval = Duration::from_millis(ms);
        }
        if let Some(batch) = spec.batch_size {
            options.batch_size = batch;
        }
        options.autostart = config.auto_start;
        options
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Wait after a failed tick: `min(ceiling, poll_interval * (1 + failures))`.
    pub fn backoff(&self, failures: u32, ceiling: Duration) -> Duration {
        self.poll_interval
            .saturating_mul(failures.saturating_add(1))
            .min(ceiling)
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

/// Mutable state of one stream.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub key: CacheKey,
    pub options: StreamOptions,
    /// Time of the newest persisted sample.
    pub last_time: Option<TimestampSecs>,
    /// Signature of the newest persisted sample.
    pub last_signature: Option<Signature>,
    pub consecutive_failures: u32,
    pub total_persisted: u64,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_persist_at: Option<DateTime<Utc>>,
}

impl StreamContext {
    pub fn new(
        key: CacheKey,
        options: StreamOptions,
        resume_from: Option<TimestampSecs>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            options,
            last_time: resume_from,
            last_signature: None,
            consecutive_failures: 0,
            total_persisted: 0,
            last_error: None,
            started_at: now,
            last_persist_at: None,
        }
    }

    /// Samples not yet persisted: newer than `last_time`, or at `last_time`
    /// with a different signature.
    pub fn delta(&self, samples: Vec<Candle>) -> Vec<Candle> {
        compute_delta(samples, self.last_time, self.last_signature)
    }

    /// Advance past a persisted delta. `persisted` is the count the store
    /// accepted, which can be lower than `delta.len()`.
    pub fn record_success(&mut self, delta: &[Candle], persisted: usize, now: DateTime<Utc>) {
        if let Some(last) = delta.last() {
            self.last_time = Some(last.time);
            self.last_signature = Some(last.signature());
        }
        self.consecutive_failures = 0;
        self.total_persisted += persisted as u64;
        self.last_error = None;
        self.last_persist_at = Some(now);
    }

    pub fn record_failure(&mut self, error: String) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
    }
}

/// Sort samples ascending, keep the last of each time, and drop what has
/// already been persisted.
pub fn compute_delta(
    mut samples: Vec<Candle>,
    last_time: Option<TimestampSecs>,
    last_signature: Option<Signature>,
) -> Vec<Candle> {
    // stable sort keeps arrival order within one time
    samples.sort_by_key(|c| c.time);
    let mut unique: Vec<Candle> = Vec::with_capacity(samples.len());
    for candle in samples {
        match unique.last_mut() {
            Some(prev) if prev.time == candle.time => *prev = candle,
            _ => unique.push(candle),
        }
    }

    let Some(last_time) = last_time else {
        return unique;
    };
    unique
        .into_iter()
        .filter(|c| {
            c.time > last_time
                || (c.time == last_time && last_signature != Some(c.signature()))
        })
        .collect()
}

/// Reporting view of a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub key: String,
    pub source: String,
    pub symbol: String,
    pub mode: String,
    pub granularity: String,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// A worker thread is alive.
    pub running: bool,
    pub last_time: Option<TimestampSecs>,
    pub consecutive_failures: u32,
    pub total_persisted: u64,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_persist_at: Option<DateTime<Utc>>,
}

impl StreamStatus {
    pub fn new(context: &StreamContext, running: bool) -> Self {
        let key = &context.key;
        Self {
            key: key.stream_key(),
            source: key.source.clone(),
            symbol: key.symbol.clone(),
            mode: key.mode.to_string(),
            granularity: key.granularity.clone(),
            poll_interval_ms: context.options.poll_interval.as_millis() as u64,
            batch_size: context.options.batch_size,
            running,
            last_time: context.last_time,
            consecutive_failures: context.consecutive_failures,
            total_persisted: context.total_persisted,
            last_error: context.last_error.clone(),
            started_at: context.started_at,
            last_persist_at: context.last_persist_at,
        }
    }
}

/// Cooperative stop signal a worker can wait on.
#[derive(Debug, Default)]
pub struct StopFlag {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake any waiter.
    pub fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout` for the flag. Returns whether it is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}
