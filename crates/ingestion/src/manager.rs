//! Real-time ingestion manager.
//!
//! Owns one worker thread per stream. Each tick pulls the tail of the
//! stream's live buffer, keeps what has not been persisted yet, and writes it
//! through the orchestrator.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use gridfeed_cache::CacheOrchestrator;
use gridfeed_core::{
    granularity, CacheKey, Clock, Error, IngestionConfig, MarketMode, Result, StreamSpec,
    SystemClock,
};
use gridfeed_sources::{canonical_symbol, LiveBuffer, SourceAdapter, SourceAdapterExt};
use tracing::{debug, error, info, warn};

use crate::stream::{StopFlag, StreamContext, StreamOptions, StreamStatus};

/// Everything one tick needs. Shared by the worker thread and `run_once`.
#[derive(Clone)]
struct StreamRunner {
    key: CacheKey,
    orchestrator: Arc<CacheOrchestrator>,
    buffer: Arc<dyn LiveBuffer>,
    context: Arc<Mutex<StreamContext>>,
    stop: Arc<StopFlag>,
    clock: Arc<dyn Clock>,
    backoff_ceiling: Duration,
}

impl StreamRunner {
    fn context(&self) -> MutexGuard<'_, StreamContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One pull-diff-persist iteration. Returns the number of samples persisted.
    fn tick(&self) -> Result<usize> {
        let (batch_size, last_time, last_signature) = {
            let ctx = self.context();
            (ctx.options.batch_size, ctx.last_time, ctx.last_signature)
        };

        let samples = self
            .buffer
            .get_latest(&self.key.symbol, &self.key.granularity, batch_size);
        let delta = crate::stream::compute_delta(samples, last_time, last_signature);
        if delta.is_empty() {
            return Ok(0);
        }

        match self.orchestrator.persist(&self.key, &delta) {
            Ok(written) => {
                self.context().record_success(&delta, written, self.clock.now());
                debug!(stream = %self.key.stream_key(), count = written, "persisted delta");
                Ok(written)
            }
            Err(e) => {
                self.context().record_failure(e.to_string());
                Err(e)
            }
        }
    }

    /// Worker loop: tick, then wait for the poll interval or the backoff.
    fn run(self) {
        let stream = self.key.stream_key();
        info!(stream = %stream, "stream worker started");
        while !self.stop.is_stopped() {
            let wait = match self.tick() {
                Ok(_) => self.context().options.poll_interval,
                Err(e) => {
                    let ctx = self.context();
                    let wait = ctx
                        .options
                        .backoff(ctx.consecutive_failures, self.backoff_ceiling);
                    warn!(
                        stream = %stream,
                        failures = ctx.consecutive_failures,
                        retry_in_ms = wait.as_millis() as u64,
                        error = %e,
                        "stream tick failed"
                    );
                    wait
                }
            };
            if self.stop.wait_timeout(wait) {
                break;
            }
        }
        info!(stream = %stream, "stream worker stopped");
    }
}

struct Worker {
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }
}

struct StreamEntry {
    runner: StreamRunner,
    worker: Option<Worker>,
}

/// Registry of real-time streams and their workers.
pub struct IngestionManager {
    orchestrator: Arc<CacheOrchestrator>,
    clock: Arc<dyn Clock>,
    config: IngestionConfig,
    streams: Mutex<HashMap<String, StreamEntry>>,
}

impl IngestionManager {
    pub fn new(orchestrator: Arc<CacheOrchestrator>, config: IngestionConfig) -> Self {
        Self {
            orchestrator,
            clock: Arc::new(SystemClock),
            config,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Use `clock` for stream timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Default options for a new stream.
    pub fn default_options(&self) -> StreamOptions {
        StreamOptions::from_config(&self.config)
    }

    /// Register a stream and, unless `options.autostart` is false, spawn its worker.
    ///
    /// `bar` must be a period the adapter serves natively; its live buffer
    /// holds no aggregated periods.
    ///
    /// Calling again for a registered stream is a no-op while its worker is
    /// alive; otherwise the worker is (re)spawned. Returns the stream key.
    pub fn start_stream(
        &self,
        source: &str,
        symbol: &str,
        mode: MarketMode,
        bar: &str,
        options: StreamOptions,
    ) -> Result<String> {
        let adapter = self.orchestrator.registry().require(source)?;
        if !adapter.capability().supports_streaming {
            return Err(Error::StreamingUnsupported(adapter.name().to_string()));
        }
        if !granularity::is_valid(bar) || !adapter.validate_granularity(bar) {
            return Err(Error::unsupported_granularity(adapter.name(), bar));
        }
        let buffer = adapter
            .live_buffer()
            .ok_or_else(|| Error::StreamingUnsupported(adapter.name().to_string()))?;

        let key = CacheKey::new(source, canonical_symbol(symbol), mode, bar);
        let stream_key = key.stream_key();

        let mut streams = self.lock();
        if let Some(entry) = streams.get_mut(&stream_key) {
            if entry.worker.as_ref().is_some_and(Worker::is_alive) {
                debug!(stream = %stream_key, "stream already running");
                return Ok(stream_key);
            }
            if options.autostart {
                entry.runner.context().options = options;
                entry.runner.stop = Arc::new(StopFlag::new());
                entry.worker = Some(spawn_worker(&entry.runner)?);
                info!(stream = %stream_key, "stream restarted");
            }
            return Ok(stream_key);
        }

        let resume_from = match self.orchestrator.get_cache_range(&key) {
            Ok(range) => range.newest,
            Err(e) => {
                warn!(stream = %stream_key, error = %e, "could not read resume point, starting fresh");
                None
            }
        };
        let runner = StreamRunner {
            key: key.clone(),
            orchestrator: self.orchestrator.clone(),
            buffer,
            context: Arc::new(Mutex::new(StreamContext::new(
                key,
                options,
                resume_from,
                self.clock.now(),
            ))),
            stop: Arc::new(StopFlag::new()),
            clock: self.clock.clone(),
            backoff_ceiling: self.config.backoff_ceiling(),
        };
        let worker = if options.autostart {
            Some(spawn_worker(&runner)?)
        } else {
            None
        };
        info!(
            stream = %stream_key,
            resume_from = ?resume_from,
            poll_interval_ms = options.poll_interval.as_millis() as u64,
            batch_size = options.batch_size,
            autostart = options.autostart,
            "stream registered"
        );
        streams.insert(stream_key.clone(), StreamEntry { runner, worker });
        Ok(stream_key)
    }

    /// Start every configured stream; failures are logged and skipped.
    pub fn start_configured(&self, specs: &[StreamSpec]) -> Vec<String> {
        let mut started = Vec::with_capacity(specs.len());
        for spec in specs {
            let options = StreamOptions::for_spec(&self.config, spec);
            match self.start_stream(&spec.source, &spec.symbol, spec.mode, &spec.granularity, options) {
                Ok(key) => started.push(key),
                Err(e) => error!(
                    source = %spec.source,
                    symbol = %spec.symbol,
                    granularity = %spec.granularity,
                    error = %e,
                    "failed to start configured stream"
                ),
            }
        }
        started
    }

    /// Remove a stream and signal its worker.
    ///
    /// With `wait`, blocks until the worker exits, at most about two poll
    /// intervals. Returns whether the worker is known to have exited.
    pub fn stop_stream(&self, stream_key: &str, wait: bool) -> Result<bool> {
        let entry = self
            .lock()
            .remove(stream_key)
            .ok_or_else(|| Error::StreamNotFound(stream_key.to_string()))?;
        entry.runner.stop.stop();
        info!(stream = %stream_key, "stream stop requested");
        Ok(finish(stream_key, entry, wait))
    }

    /// Stop every stream. Returns how many were registered.
    pub fn shutdown(&self, wait: bool) -> usize {
        let entries: Vec<(String, StreamEntry)> = self.lock().drain().collect();
        for (_, entry) in &entries {
            entry.runner.stop.stop();
        }
        let count = entries.len();
        for (stream_key, entry) in entries {
            finish(&stream_key, entry, wait);
        }
        if count > 0 {
            info!(streams = count, "ingestion shut down");
        }
        count
    }

    /// Run one tick of a stream on the calling thread.
    pub fn run_once(&self, stream_key: &str) -> Result<usize> {
        let runner = self
            .lock()
            .get(stream_key)
            .map(|entry| entry.runner.clone())
            .ok_or_else(|| Error::StreamNotFound(stream_key.to_string()))?;
        runner.tick()
    }

    /// Status of every registered stream, sorted by key.
    pub fn list_streams(&self) -> Vec<StreamStatus> {
        let streams = self.lock();
        let mut statuses: Vec<StreamStatus> = streams
            .values()
            .map(|entry| {
                let running = entry.worker.as_ref().is_some_and(Worker::is_alive);
                StreamStatus::new(&entry.runner.context(), running)
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    pub fn stream_status(&self, stream_key: &str) -> Option<StreamStatus> {
        self.lock().get(stream_key).map(|entry| {
            let running = entry.worker.as_ref().is_some_and(Worker::is_alive);
            StreamStatus::new(&entry.runner.context(), running)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamEntry>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for IngestionManager {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

fn spawn_worker(runner: &StreamRunner) -> Result<Worker> {
    let (done_tx, done) = mpsc::channel();
    let runner = runner.clone();
    let thread = std::thread::Builder::new()
        .name(format!("ingest-{}", runner.key.stream_key()))
        .spawn(move || {
            runner.run();
            let _ = done_tx.send(());
        })?;
    Ok(Worker { thread, done })
}

/// Wait for a signalled worker when asked to. Returns whether it has exited.
fn finish(stream_key: &str, entry: StreamEntry, wait: bool) -> bool {
    let Some(worker) = entry.worker else {
        return true;
    };
    if !wait {
        return !worker.is_alive();
    }

    let poll_interval = entry.runner.context().options.poll_interval;
    let bound = poll_interval.saturating_mul(2).max(Duration::from_millis(100));
    match worker.done.recv_timeout(bound) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if worker.thread.join().is_err() {
                error!(stream = %stream_key, "stream worker panicked");
            }
            true
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                stream = %stream_key,
                waited_ms = bound.as_millis() as u64,
                "stream worker did not stop in time"
            );
            false
        }
    }
}
