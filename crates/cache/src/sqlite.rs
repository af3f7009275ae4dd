//! SQLite-backed durable tier.
//!
//! Prices and volumes are stored as decimal text so values round-trip
//! exactly. One connection is shared behind a mutex; the database runs in
//! WAL mode so readers in other processes are not blocked by writers.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use gridfeed_core::{CacheKey, CacheRange, Candle, Error, Result, StoreConfig};
use rusqlite::{params, Connection, ErrorCode};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::durable::DurableStore;
use crate::query::{Order, RangeQuery};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS candlestick_cache (
    source TEXT NOT NULL,
    symbol TEXT NOT NULL,
    mode TEXT NOT NULL,
    bar TEXT NOT NULL,
    time INTEGER NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    volume TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source, symbol, mode, bar, time)
);
CREATE INDEX IF NOT EXISTS idx_candlestick_cache_series
    ON candlestick_cache(source, symbol, mode, bar, time);
"#;

const UPSERT: &str = r#"
INSERT INTO candlestick_cache
    (source, symbol, mode, bar, time, open, high, low, close, volume, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(source, symbol, mode, bar, time) DO UPDATE SET
    open = excluded.open,
    high = excluded.high,
    low = excluded.low,
    close = excluded.close,
    volume = excluded.volume,
    updated_at = excluded.updated_at
"#;

/// Map a SQLite failure to the crate error, flagging lock contention.
pub fn store_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            Error::contention(err.to_string())
        }
        _ => Error::store(err.to_string()),
    }
}

/// Durable store in a single SQLite file (or in memory).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_error)?;
        conn.busy_timeout(busy_timeout).map_err(store_error)?;
        // in-memory and read-only databases refuse WAL; the default journal still works
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;") {
            debug!(path = %path.display(), error = %e, "could not enable WAL journal");
        }
        info!(path = %path.display(), "opened durable store");
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_error)?;
        Self::init(conn)
    }

    /// Open the store described by `config`; no path means in memory.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::open(path, Duration::from_millis(config.busy_timeout_ms)),
            None => Self::open_in_memory(),
        }
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(store_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_decimal(raw: &str, column: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| Error::store(format!("invalid {column} value {raw:?}: {e}")))
}

type RawRow = (i64, String, String, String, String, String);

fn row_to_candle(row: RawRow) -> Result<Candle> {
    let (time, open, high, low, close, volume) = row;
    Ok(Candle::new(
        time,
        parse_decimal(&open, "open")?,
        parse_decimal(&high, "high")?,
        parse_decimal(&low, "low")?,
        parse_decimal(&close, "close")?,
        parse_decimal(&volume, "volume")?,
    ))
}

impl DurableStore for SqliteStore {
    fn upsert_many(&self, key: &CacheKey, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(store_error)?;
        {
            let mut stmt = tx.prepare_cached(UPSERT).map_err(store_error)?;
            for c in candles {
                stmt.execute(params![
                    key.source,
                    key.symbol,
                    key.mode.as_str(),
                    key.granularity,
                    c.time,
                    c.open.to_string(),
                    c.high.to_string(),
                    c.low.to_string(),
                    c.close.to_string(),
                    c.volume.to_string(),
                    updated_at,
                ])
                .map_err(store_error)?;
            }
        }
        tx.commit().map_err(store_error)?;
        debug!(key = %key, count = candles.len(), "upserted candles");
        Ok(candles.len())
    }

    fn range_query(&self, key: &CacheKey, query: &RangeQuery) -> Result<Vec<Candle>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let direction = match query.order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };
        let sql = format!(
            "SELECT time, open, high, low, close, volume
             FROM candlestick_cache
             WHERE source = ?1 AND symbol = ?2 AND mode = ?3 AND bar = ?4
               AND time < ?5 AND time > ?6
             ORDER BY time {direction}
             LIMIT ?7"
        );
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&sql).map_err(store_error)?;
        let rows: Vec<RawRow> = stmt
            .query_map(
                params![
                    key.source,
                    key.symbol,
                    key.mode.as_str(),
                    key.granularity,
                    query.before.unwrap_or(i64::MAX),
                    query.after.unwrap_or(i64::MIN),
                    limit,
                ],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .map_err(store_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_error)?;

        rows.into_iter().map(row_to_candle).collect()
    }

    fn aggregate_range(&self, key: &CacheKey) -> Result<CacheRange> {
        let conn = self.lock();
        let (oldest, newest, count): (Option<i64>, Option<i64>, i64) = conn
            .query_row(
                "SELECT MIN(time), MAX(time), COUNT(*)
                 FROM candlestick_cache
                 WHERE source = ?1 AND symbol = ?2 AND mode = ?3 AND bar = ?4",
                params![key.source, key.symbol, key.mode.as_str(), key.granularity],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(store_error)?;
        Ok(CacheRange {
            oldest,
            newest,
            count: u64::try_from(count).unwrap_or(0),
        })
    }
}
