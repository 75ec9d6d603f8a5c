//! SQLite tick store.
//!
//! One table, created on `open` inside a transaction:
//!
//! | column | type | |
//! |---|---|---|
//! | `id` | INTEGER | autoincrement key |
//! | `timestamp_ms` | INTEGER | exchange time, Unix milliseconds |
//! | `symbol` | TEXT | pair rendered as `PRIMARY-SECONDARY` |
//! | `bid` | TEXT | decimal, exact |
//! | `ask` | TEXT | decimal, exact |
//!
//! Prices are stored as text so no precision is lost on the way to disk.
use std::sync::Mutex;

use fetcher_common::{FetcherError, PAIR_DEFAULT_DELIMITER, Result, Tick, TickStorage};
use log::{debug, info};
use rusqlite::{Connection, params};

/// Name of the tick table.
pub const TABLE_TICKS: &str = "ticks";

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ms INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    bid TEXT NOT NULL,
    ask TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ticks_symbol_time ON ticks(symbol, timestamp_ms);";

const INSERT_SQL: &str = "INSERT INTO ticks (timestamp_ms, symbol, bid, ask) VALUES (?1, ?2, ?3, ?4)";

fn storage_err(e: rusqlite::Error) -> FetcherError {
    FetcherError::Storage(e.to_string())
}

/// `TickStorage` over a single SQLite connection shared by all workers.
#[derive(Debug, Default)]
pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Unopened store.
    pub fn new() -> Self {
        Self::default()
    }

    fn init(conn: &mut Connection) -> Result<()> {
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(storage_err)?;
        debug!("SQLite journal mode: {}", mode);
        let tx = conn.transaction().map_err(storage_err)?;
        tx.execute_batch(SCHEMA_SQL).map_err(storage_err)?;
        tx.commit().map_err(storage_err)
    }

    /// Number of stored ticks for `symbol`.
    pub fn count(&self, symbol: &str) -> Result<u64> {
        let guard = self.conn.lock()?;
        let conn = guard.as_ref().ok_or(FetcherError::StorageNotOpen)?;
        conn.query_row(
            "SELECT COUNT(*) FROM ticks WHERE symbol = ?1",
            params![symbol],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count as u64)
        .map_err(storage_err)
    }
}

impl TickStorage for SqliteStorage {
    fn open(&self, dsn: &str) -> Result<()> {
        let mut conn = Connection::open(dsn).map_err(storage_err)?;
        Self::init(&mut conn)?;
        info!("SQLite storage opened at {}", dsn);
        *self.conn.lock()? = Some(conn);
        Ok(())
    }

    fn write_tick(&self, tick: &Tick) -> Result<()> {
        let guard = self.conn.lock()?;
        let conn = guard.as_ref().ok_or(FetcherError::StorageNotOpen)?;
        let mut stmt = conn.prepare_cached(INSERT_SQL).map_err(storage_err)?;
        stmt.execute(params![
            tick.timestamp().timestamp_millis(),
            tick.pair().render(PAIR_DEFAULT_DELIMITER),
            tick.best_bid().to_string(),
            tick.best_ask().to_string(),
        ])
        .map_err(storage_err)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock()?.take() {
            conn.close().map_err(|(_, e)| storage_err(e))?;
            info!("SQLite storage closed");
        }
        Ok(())
    }
}
