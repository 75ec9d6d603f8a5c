//! Append-only JSON-lines tick file.
//!
//! Each tick becomes one line:
//! `{"timestamp":"2019-01-05T13:01:12.354Z","pair":"BTC-USD","best_bid":"3700.01","best_ask":"3700.02"}`.
//! Lines are flushed per tick so a crash loses at most the tick being written.
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;

use fetcher_common::{FetcherError, Result, Tick, TickStorage};
use log::info;

/// `TickStorage` appending to a file.
#[derive(Debug, Default)]
pub struct JsonLinesStorage {
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonLinesStorage {
    /// Unopened store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TickStorage for JsonLinesStorage {
    fn open(&self, dsn: &str) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(dsn)?;
        info!("JSON-lines storage opened at {}", dsn);
        *self.writer.lock()? = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_tick(&self, tick: &Tick) -> Result<()> {
        let mut guard = self.writer.lock()?;
        let writer = guard.as_mut().ok_or(FetcherError::StorageNotOpen)?;
        serde_json::to_writer(&mut *writer, tick)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock()?.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fetcher_common::Pair;
    use rust_decimal::Decimal;
    use serde_json::Value;

    #[test]
    fn appends_one_line_per_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks.jsonl");
        let dsn = path.to_str().unwrap();
        let tick = Tick::new(
            Utc.with_ymd_and_hms(2019, 1, 5, 13, 1, 12).unwrap(),
            Pair::new("btc", "usd").unwrap(),
            Decimal::new(370_001, 2),
            Decimal::new(370_002, 2),
        )
        .unwrap();

        let storage = JsonLinesStorage::new();
        assert!(matches!(storage.write_tick(&tick), Err(FetcherError::StorageNotOpen)));
        storage.open(dsn).unwrap();
        storage.write_tick(&tick).unwrap();
        storage.close().unwrap();
        storage.open(dsn).unwrap();
        storage.write_tick(&tick).unwrap();
        storage.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["pair"], "BTC-USD");
        assert_eq!(lines[0]["best_bid"], "3700.01");
        assert_eq!(lines[0]["best_ask"], "3700.02");
        assert_eq!(lines[0]["timestamp"], "2019-01-05T13:01:12Z");
    }
}
