//! In-process tick buffer.
use std::sync::Mutex;

use fetcher_common::{FetcherError, Result, Tick, TickStorage};

#[derive(Debug, Default)]
struct Buffer {
    open: bool,
    ticks: Vec<Tick>,
}

/// Keeps written ticks in memory, in write order.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buffer: Mutex<Buffer>,
}

impl MemoryStorage {
    /// Unopened buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far; stays readable after `close`.
    pub fn ticks(&self) -> Result<Vec<Tick>> {
        Ok(self.buffer.lock()?.ticks.clone())
    }

    /// Snapshot of the ticks written for `pair` (rendered with the default delimiter).
    pub fn ticks_for(&self, pair: &str) -> Result<Vec<Tick>> {
        Ok(self
            .ticks()?
            .into_iter()
            .filter(|tick| tick.pair().to_string() == pair)
            .collect())
    }
}

impl TickStorage for MemoryStorage {
    fn open(&self, _dsn: &str) -> Result<()> {
        self.buffer.lock()?.open = true;
        Ok(())
    }

    fn write_tick(&self, tick: &Tick) -> Result<()> {
        let mut buffer = self.buffer.lock()?;
        if !buffer.open {
            return Err(FetcherError::StorageNotOpen);
        }
        buffer.ticks.push(tick.clone());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.buffer.lock()?.open = false;
        Ok(())
    }
}
