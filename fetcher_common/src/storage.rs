//! Storage sink contract consumed by delivery workers.
//!
//! The pipeline treats storage as opaque: any backend that can be opened with
//! a connection descriptor, accept one tick at a time, and be closed is
//! interchangeable. Delivery workers for different pairs share one sink, so
//! every method takes `&self` and backends synchronize internally.
use crate::result::Result;
use crate::tick::Tick;

/// Durable destination for normalized ticks.
pub trait TickStorage: Send + Sync {
    /// Opens the backend described by `dsn` (a path, URL or backend-specific string).
    fn open(&self, dsn: &str) -> Result<()>;

    /// Persists a single tick.
    fn write_tick(&self, tick: &Tick) -> Result<()>;

    /// Flushes and releases the backend. Writes after `close` fail.
    fn close(&self) -> Result<()>;
}
