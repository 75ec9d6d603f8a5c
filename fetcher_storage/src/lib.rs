//!
//! Storage backends implementing the `TickStorage` contract.
//!
//! - `sqlite`: durable table of ticks in a SQLite database file.
//! - `jsonl`: append-only file with one JSON tick per line.
//! - `memory`: in-process buffer for dry runs and tests.
//!
//! [`new`] builds a backend from a [`StorageKind`]; the caller then `open`s it
//! with a backend-specific descriptor.
#![warn(missing_docs)]
use std::sync::Arc;

use clap::ValueEnum;
use fetcher_common::TickStorage;
use strum_macros::{Display, EnumString};

pub mod jsonl;
pub mod memory;
pub mod sqlite;

pub use jsonl::JsonLinesStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Available storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display, EnumString)]
#[value(rename_all = "lower")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StorageKind {
    /// SQLite database; descriptor is a file path or `:memory:`.
    Sqlite,
    /// JSON-lines file; descriptor is a file path.
    Jsonl,
    /// In-process buffer; descriptor is ignored.
    Memory,
}

/// Creates an unopened backend of the given kind.
pub fn new(kind: StorageKind) -> Arc<dyn TickStorage> {
    match kind {
        StorageKind::Sqlite => Arc::new(SqliteStorage::new()),
        StorageKind::Jsonl => Arc::new(JsonLinesStorage::new()),
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
    }
}
