//!
//! Common types shared by the feed, the storage backends and the binaries.
//!
//! This crate aggregates:
//! - `error`: unified error type `FetcherError` used across the workspace.
//! - `result`: handy `Result<T, FetcherError>` alias.
//! - `currency`: validated currency symbols.
//! - `pair`: trading pairs, rendering and the pairs-file parser.
//! - `tick`: the canonical `Tick` and the `FeedQuote` normalization contract.
//! - `storage`: the `TickStorage` sink contract.
#![warn(missing_docs)]
pub mod currency;
pub mod error;
pub mod pair;
pub mod result;
pub mod storage;
pub mod tick;

pub use currency::Currency;
pub use error::FetcherError;
pub use pair::{PAIR_DEFAULT_DELIMITER, Pair, PairParser};
pub use result::Result;
pub use storage::TickStorage;
pub use tick::{FeedQuote, Tick};
