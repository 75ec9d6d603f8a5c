//! Error types shared across the workspace.
//!
//! `FetcherError` groups every failure the pipeline can report: symbol
//! validation, wire decoding, normalization, session setup and transport,
//! and storage. Decode and validation variants are expected at runtime and
//! are recovered locally by the read loop; setup and transport variants are
//! surfaced to whoever drives the stream client.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by the feed, storage and binaries.
#[derive(Error, Debug)]
pub enum FetcherError {
    /// Currency symbol shorter than the two character floor.
    #[error("bad symbol: {0:?}")]
    InvalidSymbol(String),

    /// Payload is not a JSON object or carries a non-string `type`.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope has no `type` discriminator, or it is empty.
    #[error("message has no type")]
    MissingType,

    /// Quote frame does not have the expected structure.
    #[error("malformed quote: {0}")]
    MalformedQuote(String),

    /// Product identifier does not split into exactly two non-empty parts.
    #[error("invalid product id {product_id:?}: expected PRIMARY{delimiter}SECONDARY")]
    InvalidProductId {
        /// Raw product identifier as received.
        product_id: String,
        /// Delimiter the feed uses between the two legs.
        delimiter: char,
    },

    /// Price field could not be parsed as a finite decimal.
    #[error("failed to convert {field} to decimal: {value:?}")]
    InvalidNumeric {
        /// Wire field name (`best_bid`, `best_ask`).
        field: &'static str,
        /// Raw value as received.
        value: String,
    },

    /// Price parsed but is zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositivePrice {
        /// Quote accessor that produced the value.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The quote was well formed but could not become a valid tick.
    #[error("failed to normalize quote: {0}")]
    NormalizationFailed(#[source] Box<FetcherError>),

    /// Pairs or channels are missing from the client configuration.
    #[error("setup incomplete: {0}")]
    SetupIncomplete(String),

    /// Dialing the feed endpoint failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Sending the subscription request failed.
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// Transport failure while the session is open.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation called in a state that does not allow it.
    #[error("invalid state: expected {expected}, client is {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: String,
        /// State the client is actually in.
        actual: String,
    },

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Storage used before `open` or after `close`.
    #[error("storage is not open")]
    StorageNotOpen,

    /// I/O error originating from the standard library or files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Error while parsing the pairs file into `Pair` values.
    #[error("parse pairs file error: {0}")]
    ParsePairsFile(String),

    /// Channel send failed because the receiving side is gone.
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// A poisoned mutex was encountered.
    #[error("mutex lock poisoned: {0}")]
    MutexLock(String),
}

impl FetcherError {
    /// True for failures caused by a single bad inbound message.
    ///
    /// These never terminate a session; the offending frame is skipped.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            FetcherError::MalformedEnvelope(_)
                | FetcherError::MissingType
                | FetcherError::MalformedQuote(_)
                | FetcherError::InvalidProductId { .. }
                | FetcherError::InvalidNumeric { .. }
                | FetcherError::NormalizationFailed(_)
        )
    }
}

impl<T> From<PoisonError<T>> for FetcherError {
    fn from(err: PoisonError<T>) -> Self {
        FetcherError::MutexLock(err.to_string())
    }
}
