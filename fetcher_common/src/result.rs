//! Result type alias shared across the workspace.
//!
//! Defaults the error type to `FetcherError`, so functions can simply return
//! `Result<T>`.
use crate::error::FetcherError;

/// Workspace-wide `Result` alias with `FetcherError` as the default error.
pub type Result<T, E = FetcherError> = std::result::Result<T, E>;
