//! Errors surfaced by the aggregation engine
//!
//! The data path itself never fails: reads either resolve or stay pending.
//! These variants cover validation at the ingestion boundary and parsing of
//! identifiers handed in by the transport.

use thiserror::Error;

/// Errors from feed operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

/// Result alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;
