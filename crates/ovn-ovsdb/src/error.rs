//! OVSDB error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to an OVSDB server
#[derive(Error, Debug)]
pub enum OvsdbError {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    #[error("Failed to connect to OVSDB at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Invalid OVSDB endpoint '{0}' (expected tcp:HOST:PORT or unix:PATH)")]
    InvalidEndpoint(String),

    #[error("OVSDB connection closed")]
    Closed,

    #[error("OVSDB {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("OVSDB I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("OVSDB error: {0}")]
    Rpc(String),

    #[error("Unexpected OVSDB reply: {0}")]
    Protocol(String),

    // ========================================================================
    // Transaction Errors
    // ========================================================================
    #[error(
        "Number of replies ({received}) should be at least equal to number of operations ({expected})"
    )]
    ReplyCount { expected: usize, received: usize },

    #[error("Transaction failed at operation {index}: {error} (details: {details})")]
    OperationFailed {
        index: usize,
        error: String,
        details: String,
    },

    #[error("Named UUID '{0}' belongs to a different transaction")]
    ForeignNamedUuid(String),
}

impl OvsdbError {
    /// Returns true if the server was reached but rejected the transaction
    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            OvsdbError::ReplyCount { .. } | OvsdbError::OperationFailed { .. }
        )
    }

    /// Returns true if the connection itself is unusable
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            OvsdbError::Connection { .. } | OvsdbError::Closed | OvsdbError::Io(_)
        )
    }
}

/// Result type alias using [`OvsdbError`]
pub type Result<T> = std::result::Result<T, OvsdbError>;
