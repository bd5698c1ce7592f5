//! Error types for driver lifecycle operations

use ovn_network::NetworkError;
use thiserror::Error;

use crate::inventory::InventoryError;

/// Errors surfaced to the caller of a lifecycle operation
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Transaction {
        context: String,
        #[source]
        source: NetworkError,
    },

    #[error("{context}: {source}")]
    HostOperation {
        context: String,
        #[source]
        source: NetworkError,
    },

    #[error("{context}: {source}")]
    Inventory {
        context: String,
        #[source]
        source: InventoryError,
    },
}

/// Result type alias using [`DriverError`]
pub type Result<T> = std::result::Result<T, DriverError>;

impl DriverError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        DriverError::Connection(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        DriverError::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        DriverError::NotFound(msg.into())
    }

    /// Wrap an OVSDB-level failure
    pub fn transaction(context: impl Into<String>, source: NetworkError) -> Self {
        DriverError::Transaction {
            context: context.into(),
            source,
        }
    }

    /// Wrap a netlink failure
    pub fn host(context: impl Into<String>, source: NetworkError) -> Self {
        DriverError::HostOperation {
            context: context.into(),
            source,
        }
    }

    pub fn inventory(context: impl Into<String>, source: InventoryError) -> Self {
        DriverError::Inventory {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, DriverError::Validation(_))
    }
}
