//! ovn-ovsdb: native OVSDB (RFC 7047) client
//!
//! This crate provides:
//! - JSON-RPC 1.0 framing for OVSDB connections (tcp or unix socket)
//! - A persistent client with per-request timeouts, echo handling and
//!   `monitor` subscriptions
//! - A transaction builder with transaction-scoped named UUIDs
//! - Reply validation for `transact` results
//! - A per-table row cache fed by table-update notifications

pub mod cache;
pub mod client;
pub mod datum;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod reply;
pub mod transaction;

pub use cache::{Row, RowCache, RowUpdate, TableUpdates};
pub use client::{OvsdbClient, Subscription, DEFAULT_TIMEOUT};
pub use endpoint::{Endpoint, RetryPolicy};
pub use error::{OvsdbError, Result};
pub use reply::OperationResult;
pub use transaction::{Condition, Mutation, NamedUuid, Operation, Transaction};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::cache::{Row, RowCache, TableUpdates};
    pub use super::client::{OvsdbClient, Subscription};
    pub use super::datum;
    pub use super::endpoint::{Endpoint, RetryPolicy};
    pub use super::transaction::{Condition, Mutation, Transaction};
}
