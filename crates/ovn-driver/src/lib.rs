//! ovn-driver: container network driver backed by OVN
//!
//! This crate provides:
//! - The driver orchestrator behind the network-driver lifecycle calls
//! - A concurrency-safe store of network and endpoint state
//! - A northbound change monitor that merges remotely created networks
//! - Startup reconciliation from the container engine's inventory
//! - Environment-driven configuration

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod inventory;
pub mod monitor;
pub mod naming;
pub mod state;

#[cfg(feature = "testing")]
pub mod testing;

pub use config::{load_environment, DriverConfig, Scope};
pub use driver::{Driver, ReconcileReport, DRIVER_NAME};
pub use error::{DriverError, Result};
pub use inventory::{BollardEngine, ContainerEngine, EngineEndpoint, EngineNetwork, InventoryError};
pub use monitor::ChangeMonitor;
pub use state::{BridgeMode, DriverState, EndpointState, NetworkState, StateStore};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::config::{DriverConfig, Scope};
    pub use super::driver::Driver;
    pub use super::error::DriverError;
    pub use super::inventory::{BollardEngine, ContainerEngine};
    pub use super::monitor::ChangeMonitor;
    pub use super::state::StateStore;
}
