//! ovn-network: OVN and Open vSwitch plumbing for container networks
//!
//! This crate provides:
//! - A northbound client for logical switches and logical switch ports
//! - A local Open vSwitch client that attaches veths to the integration bridge
//! - Native rtnetlink veth pair creation and removal

pub mod error;
pub mod northbound;
pub mod veth;
pub mod vswitch;

#[cfg(test)]
mod test_support;

pub use error::{NetworkError, Result};
pub use northbound::{NorthboundClient, OvnNorthbound, NB_DB};
pub use veth::{parse_mac, NetlinkVeth, VethWiring};
pub use vswitch::{LocalVswitch, OvsClient, OVS_DB};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::error::NetworkError;
    pub use super::northbound::{NorthboundClient, OvnNorthbound};
    pub use super::veth::{NetlinkVeth, VethWiring};
    pub use super::vswitch::{LocalVswitch, OvsClient};
}
