//! Error types for northbound, vswitch and veth operations
//!
//! Every variant carries enough context to tell which object was involved,
//! and [`NetworkError::suggestion`] gives the operator a next step.

use ovn_ovsdb::OvsdbError;
use thiserror::Error;

/// Errors raised by the network layer
#[derive(Error, Debug)]
pub enum NetworkError {
    // ========================================================================
    // OVSDB Errors
    // ========================================================================
    #[error(transparent)]
    Ovsdb(#[from] OvsdbError),

    #[error("Logical switch '{0}' creation failed - not found after creation")]
    BridgeNotCreated(String),

    #[error("Logical switch '{name}' still has {ports} port(s) attached")]
    SwitchInUse { name: String, ports: usize },

    #[error("Logical switch '{0}' not found")]
    SwitchNotFound(String),

    #[error("Bridge '{0}' not found")]
    BridgeNotFound(String),

    #[error("Port '{0}' not found")]
    PortNotFound(String),

    // ========================================================================
    // Netlink Errors
    // ========================================================================
    #[error("Invalid MAC address '{0}'")]
    InvalidMac(String),

    #[error("Link '{0}' not found")]
    LinkNotFound(String),

    #[error("Failed to {step}: {message}")]
    Netlink {
        step: String,
        code: Option<i32>,
        message: String,
    },

    #[error("Netlink socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Get a helpful suggestion for resolving this error
    pub fn suggestion(&self) -> &'static str {
        match self {
            NetworkError::Ovsdb(e) if e.is_connection() => {
                "Check that ovsdb-server is running and the endpoint is reachable"
            }
            NetworkError::SwitchInUse { .. } => "Remove the remaining endpoints first",
            NetworkError::BridgeNotFound(_) => {
                "Create the integration bridge: ovs-vsctl add-br br-int"
            }
            NetworkError::InvalidMac(_) => "Use the form aa:bb:cc:dd:ee:ff",
            NetworkError::Netlink { code: Some(-17), .. } => {
                "A stale link with the same name exists; delete it with ip link del"
            }
            e if e.needs_root() => "Run as root or with CAP_NET_ADMIN",
            _ => "Check system logs for more details",
        }
    }

    /// Returns true if this error might be resolved by running as root
    pub fn needs_root(&self) -> bool {
        matches!(
            self,
            NetworkError::Netlink {
                code: Some(-1) | Some(-13),
                ..
            }
        )
    }

    /// Returns true if the object the operation targeted does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NetworkError::SwitchNotFound(_)
                | NetworkError::BridgeNotFound(_)
                | NetworkError::PortNotFound(_)
                | NetworkError::LinkNotFound(_)
                | NetworkError::Netlink {
                    code: Some(-19),
                    ..
                }
        )
    }
}

/// Map netlink error codes to descriptive messages
pub fn netlink_error_message(code: i32) -> &'static str {
    match code {
        -1 => "Operation not permitted (EPERM)",
        -2 => "No such file or directory (ENOENT)",
        -12 => "Out of memory (ENOMEM)",
        -13 => "Permission denied (EACCES)",
        -16 => "Device or resource busy (EBUSY)",
        -17 => "File exists (EEXIST)",
        -19 => "No such device (ENODEV)",
        -22 => "Invalid argument (EINVAL)",
        -34 => "Numerical result out of range (ERANGE)",
        -95 => "Operation not supported (ENOTSUP)",
        _ => "Unknown error",
    }
}

/// Result type alias using [`NetworkError`]
pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn netlink(code: i32) -> NetworkError {
        NetworkError::Netlink {
            step: "create veth pair".to_string(),
            code: Some(code),
            message: netlink_error_message(code).to_string(),
        }
    }

    #[test]
    fn test_needs_root() {
        assert!(netlink(-1).needs_root());
        assert!(netlink(-13).needs_root());
        assert!(!netlink(-17).needs_root());
        assert!(!NetworkError::PortNotFound("p".into()).needs_root());
    }

    #[test]
    fn test_is_not_found() {
        assert!(netlink(-19).is_not_found());
        assert!(NetworkError::PortNotFound("p".into()).is_not_found());
        assert!(!netlink(-17).is_not_found());
        assert!(!NetworkError::Ovsdb(OvsdbError::Closed).is_not_found());
    }

    #[test]
    fn test_netlink_message() {
        let msg = netlink(-17).to_string();
        assert!(msg.contains("create veth pair"));
        assert!(msg.contains("EEXIST"));
        assert!(netlink_error_message(-1).contains("EPERM"));
    }

    #[test]
    fn test_suggestions() {
        assert!(netlink(-17).suggestion().contains("ip link del"));
        assert!(netlink(-1).suggestion().contains("root"));
        assert!(NetworkError::Ovsdb(OvsdbError::Closed)
            .suggestion()
            .contains("ovsdb-server"));
    }
}
