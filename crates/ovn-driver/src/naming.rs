//! Names and addresses derived from network and endpoint ids
//!
//! Everything here is a pure function of its inputs so the same names can
//! be recomputed after a restart without persisted state.

use std::net::Ipv4Addr;

use crate::error::{DriverError, Result};

/// Logical switch name prefix
pub const BRIDGE_PREFIX: &str = "ovnbr-";

/// Interface name prefix inside the container
pub const CONTAINER_IFACE_PREFIX: &str = "eth";

/// Suffix of the container side of a veth pair
pub const VETH_IN_SUFFIX: &str = "_c";

/// Locally administered prefix of generated MACs
pub const MAC_PREFIX: [u8; 2] = [0x7a, 0x42];

/// Leading `n` characters of an id; shorter ids are used whole
pub fn truncate_id(id: &str, n: usize) -> &str {
    id.get(..n).unwrap_or(id)
}

/// Default logical switch name of a network
pub fn bridge_name(network_id: &str) -> String {
    format!("{}{}", BRIDGE_PREFIX, truncate_id(network_id, 5))
}

pub fn logical_port_name(network_id: &str, endpoint_id: &str) -> String {
    format!(
        "br{}-{}",
        truncate_id(network_id, 5),
        truncate_id(endpoint_id, 5)
    )
}

/// `(veth_out, veth_in)` for an endpoint; both fit IFNAMSIZ
pub fn veth_names(endpoint_id: &str) -> (String, String) {
    (
        truncate_id(endpoint_id, 15).to_string(),
        format!("{}{}", truncate_id(endpoint_id, 13), VETH_IN_SUFFIX),
    )
}

/// `7a:42` followed by the four address octets
pub fn make_mac(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        MAC_PREFIX[0], MAC_PREFIX[1], a, b, c, d
    )
}

/// Parse `a.b.c.d/len`
pub fn parse_ipv4_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let invalid = || DriverError::validation(format!("invalid IPv4 CIDR [ {} ]", cidr));

    let (addr, len) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let len: u8 = len.parse().map_err(|_| invalid())?;
    if len > 32 {
        return Err(invalid());
    }
    Ok((addr, len))
}

/// Split a gateway CIDR into address and mask
pub fn split_gateway(gateway: &str) -> Result<(String, String)> {
    if gateway.is_empty() {
        return Err(DriverError::validation("no gateway IP found"));
    }
    match gateway.split_once('/') {
        Some((ip, mask)) if !ip.is_empty() && !mask.is_empty() => {
            Ok((ip.to_string(), mask.to_string()))
        }
        _ => Err(DriverError::validation(format!(
            "cannot split gateway IP address {}",
            gateway
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_name_is_deterministic() {
        assert_eq!(bridge_name("abcde12345"), "ovnbr-abcde");
        assert_eq!(bridge_name("abcde12345"), bridge_name("abcde12345"));
        assert_eq!(bridge_name("abc"), "ovnbr-abc");
    }

    #[test]
    fn test_logical_port_name() {
        assert_eq!(logical_port_name("abcde12345", "fghij67890"), "brabcde-fghij");
    }

    #[test]
    fn test_veth_names() {
        let ep = "0123456789abcdef0123456789abcdef";
        let (out, inner) = veth_names(ep);
        assert_eq!(out, "0123456789abcde");
        assert_eq!(inner, "0123456789abc_c");
        assert!(out.len() <= 15 && inner.len() <= 15);

        let (out, inner) = veth_names("short");
        assert_eq!(out, "short");
        assert_eq!(inner, "short_c");
    }

    #[test]
    fn test_make_mac() {
        assert_eq!(make_mac(Ipv4Addr::new(10, 0, 0, 5)), "7a:42:0a:00:00:05");
        assert_eq!(make_mac(Ipv4Addr::new(192, 168, 1, 254)), "7a:42:c0:a8:01:fe");
    }

    #[test]
    fn test_parse_ipv4_cidr() {
        assert_eq!(
            parse_ipv4_cidr("10.0.0.5/24").unwrap(),
            (Ipv4Addr::new(10, 0, 0, 5), 24)
        );
        for bad in ["10.0.0.5", "fe80::1/64", "10.0.0.5/33", "10.0.0/24", "/24"] {
            assert!(parse_ipv4_cidr(bad).unwrap_err().is_validation(), "{}", bad);
        }
    }

    #[test]
    fn test_split_gateway() {
        assert_eq!(
            split_gateway("10.0.0.1/24").unwrap(),
            ("10.0.0.1".to_string(), "24".to_string())
        );
        assert!(split_gateway("").is_err());
        assert!(split_gateway("10.0.0.1").is_err());
        assert!(split_gateway("10.0.0.1/").is_err());
        assert!(split_gateway("/24").is_err());
    }
}
