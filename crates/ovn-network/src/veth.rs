//! Veth pair wiring over rtnetlink
//!
//! The host side of a pair is attached to the integration bridge, the
//! container side is handed to the container engine which moves it into
//! the sandbox.

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_core::ErrorMessage;
use netlink_packet_route::link::LinkMessage;
use rtnetlink::{new_connection, Handle};
use tracing::{debug, info, warn};

use crate::error::{netlink_error_message, NetworkError, Result};

const ENODEV: i32 = -19;

/// Host-side link management needed by Join and Leave
#[async_trait]
pub trait VethWiring: Send + Sync {
    /// Create `veth_out`/`veth_in`, give `veth_in` the MAC and bring `veth_out` up
    async fn create_veth_pair(&self, veth_out: &str, veth_in: &str, mac: &str) -> Result<()>;

    /// Delete a link by name
    async fn delete_link(&self, name: &str) -> Result<()>;
}

/// Parse `aa:bb:cc:dd:ee:ff` into raw bytes
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let invalid = || NetworkError::InvalidMac(mac.to_string());
    let mut bytes = [0u8; 6];
    let mut parts = mac.split(':');

    for byte in bytes.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.len() != 2 {
            return Err(invalid());
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(bytes)
}

fn errno(message: &ErrorMessage) -> Option<i32> {
    message.code.map(|c| c.get())
}

fn netlink_failure(step: impl Into<String>, err: rtnetlink::Error) -> NetworkError {
    let code = match &err {
        rtnetlink::Error::NetlinkError(msg) => errno(msg),
        _ => None,
    };
    let message = match code {
        Some(c) => netlink_error_message(c).to_string(),
        None => err.to_string(),
    };
    NetworkError::Netlink {
        step: step.into(),
        code,
        message,
    }
}

/// rtnetlink-backed implementation; opens a fresh netlink connection per call
#[derive(Debug, Default, Clone)]
pub struct NetlinkVeth;

impl NetlinkVeth {
    pub fn new() -> Self {
        Self
    }

    fn connect() -> Result<Handle> {
        let (connection, handle, _) = new_connection()?;
        tokio::spawn(connection);
        Ok(handle)
    }

    async fn link_index(handle: &Handle, name: &str) -> Result<u32> {
        let mut links = handle.link().get().match_name(name.to_string()).execute();
        let link: Option<LinkMessage> = match links.try_next().await {
            Ok(link) => link,
            Err(rtnetlink::Error::NetlinkError(ref msg)) if errno(msg) == Some(ENODEV) => None,
            Err(e) => return Err(netlink_failure(format!("look up link {}", name), e)),
        };
        link.map(|l| l.header.index)
            .ok_or_else(|| NetworkError::LinkNotFound(name.to_string()))
    }

    async fn configure_pair(handle: &Handle, veth_out: &str, veth_in: &str, mac: [u8; 6]) -> Result<()> {
        let in_index = Self::link_index(handle, veth_in).await?;
        handle
            .link()
            .set(in_index)
            .address(mac.to_vec())
            .execute()
            .await
            .map_err(|e| netlink_failure(format!("set hardware address of {}", veth_in), e))?;

        let out_index = Self::link_index(handle, veth_out).await?;
        handle
            .link()
            .set(out_index)
            .up()
            .execute()
            .await
            .map_err(|e| netlink_failure(format!("bring up {}", veth_out), e))?;

        Ok(())
    }

    async fn delete_by_name(handle: &Handle, name: &str) -> Result<()> {
        let index = Self::link_index(handle, name).await?;
        handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| netlink_failure(format!("delete link {}", name), e))
    }
}

#[async_trait]
impl VethWiring for NetlinkVeth {
    async fn create_veth_pair(&self, veth_out: &str, veth_in: &str, mac: &str) -> Result<()> {
        let hw = parse_mac(mac)?;
        let handle = Self::connect()?;

        handle
            .link()
            .add()
            .veth(veth_out.to_string(), veth_in.to_string())
            .execute()
            .await
            .map_err(|e| netlink_failure(format!("create veth pair {}/{}", veth_out, veth_in), e))?;
        debug!("Created veth pair {} <-> {}", veth_out, veth_in);

        if let Err(e) = Self::configure_pair(&handle, veth_out, veth_in, hw).await {
            warn!("Removing veth pair {} after failed setup: {}", veth_out, e);
            if let Err(cleanup) = Self::delete_by_name(&handle, veth_out).await {
                warn!("Failed to remove veth pair {}: {}", veth_out, cleanup);
            }
            return Err(e);
        }

        info!("Veth pair {} <-> {} ready (mac {})", veth_out, veth_in, mac);
        Ok(())
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        let handle = Self::connect()?;
        Self::delete_by_name(&handle, name).await?;
        info!("Deleted link {}", name);
        Ok(())
    }
}
