//! In-memory network and endpoint state
//!
//! [`StateStore`] is the single source of truth shared by request handlers
//! and the change monitor. Both maps live behind one lock; sequences that
//! read then write the same id take the lock once. The lock is never held
//! across an OVSDB or netlink call.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{DriverError, Result};

pub const DEFAULT_MTU: u32 = 1500;

/// How a network reaches the outside world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    #[default]
    Nat,
    Flat,
}

impl BridgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMode::Nat => "nat",
            BridgeMode::Flat => "flat",
        }
    }
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nat" => Ok(BridgeMode::Nat),
            "flat" => Ok(BridgeMode::Flat),
            other => Err(DriverError::validation(format!(
                "{} is not a valid mode",
                other
            ))),
        }
    }
}

/// One logical network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkState {
    pub id: String,
    pub bridge_name: String,
    pub mtu: u32,
    pub mode: BridgeMode,
    pub gateway: String,
    pub gateway_mask: String,
    pub flat_bind_interface: Option<String>,
}

impl NetworkState {
    /// A network known only by id and switch name (restart or remote creation)
    pub fn synthesized(id: impl Into<String>, bridge_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bridge_name: bridge_name.into(),
            mtu: DEFAULT_MTU,
            mode: BridgeMode::default(),
            gateway: String::new(),
            gateway_mask: String::new(),
            flat_bind_interface: None,
        }
    }
}

/// One container attachment point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointState {
    pub network_id: String,
    pub logical_port_name: String,
    /// IPv4 CIDR as supplied by the caller
    pub addr: String,
    pub mac: String,
    pub veth_out: Option<String>,
    pub veth_in: Option<String>,
}

#[derive(Debug, Default)]
pub struct DriverState {
    pub networks: HashMap<String, NetworkState>,
    pub endpoints: HashMap<String, EndpointState>,
    /// Networks whose switch deletion is in flight; they accept no endpoints
    pub deleting: HashSet<String>,
}

/// Cloneable handle to the shared driver state
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<Mutex<DriverState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the lock for a multi-step critical section
    pub async fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.inner.lock().await
    }

    pub async fn network(&self, id: &str) -> Option<NetworkState> {
        self.inner.lock().await.networks.get(id).cloned()
    }

    pub async fn endpoint(&self, id: &str) -> Option<EndpointState> {
        self.inner.lock().await.endpoints.get(id).cloned()
    }

    /// Insert a network unless the id is already known
    pub async fn insert_network_if_absent(&self, network: NetworkState) -> bool {
        let mut state = self.inner.lock().await;
        if state.networks.contains_key(&network.id) {
            return false;
        }
        state.networks.insert(network.id.clone(), network);
        true
    }

    pub async fn remove_network(&self, id: &str) -> Option<NetworkState> {
        self.inner.lock().await.networks.remove(id)
    }

    /// Claim a network for deletion
    ///
    /// Fails if the network is unknown, still has endpoints or is already
    /// being deleted. Until [`StateStore::finish_network_delete`] runs, no
    /// endpoint can be attached to it.
    pub async fn begin_network_delete(&self, id: &str) -> Result<NetworkState> {
        let mut state = self.inner.lock().await;
        let network = state
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::not_found(format!("network id [ {} ] not found", id)))?;

        if state.deleting.contains(id) {
            return Err(DriverError::validation(format!(
                "network {} is already being deleted",
                id
            )));
        }
        let attached = state
            .endpoints
            .values()
            .filter(|ep| ep.network_id == id)
            .count();
        if attached > 0 {
            return Err(DriverError::validation(format!(
                "network {} still has {} endpoint(s) attached",
                id, attached
            )));
        }

        state.deleting.insert(id.to_string());
        Ok(network)
    }

    /// Release a deletion claim; the network is dropped when `deleted`
    pub async fn finish_network_delete(&self, id: &str, deleted: bool) -> Option<NetworkState> {
        let mut state = self.inner.lock().await;
        state.deleting.remove(id);
        if deleted {
            state.networks.remove(id)
        } else {
            None
        }
    }

    /// Insert an endpoint if its parent network exists. Returns the parent.
    pub async fn insert_endpoint(
        &self,
        endpoint_id: &str,
        endpoint: EndpointState,
    ) -> Result<NetworkState> {
        let mut state = self.inner.lock().await;
        let network = state
            .networks
            .get(&endpoint.network_id)
            .cloned()
            .ok_or_else(|| {
                DriverError::not_found(format!(
                    "failed to find logical switch for network id [ {} ]",
                    endpoint.network_id
                ))
            })?;
        if state.deleting.contains(&endpoint.network_id) {
            return Err(DriverError::validation(format!(
                "network {} is being deleted",
                endpoint.network_id
            )));
        }
        state.endpoints.insert(endpoint_id.to_string(), endpoint);
        Ok(network)
    }

    pub async fn remove_endpoint(&self, id: &str) -> Option<EndpointState> {
        self.inner.lock().await.endpoints.remove(id)
    }

    /// Record the veth names of a joined endpoint
    pub async fn set_veth_names(&self, endpoint_id: &str, veth_out: &str, veth_in: &str) -> bool {
        match self.inner.lock().await.endpoints.get_mut(endpoint_id) {
            Some(ep) => {
                ep.veth_out = Some(veth_out.to_string());
                ep.veth_in = Some(veth_in.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn network_count(&self) -> usize {
        self.inner.lock().await.networks.len()
    }

    pub async fn endpoint_count(&self) -> usize {
        self.inner.lock().await.endpoints.len()
    }
}
