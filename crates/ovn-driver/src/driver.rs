//! Driver orchestrator
//!
//! Each lifecycle operation validates its input, updates the [`StateStore`]
//! and composes northbound, local switch and netlink calls. Compensation is
//! limited to the cases listed on each operation.

use ovn_network::{NorthboundClient, OvsClient, VethWiring};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{
    AllocateNetworkRequest, CreateEndpointRequest, CreateNetworkRequest, DiscoveryNotification,
    InterfaceName, JoinResponse, ProgramExternalConnectivityRequest,
};
use crate::config::Scope;
use crate::error::{DriverError, Result};
use crate::inventory::ContainerEngine;
use crate::naming::{self, CONTAINER_IFACE_PREFIX};
use crate::state::{BridgeMode, EndpointState, NetworkState, StateStore, DEFAULT_MTU};

/// Driver name registered with the container engine
pub const DRIVER_NAME: &str = "ovn";

pub const OPT_BRIDGE_NAME: &str = "net.libnetwork.ovn.bridge.name";
pub const OPT_BRIDGE_MTU: &str = "net.libnetwork.ovn.bridge.mtu";
pub const OPT_BRIDGE_MODE: &str = "net.libnetwork.ovn.bridge.mode";
pub const OPT_BIND_INTERFACE: &str = "net.libnetwork.ovn.bridge.bind_interface";

/// Options passed with `-o` on the engine command line are nested here
pub const GENERIC_OPTIONS: &str = "com.docker.network.generic";

/// Outcome of startup reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub networks: usize,
    pub endpoints: usize,
    pub skipped_endpoints: usize,
}

fn option<'a>(options: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    options.get(key).or_else(|| {
        options
            .get(GENERIC_OPTIONS)
            .and_then(Value::as_object)
            .and_then(|generic| generic.get(key))
    })
}

fn string_option<'a>(options: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    option(options, key).and_then(Value::as_str)
}

fn mtu_option(options: &Map<String, Value>) -> Result<u32> {
    let invalid = |v: &Value| DriverError::validation(format!("invalid MTU {}", v));
    match option(options, OPT_BRIDGE_MTU) {
        None | Some(Value::Null) => Ok(DEFAULT_MTU),
        Some(v @ Value::Number(n)) => n
            .as_u64()
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(|| invalid(v)),
        Some(v @ Value::String(s)) => s.trim().parse().map_err(|_| invalid(v)),
        Some(v) => Err(invalid(v)),
    }
}

/// The network driver
pub struct Driver {
    state: StateStore,
    northbound: Arc<dyn NorthboundClient>,
    vswitch: Arc<dyn OvsClient>,
    veth: Arc<dyn VethWiring>,
    integration_bridge: String,
    scope: Scope,
}

impl Driver {
    pub fn new(
        northbound: Arc<dyn NorthboundClient>,
        vswitch: Arc<dyn OvsClient>,
        veth: Arc<dyn VethWiring>,
        integration_bridge: impl Into<String>,
        scope: Scope,
    ) -> Self {
        Self {
            state: StateStore::new(),
            northbound,
            vswitch,
            veth,
            integration_bridge: integration_bridge.into(),
            scope,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn northbound(&self) -> &Arc<dyn NorthboundClient> {
        &self.northbound
    }

    pub fn integration_bridge(&self) -> &str {
        &self.integration_bridge
    }

    /// Derive and validate a NetworkState without touching any state
    fn network_from_request(req: &CreateNetworkRequest) -> Result<NetworkState> {
        if req.network_id.is_empty() {
            return Err(DriverError::validation("missing network id"));
        }

        let bridge_name = string_option(&req.options, OPT_BRIDGE_NAME)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| naming::bridge_name(&req.network_id));

        let mtu = mtu_option(&req.options)?;

        let mode = match string_option(&req.options, OPT_BRIDGE_MODE) {
            Some(mode) => mode.parse::<BridgeMode>()?,
            None => BridgeMode::default(),
        };

        // IPv6 first; a non-empty IPv4 gateway replaces it
        let mut gateway = req
            .ipv6_data
            .first()
            .map(|pool| pool.gateway.clone())
            .unwrap_or_default();
        if let Some(pool) = req.ipv4_data.first() {
            if !pool.gateway.is_empty() {
                gateway = pool.gateway.clone();
            }
        }
        let (gateway, gateway_mask) = naming::split_gateway(&gateway)?;

        let flat_bind_interface = string_option(&req.options, OPT_BIND_INTERFACE)
            .filter(|iface| !iface.is_empty())
            .map(str::to_string);

        Ok(NetworkState {
            id: req.network_id.clone(),
            bridge_name,
            mtu,
            mode,
            gateway,
            gateway_mask,
            flat_bind_interface,
        })
    }

    /// Create a logical switch for the network
    ///
    /// The NetworkState is stored before the switch is created and removed
    /// again if creation fails. A repeated request for a known id changes
    /// nothing.
    pub async fn create_network(&self, req: &CreateNetworkRequest) -> Result<()> {
        let network = Self::network_from_request(req)?;
        let id = network.id.clone();
        let bridge = network.bridge_name.clone();
        info!(
            network = %id,
            bridge = %bridge,
            mtu = network.mtu,
            mode = %network.mode,
            gateway = %network.gateway,
            "Create network"
        );

        if !self.state.insert_network_if_absent(network).await {
            warn!("Network {} is already known, keeping its state", id);
            return Ok(());
        }

        if let Err(e) = self.northbound.add_bridge(&bridge, &id).await {
            self.state.remove_network(&id).await;
            return Err(DriverError::transaction(
                format!("failed to create logical switch {}", bridge),
                e,
            ));
        }

        info!("Network {} ready on logical switch {}", id, bridge);
        Ok(())
    }

    /// Delete the logical switch of a network with no endpoints left
    pub async fn delete_network(&self, network_id: &str) -> Result<()> {
        // endpoints are refused from here until the claim is released
        let network = self.state.begin_network_delete(network_id).await?;

        if let Err(e) = self.northbound.delete_bridge(&network.bridge_name).await {
            self.state.finish_network_delete(network_id, false).await;
            return Err(DriverError::transaction(
                format!("failed to delete logical switch {}", network.bridge_name),
                e,
            ));
        }

        self.state.finish_network_delete(network_id, true).await;
        info!("Network {} deleted", network_id);
        Ok(())
    }

    /// Create a logical port; returns the endpoint MAC
    ///
    /// The EndpointState is stored first and removed if the port cannot be
    /// created. A failed address assignment leaves both in place.
    pub async fn create_endpoint(&self, req: &CreateEndpointRequest) -> Result<String> {
        if self.state.network(&req.network_id).await.is_none() {
            return Err(DriverError::not_found(format!(
                "failed to find logical switch for network id [ {} ]",
                req.network_id
            )));
        }

        let iface = req
            .interface
            .as_ref()
            .ok_or_else(|| DriverError::validation("request does not provide interface"))?;
        if iface.address.is_empty() {
            return Err(DriverError::validation("interface does not provide address"));
        }
        let (ip, _) = naming::parse_ipv4_cidr(&iface.address)?;

        let mac = if iface.mac_address.is_empty() {
            let mac = naming::make_mac(ip);
            debug!("Generated mac {} for {}", mac, ip);
            mac
        } else {
            iface.mac_address.clone()
        };

        let port = naming::logical_port_name(&req.network_id, &req.endpoint_id);
        let endpoint = EndpointState {
            network_id: req.network_id.clone(),
            logical_port_name: port.clone(),
            addr: iface.address.clone(),
            mac: mac.clone(),
            veth_out: None,
            veth_in: None,
        };
        let network = self.state.insert_endpoint(&req.endpoint_id, endpoint).await?;
        info!(
            endpoint = %req.endpoint_id,
            port = %port,
            address = %iface.address,
            mac = %mac,
            "Create endpoint"
        );

        if let Err(e) = self
            .northbound
            .add_logical_port(&network.bridge_name, &port)
            .await
        {
            self.state.remove_endpoint(&req.endpoint_id).await;
            return Err(DriverError::transaction(
                format!("failed to create logical port {}", port),
                e,
            ));
        }

        if let Err(e) = self
            .northbound
            .set_logical_port_addr(&port, &ip.to_string(), &mac)
            .await
        {
            warn!(
                "Logical port {} has no address; endpoint {} kept",
                port, req.endpoint_id
            );
            return Err(DriverError::transaction(
                format!("failed to set address of logical port {}", port),
                e,
            ));
        }

        Ok(mac)
    }

    async fn lookup(&self, network_id: &str, endpoint_id: &str) -> Result<(NetworkState, EndpointState)> {
        let state = self.state.lock().await;
        let network = state.networks.get(network_id).cloned().ok_or_else(|| {
            DriverError::not_found(format!("network id [ {} ] not found", network_id))
        })?;
        let endpoint = state
            .endpoints
            .get(endpoint_id)
            .filter(|ep| ep.network_id == network_id)
            .cloned()
            .ok_or_else(|| {
                DriverError::not_found(format!(
                    "endpoint id [ {} ] not found on network [ {} ]",
                    endpoint_id, network_id
                ))
            })?;
        Ok((network, endpoint))
    }

    /// Delete the logical port; the record is removed only on success
    pub async fn delete_endpoint(&self, network_id: &str, endpoint_id: &str) -> Result<()> {
        let (network, endpoint) = self.lookup(network_id, endpoint_id).await?;

        self.northbound
            .del_logical_port(&network.bridge_name, &endpoint.logical_port_name)
            .await
            .map_err(|e| {
                DriverError::transaction(
                    format!("failed to delete logical port {}", endpoint.logical_port_name),
                    e,
                )
            })?;

        self.state.remove_endpoint(endpoint_id).await;
        info!("Endpoint {} deleted", endpoint_id);
        Ok(())
    }

    /// Wire the endpoint into a sandbox
    pub async fn join(&self, network_id: &str, endpoint_id: &str, sandbox_key: &str) -> Result<JoinResponse> {
        if sandbox_key.is_empty() {
            return Err(DriverError::validation("missing sandbox key"));
        }
        let (network, endpoint) = self.lookup(network_id, endpoint_id).await?;
        let (veth_out, veth_in) = naming::veth_names(endpoint_id);
        info!(
            endpoint = %endpoint_id,
            sandbox = %sandbox_key,
            veth_out = %veth_out,
            veth_in = %veth_in,
            "Join"
        );

        self.veth
            .create_veth_pair(&veth_out, &veth_in, &endpoint.mac)
            .await
            .map_err(|e| DriverError::host(format!("failed to create veth pair {}", veth_out), e))?;

        if let Err(e) = self
            .vswitch
            .add_veth_port(&self.integration_bridge, &veth_out, &endpoint.mac)
            .await
        {
            self.remove_link(&veth_out).await;
            return Err(DriverError::transaction(
                format!("failed to add {} to {}", veth_out, self.integration_bridge),
                e,
            ));
        }

        if let Err(e) = self
            .vswitch
            .bind_veth(&veth_out, &endpoint.mac, &endpoint.logical_port_name, sandbox_key)
            .await
        {
            if let Err(cleanup) = self
                .vswitch
                .delete_port(&self.integration_bridge, &veth_out)
                .await
            {
                warn!("Failed to remove port {} after bind failure: {}", veth_out, cleanup);
            }
            self.remove_link(&veth_out).await;
            return Err(DriverError::transaction(
                format!("failed to bind {} to {}", veth_out, endpoint.logical_port_name),
                e,
            ));
        }

        if !self.state.set_veth_names(endpoint_id, &veth_out, &veth_in).await {
            warn!("Endpoint {} disappeared during join", endpoint_id);
        }

        Ok(JoinResponse {
            interface_name: InterfaceName {
                src_name: veth_in,
                dst_prefix: CONTAINER_IFACE_PREFIX.to_string(),
            },
            gateway: network.gateway,
        })
    }

    async fn remove_link(&self, name: &str) {
        if let Err(e) = self.veth.delete_link(name).await {
            warn!("Failed to delete link {}: {}", name, e);
        }
    }

    /// Unwire the endpoint; the record is dropped once port deletion was attempted
    pub async fn leave(&self, network_id: &str, endpoint_id: &str) -> Result<()> {
        let (_, endpoint) = self.lookup(network_id, endpoint_id).await?;
        let veth_out = endpoint
            .veth_out
            .clone()
            .unwrap_or_else(|| naming::veth_names(endpoint_id).0);
        info!(endpoint = %endpoint_id, veth_out = %veth_out, "Leave");

        self.remove_link(&veth_out).await;

        let result = self
            .vswitch
            .delete_port(&self.integration_bridge, &veth_out)
            .await;
        self.state.remove_endpoint(endpoint_id).await;

        result.map_err(|e| {
            DriverError::transaction(
                format!("failed to delete port {} from {}", veth_out, self.integration_bridge),
                e,
            )
        })
    }

    /// `ip`, `mac` and `host_veth` of an endpoint
    pub async fn endpoint_info(&self, endpoint_id: &str) -> Result<HashMap<String, String>> {
        let endpoint = self.state.endpoint(endpoint_id).await.ok_or_else(|| {
            DriverError::not_found(format!("endpoint id [ {} ] not found", endpoint_id))
        })?;

        let mut info = HashMap::new();
        info.insert("ip".to_string(), endpoint.addr);
        info.insert("mac".to_string(), endpoint.mac);
        info.insert("host_veth".to_string(), endpoint.veth_out.unwrap_or_default());
        Ok(info)
    }

    pub fn capabilities(&self) -> Scope {
        self.scope
    }

    pub async fn allocate_network(&self, req: &AllocateNetworkRequest) -> HashMap<String, String> {
        debug!("Allocate network request for {}", req.network_id);
        HashMap::new()
    }

    pub async fn free_network(&self, network_id: &str) {
        debug!("Free network request for {}", network_id);
    }

    pub async fn discover_new(&self, notification: &DiscoveryNotification) {
        debug!("Discover new: type {}", notification.discovery_type);
    }

    pub async fn discover_delete(&self, notification: &DiscoveryNotification) {
        debug!("Discover delete: type {}", notification.discovery_type);
    }

    pub async fn program_external_connectivity(&self, req: &ProgramExternalConnectivityRequest) {
        debug!("Program external connectivity for endpoint {}", req.endpoint_id);
    }

    pub async fn revoke_external_connectivity(&self, network_id: &str, endpoint_id: &str) {
        debug!(
            "Revoke external connectivity for endpoint {} on {}",
            endpoint_id, network_id
        );
    }

    /// Rebuild state from the engine's record of networks owned by this driver
    ///
    /// Must complete before requests are served. Endpoints are restored only
    /// if their logical port still exists.
    pub async fn reconcile(&self, engine: &dyn ContainerEngine) -> Result<ReconcileReport> {
        let networks = engine
            .list_networks(DRIVER_NAME)
            .await
            .map_err(|e| DriverError::inventory("could not list container networks", e))?;

        let mut report = ReconcileReport::default();
        for net in networks {
            let bridge = net
                .options
                .get(OPT_BRIDGE_NAME)
                .filter(|name| !name.is_empty())
                .cloned()
                .unwrap_or_else(|| naming::bridge_name(&net.id));
            debug!("Restoring network {} ({}) on {}", net.name, net.id, bridge);

            if !self
                .state
                .insert_network_if_absent(NetworkState::synthesized(&net.id, &bridge))
                .await
            {
                debug!("Network {} already known", net.id);
            }
            report.networks += 1;

            for ep in net.endpoints {
                let port = naming::logical_port_name(&net.id, &ep.endpoint_id);
                let exists = self
                    .northbound
                    .logical_port_exists(&port)
                    .await
                    .map_err(|e| {
                        DriverError::transaction(format!("failed to look up logical port {}", port), e)
                    })?;
                if !exists {
                    warn!(
                        "Skipping endpoint {}: logical port {} no longer exists",
                        ep.endpoint_id, port
                    );
                    report.skipped_endpoints += 1;
                    continue;
                }

                let (veth_out, veth_in) = naming::veth_names(&ep.endpoint_id);
                let endpoint = EndpointState {
                    network_id: net.id.clone(),
                    logical_port_name: port,
                    addr: ep.ipv4_address,
                    mac: ep.mac_address,
                    veth_out: Some(veth_out),
                    veth_in: Some(veth_in),
                };
                self.state.insert_endpoint(&ep.endpoint_id, endpoint).await?;
                report.endpoints += 1;
            }
        }

        info!(
            "Reconciled {} network(s), {} endpoint(s), {} skipped",
            report.networks, report.endpoints, report.skipped_endpoints
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_option_lookup_falls_back_to_generic() {
        let opts = options(json!({
            GENERIC_OPTIONS: {OPT_BRIDGE_MODE: "flat"},
            OPT_BRIDGE_NAME: "custom"
        }));
        assert_eq!(string_option(&opts, OPT_BRIDGE_MODE), Some("flat"));
        assert_eq!(string_option(&opts, OPT_BRIDGE_NAME), Some("custom"));
        assert_eq!(string_option(&opts, OPT_BIND_INTERFACE), None);
    }

    #[test]
    fn test_mtu_option() {
        assert_eq!(mtu_option(&options(json!({}))).unwrap(), 1500);
        assert_eq!(mtu_option(&options(json!({OPT_BRIDGE_MTU: 9000}))).unwrap(), 9000);
        assert_eq!(mtu_option(&options(json!({OPT_BRIDGE_MTU: "1400"}))).unwrap(), 1400);
        assert!(mtu_option(&options(json!({OPT_BRIDGE_MTU: "big"}))).is_err());
        assert!(mtu_option(&options(json!({OPT_BRIDGE_MTU: -1}))).is_err());
        assert!(mtu_option(&options(json!({OPT_BRIDGE_MTU: true}))).is_err());
    }

    #[test]
    fn test_ipv4_gateway_wins() {
        let req: CreateNetworkRequest = serde_json::from_value(json!({
            "NetworkID": "abcde12345",
            "IPv4Data": [{"Gateway": "10.0.0.1/24"}],
            "IPv6Data": [{"Gateway": "fd00::1/64"}]
        }))
        .unwrap();
        let network = Driver::network_from_request(&req).unwrap();
        assert_eq!(network.gateway, "10.0.0.1");
        assert_eq!(network.gateway_mask, "24");

        let req: CreateNetworkRequest = serde_json::from_value(json!({
            "NetworkID": "abcde12345",
            "IPv4Data": [{"Gateway": ""}],
            "IPv6Data": [{"Gateway": "fd00::1/64"}]
        }))
        .unwrap();
        let network = Driver::network_from_request(&req).unwrap();
        assert_eq!(network.gateway, "fd00::1");
        assert_eq!(network.gateway_mask, "64");
    }

    #[test]
    fn test_bind_interface_and_name_override() {
        let req: CreateNetworkRequest = serde_json::from_value(json!({
            "NetworkID": "abcde12345",
            "Options": {OPT_BRIDGE_NAME: "tenant-a", OPT_BIND_INTERFACE: "eth1"},
            "IPv4Data": [{"Gateway": "10.0.0.1/24"}]
        }))
        .unwrap();
        let network = Driver::network_from_request(&req).unwrap();
        assert_eq!(network.bridge_name, "tenant-a");
        assert_eq!(network.flat_bind_interface.as_deref(), Some("eth1"));
        assert_eq!(network.mode, BridgeMode::Nat);
    }
}
