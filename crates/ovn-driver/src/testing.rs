//! In-memory fakes of the driver's injected capabilities
//!
//! Each fake records its calls and can be told to fail a named operation.

use async_trait::async_trait;
use ovn_network::{parse_mac, NetworkError, NorthboundClient, OvsClient, VethWiring};
use ovn_ovsdb::{OvsdbError, Subscription, TableUpdates};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::inventory::{ContainerEngine, EngineNetwork, InventoryError};

fn injected(op: &str) -> NetworkError {
    NetworkError::Ovsdb(OvsdbError::Rpc(format!("injected failure in {}", op)))
}

#[derive(Debug, Default)]
struct Failures(HashSet<String>);

impl Failures {
    fn check(&self, op: &str) -> Result<(), NetworkError> {
        if self.0.contains(op) {
            Err(injected(op))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct NorthboundState {
    /// switch name -> (net-id, ports)
    switches: BTreeMap<String, (String, Vec<String>)>,
    /// port name -> addresses
    ports: BTreeMap<String, Vec<String>>,
    failures: Failures,
    calls: Vec<String>,
    updates: Option<mpsc::UnboundedSender<TableUpdates>>,
    /// op -> (entered signal, release signal)
    held: HashMap<String, (oneshot::Sender<()>, oneshot::Receiver<()>)>,
}

/// A paused northbound operation
///
/// The next call of the held op stops after recording itself and waits
/// for [`Held::release`].
#[derive(Debug)]
pub struct Held {
    entered: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Held {
    /// Wait until the held op has been called
    pub async fn entered(&mut self) {
        let _ = (&mut self.entered).await;
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Fake northbound database
#[derive(Debug, Default)]
pub struct MockNorthbound {
    inner: Mutex<NorthboundState>,
}

impl MockNorthbound {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut NorthboundState) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Make every later call of `op` fail
    pub fn fail(&self, op: &str) {
        self.with(|s| s.failures.0.insert(op.to_string()));
    }

    pub fn clear_failures(&self) {
        self.with(|s| s.failures.0.clear());
    }

    /// Pause the next call of `op`; only `delete_bridge` honours it
    pub fn hold(&self, op: &str) -> Held {
        let (entered_tx, entered) = oneshot::channel();
        let (release, release_rx) = oneshot::channel();
        self.with(|s| s.held.insert(op.to_string(), (entered_tx, release_rx)));
        Held { entered, release }
    }

    async fn pause(&self, op: &str) {
        if let Some((entered, release)) = self.with(|s| s.held.remove(op)) {
            let _ = entered.send(());
            let _ = release.await;
        }
    }

    pub fn has_switch(&self, name: &str) -> bool {
        self.with(|s| s.switches.contains_key(name))
    }

    pub fn switch_net_id(&self, name: &str) -> Option<String> {
        self.with(|s| s.switches.get(name).map(|(id, _)| id.clone()))
    }

    pub fn switch_ports(&self, name: &str) -> Vec<String> {
        self.with(|s| s.switches.get(name).map(|(_, p)| p.clone()).unwrap_or_default())
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.with(|s| s.ports.contains_key(name))
    }

    pub fn addresses(&self, port: &str) -> Vec<String> {
        self.with(|s| s.ports.get(port).cloned().unwrap_or_default())
    }

    /// Seed a logical port created outside the driver
    pub fn insert_port(&self, switch: &str, port: &str) {
        self.with(|s| {
            s.ports.entry(port.to_string()).or_default();
            s.switches
                .entry(switch.to_string())
                .or_default()
                .1
                .push(port.to_string());
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Deliver an update to the current subscriber
    pub fn push_update(&self, updates: TableUpdates) -> bool {
        self.with(|s| s.updates.as_ref().is_some_and(|tx| tx.send(updates).is_ok()))
    }

    fn enter(&self, op: &str) -> Result<(), NetworkError> {
        self.with(|s| {
            s.calls.push(op.to_string());
            s.failures.check(op)
        })
    }
}

#[async_trait]
impl NorthboundClient for MockNorthbound {
    async fn bridge_exists(&self, name: &str) -> Result<bool, NetworkError> {
        self.enter("bridge_exists")?;
        Ok(self.has_switch(name))
    }

    async fn add_bridge(&self, name: &str, net_id: &str) -> Result<(), NetworkError> {
        self.enter("add_bridge")?;
        self.with(|s| {
            s.switches
                .entry(name.to_string())
                .or_insert_with(|| (net_id.to_string(), Vec::new()));
        });
        Ok(())
    }

    async fn delete_bridge(&self, name: &str) -> Result<(), NetworkError> {
        self.enter("delete_bridge")?;
        self.pause("delete_bridge").await;
        self.with(|s| match s.switches.get(name) {
            Some((_, ports)) if !ports.is_empty() => Err(NetworkError::SwitchInUse {
                name: name.to_string(),
                ports: ports.len(),
            }),
            _ => {
                s.switches.remove(name);
                Ok(())
            }
        })
    }

    async fn logical_port_exists(&self, name: &str) -> Result<bool, NetworkError> {
        self.enter("logical_port_exists")?;
        Ok(self.has_port(name))
    }

    async fn add_logical_port(&self, switch: &str, port: &str) -> Result<(), NetworkError> {
        self.enter("add_logical_port")?;
        self.with(|s| -> Result<(), NetworkError> {
            let (_, ports) = s
                .switches
                .get_mut(switch)
                .ok_or_else(|| NetworkError::SwitchNotFound(switch.to_string()))?;
            ports.push(port.to_string());
            s.ports.insert(port.to_string(), Vec::new());
            Ok(())
        })
    }

    async fn del_logical_port(&self, switch: &str, port: &str) -> Result<(), NetworkError> {
        self.enter("del_logical_port")?;
        self.with(|s| {
            if s.ports.remove(port).is_none() {
                return Err(NetworkError::PortNotFound(port.to_string()));
            }
            if let Some((_, ports)) = s.switches.get_mut(switch) {
                ports.retain(|p| p != port);
            }
            Ok(())
        })
    }

    async fn set_logical_port_addr(&self, port: &str, ip: &str, mac: &str) -> Result<(), NetworkError> {
        self.enter("set_logical_port_addr")?;
        self.with(|s| -> Result<(), NetworkError> {
            let addresses = s
                .ports
                .get_mut(port)
                .ok_or_else(|| NetworkError::PortNotFound(port.to_string()))?;
            addresses.push(format!("{} {}", mac, ip));
            Ok(())
        })
    }

    async fn subscribe(&self) -> Result<Subscription, NetworkError> {
        self.enter("subscribe")?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.with(|s| s.updates = Some(tx));
        Ok(Subscription {
            initial: TableUpdates::new(),
            updates: rx,
        })
    }
}

#[derive(Debug, Default)]
struct VswitchState {
    /// bridge -> ports
    bridges: HashMap<String, Vec<String>>,
    /// interface -> external-ids
    external_ids: HashMap<String, HashMap<String, String>>,
    failures: Failures,
    calls: Vec<String>,
}

/// Fake local Open vSwitch database
#[derive(Debug, Default)]
pub struct MockVswitch {
    inner: Mutex<VswitchState>,
}

impl MockVswitch {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut VswitchState) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn fail(&self, op: &str) {
        self.with(|s| s.failures.0.insert(op.to_string()));
    }

    pub fn clear_failures(&self) {
        self.with(|s| s.failures.0.clear());
    }

    pub fn ports(&self, bridge: &str) -> Vec<String> {
        self.with(|s| s.bridges.get(bridge).cloned().unwrap_or_default())
    }

    pub fn external_ids(&self, interface: &str) -> HashMap<String, String> {
        self.with(|s| s.external_ids.get(interface).cloned().unwrap_or_default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    fn enter(&self, op: &str) -> Result<(), NetworkError> {
        self.with(|s| {
            s.calls.push(op.to_string());
            s.failures.check(op)
        })
    }
}

#[async_trait]
impl OvsClient for MockVswitch {
    async fn add_veth_port(&self, bridge: &str, veth_out: &str, _mac: &str) -> Result<(), NetworkError> {
        self.enter("add_veth_port")?;
        self.with(|s| {
            s.bridges
                .entry(bridge.to_string())
                .or_default()
                .push(veth_out.to_string());
            s.external_ids.insert(veth_out.to_string(), HashMap::new());
        });
        Ok(())
    }

    async fn bind_veth(
        &self,
        veth_out: &str,
        mac: &str,
        port_name: &str,
        sandbox_id: &str,
    ) -> Result<(), NetworkError> {
        self.enter("bind_veth")?;
        self.with(|s| -> Result<(), NetworkError> {
            let ids = s
                .external_ids
                .get_mut(veth_out)
                .ok_or_else(|| NetworkError::PortNotFound(veth_out.to_string()))?;
            ids.insert("attached-mac".into(), mac.into());
            ids.insert("iface-id".into(), port_name.into());
            ids.insert("vm-id".into(), sandbox_id.into());
            ids.insert("iface-status".into(), "active".into());
            Ok(())
        })
    }

    async fn delete_port(&self, bridge: &str, port: &str) -> Result<(), NetworkError> {
        self.enter("delete_port")?;
        self.with(|s| {
            let ports = s.bridges.entry(bridge.to_string()).or_default();
            let before = ports.len();
            ports.retain(|p| p != port);
            if ports.len() == before {
                return Err(NetworkError::PortNotFound(port.to_string()));
            }
            s.external_ids.remove(port);
            Ok(())
        })
    }
}

#[derive(Debug, Clone)]
struct Link {
    peer: String,
    mac: Option<String>,
}

#[derive(Debug, Default)]
struct VethState {
    links: BTreeMap<String, Link>,
    failures: Failures,
    calls: Vec<String>,
}

/// Fake host links
#[derive(Debug, Default)]
pub struct MockVeth {
    inner: Mutex<VethState>,
}

impl MockVeth {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut VethState) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn fail(&self, op: &str) {
        self.with(|s| s.failures.0.insert(op.to_string()));
    }

    pub fn links(&self) -> Vec<String> {
        self.with(|s| s.links.keys().cloned().collect())
    }

    pub fn mac_of(&self, link: &str) -> Option<String> {
        self.with(|s| s.links.get(link).and_then(|l| l.mac.clone()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }
}

#[async_trait]
impl VethWiring for MockVeth {
    async fn create_veth_pair(&self, veth_out: &str, veth_in: &str, mac: &str) -> Result<(), NetworkError> {
        parse_mac(mac)?;
        self.with(|s| -> Result<(), NetworkError> {
            s.calls.push("create_veth_pair".to_string());
            s.failures.check("create_veth_pair")?;
            if s.links.contains_key(veth_out) || s.links.contains_key(veth_in) {
                return Err(NetworkError::Netlink {
                    step: format!("create veth pair {}/{}", veth_out, veth_in),
                    code: Some(-17),
                    message: "File exists (EEXIST)".to_string(),
                });
            }
            s.links.insert(
                veth_out.to_string(),
                Link {
                    peer: veth_in.to_string(),
                    mac: None,
                },
            );
            s.links.insert(
                veth_in.to_string(),
                Link {
                    peer: veth_out.to_string(),
                    mac: Some(mac.to_string()),
                },
            );
            Ok(())
        })
    }

    async fn delete_link(&self, name: &str) -> Result<(), NetworkError> {
        self.with(|s| -> Result<(), NetworkError> {
            s.calls.push("delete_link".to_string());
            s.failures.check("delete_link")?;
            let link = s
                .links
                .remove(name)
                .ok_or_else(|| NetworkError::LinkNotFound(name.to_string()))?;
            // deleting one end removes its peer
            s.links.remove(&link.peer);
            Ok(())
        })
    }
}

/// Container engine with a fixed inventory
#[derive(Debug, Default)]
pub struct StaticEngine {
    networks: Vec<EngineNetwork>,
    unavailable: bool,
}

impl StaticEngine {
    pub fn new(networks: Vec<EngineNetwork>) -> Self {
        Self {
            networks,
            unavailable: false,
        }
    }

    /// An engine whose API cannot be reached
    pub fn unavailable() -> Self {
        Self {
            networks: Vec::new(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl ContainerEngine for StaticEngine {
    async fn list_networks(&self, _driver: &str) -> Result<Vec<EngineNetwork>, InventoryError> {
        if self.unavailable {
            return Err(InventoryError::Unavailable("static engine offline".to_string()));
        }
        Ok(self.networks.clone())
    }
}
