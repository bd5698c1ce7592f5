//! Local Open vSwitch database client
//!
//! Adds container veths to the integration bridge and tags their
//! `Interface` rows so ovn-controller binds them to logical ports.

use async_trait::async_trait;
use ovn_ovsdb::{datum, Condition, Endpoint, Mutation, OvsdbClient, RetryPolicy, Transaction};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{NetworkError, Result};

/// Local switch database name
pub const OVS_DB: &str = "Open_vSwitch";

/// Port operations the driver needs from the local switch
#[async_trait]
pub trait OvsClient: Send + Sync {
    /// Add `veth_out` as a system Interface/Port on `bridge`
    async fn add_veth_port(&self, bridge: &str, veth_out: &str, mac: &str) -> Result<()>;

    /// Bind the interface to a logical port through its external-ids
    async fn bind_veth(&self, veth_out: &str, mac: &str, port_name: &str, sandbox_id: &str)
        -> Result<()>;

    async fn delete_port(&self, bridge: &str, port: &str) -> Result<()>;
}

/// [`OvsClient`] over a live connection to the local ovsdb-server
pub struct LocalVswitch {
    client: Arc<OvsdbClient>,
}

impl LocalVswitch {
    pub fn new(client: Arc<OvsdbClient>) -> Self {
        Self { client }
    }

    pub async fn connect(endpoint: &Endpoint, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = OvsdbClient::connect_with_retry(endpoint, retry, timeout).await?;
        Ok(Self::new(Arc::new(client)))
    }

    async fn port_uuid(&self, port: &str) -> Result<Option<String>> {
        let mut txn = Transaction::new(OVS_DB);
        txn.select("Port", vec![Condition::equals("name", port)], Some(&["_uuid"]));
        let results = self.client.transact(txn).await?;
        Ok(results
            .first()
            .and_then(|r| r.first_uuid())
            .map(str::to_string))
    }
}

#[async_trait]
impl OvsClient for LocalVswitch {
    async fn add_veth_port(&self, bridge: &str, veth_out: &str, mac: &str) -> Result<()> {
        let mut txn = Transaction::new(OVS_DB);
        let intf = txn.named_uuid("intf");
        let port = txn.named_uuid("port");

        let mut intf_row = Map::new();
        intf_row.insert("name".to_string(), json!(veth_out));
        intf_row.insert("type".to_string(), json!("system"));
        txn.insert("Interface", intf_row, Some(&intf))?;

        let mut port_row = Map::new();
        port_row.insert("name".to_string(), json!(veth_out));
        port_row.insert(
            "interfaces".to_string(),
            datum::set([txn.reference(&intf)?]),
        );
        txn.insert("Port", port_row, Some(&port))?;

        let port_ref = txn.reference(&port)?;
        txn.mutate(
            "Bridge",
            vec![Condition::equals("name", bridge)],
            vec![Mutation::insert("ports", datum::set([port_ref]))],
        );

        let results = self.client.transact(txn).await?;
        if results.get(2).map_or(0, |r| r.count()) == 0 {
            return Err(NetworkError::BridgeNotFound(bridge.to_string()));
        }

        info!("Port {} (mac {}) added to bridge {}", veth_out, mac, bridge);
        Ok(())
    }

    async fn bind_veth(
        &self,
        veth_out: &str,
        mac: &str,
        port_name: &str,
        sandbox_id: &str,
    ) -> Result<()> {
        let external_ids = datum::map([
            ("attached-mac", mac),
            ("iface-id", port_name),
            ("vm-id", sandbox_id),
            ("iface-status", "active"),
        ]);

        let mut txn = Transaction::new(OVS_DB);
        txn.mutate(
            "Interface",
            vec![Condition::equals("name", veth_out)],
            vec![Mutation::insert("external_ids", external_ids)],
        );

        let results = self.client.transact(txn).await?;
        if results.first().map_or(0, |r| r.count()) == 0 {
            return Err(NetworkError::PortNotFound(veth_out.to_string()));
        }

        debug!("Interface {} bound to logical port {}", veth_out, port_name);
        Ok(())
    }

    async fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        let uuid = self
            .port_uuid(port)
            .await?
            .ok_or_else(|| NetworkError::PortNotFound(port.to_string()))?;

        let mut txn = Transaction::new(OVS_DB);
        txn.delete("Port", vec![Condition::uuid_is(&uuid)]).mutate(
            "Bridge",
            vec![Condition::equals("name", bridge)],
            vec![Mutation::delete("ports", datum::set([datum::uuid(&uuid)]))],
        );
        self.client.transact(txn).await?;

        info!("Port {} deleted from bridge {}", port, bridge);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ops, scripted_client};
    use serde_json::Value;

    #[tokio::test]
    async fn test_add_veth_port_three_operations() {
        let (client, recorded) = scripted_client(vec![json!([
            {"uuid": ["uuid", "i1"]},
            {"uuid": ["uuid", "p1"]},
            {"count": 1}
        ])]);
        LocalVswitch::new(client)
            .add_veth_port("br-int", "fghij67890abcde", "7a:42:0a:00:00:05")
            .await
            .unwrap();

        let sent = ops(&recorded, 0);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0]["table"], "Interface");
        assert_eq!(sent[0]["row"]["type"], "system");
        let intf = sent[0]["uuid-name"].as_str().unwrap();
        assert_eq!(sent[1]["row"]["interfaces"], json!(["set", [["named-uuid", intf]]]));
        let port = sent[1]["uuid-name"].as_str().unwrap();
        assert_eq!(sent[2]["where"], json!([["name", "==", "br-int"]]));
        assert_eq!(
            sent[2]["mutations"][0],
            json!(["ports", "insert", ["set", [["named-uuid", port]]]])
        );
    }

    #[tokio::test]
    async fn test_add_veth_port_missing_bridge() {
        let (client, _) = scripted_client(vec![json!([
            {"uuid": ["uuid", "i1"]},
            {"uuid": ["uuid", "p1"]},
            {"count": 0}
        ])]);
        let err = LocalVswitch::new(client)
            .add_veth_port("br-int", "fghij67890abcde", "7a:42:0a:00:00:05")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::BridgeNotFound(_)));
    }

    #[tokio::test]
    async fn test_bind_veth_external_ids() {
        let (client, recorded) = scripted_client(vec![json!([{"count": 1}])]);
        LocalVswitch::new(client)
            .bind_veth("fghij67890abcde", "7a:42:0a:00:00:05", "brabcde-fghij", "/var/run/docker/netns/1")
            .await
            .unwrap();

        let mutation = &ops(&recorded, 0)[0]["mutations"][0];
        assert_eq!(mutation[0], "external_ids");
        let ids = &mutation[2];
        assert_eq!(datum::map_get(ids, "attached-mac"), Some(&Value::from("7a:42:0a:00:00:05")));
        assert_eq!(datum::map_get(ids, "iface-id"), Some(&Value::from("brabcde-fghij")));
        assert_eq!(datum::map_get(ids, "vm-id"), Some(&Value::from("/var/run/docker/netns/1")));
        assert_eq!(datum::map_get(ids, "iface-status"), Some(&Value::from("active")));
    }

    #[tokio::test]
    async fn test_delete_port() {
        let (client, recorded) = scripted_client(vec![
            json!([{"rows": [{"_uuid": ["uuid", "p1"]}]}]),
            json!([{"count": 1}, {"count": 1}]),
        ]);
        LocalVswitch::new(client)
            .delete_port("br-int", "fghij67890abcde")
            .await
            .unwrap();

        let sent = ops(&recorded, 1);
        assert_eq!(sent[0]["op"], "delete");
        assert_eq!(sent[0]["where"], json!([["_uuid", "==", ["uuid", "p1"]]]));
        assert_eq!(sent[1]["mutations"][0], json!(["ports", "delete", ["set", [["uuid", "p1"]]]]));
    }

    #[tokio::test]
    async fn test_delete_port_not_found() {
        let (client, recorded) = scripted_client(vec![json!([{"rows": []}])]);
        let err = LocalVswitch::new(client)
            .delete_port("br-int", "fghij67890abcde")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }
}
