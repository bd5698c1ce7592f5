//! OVN northbound database client
//!
//! Logical switches and logical switch ports in `OVN_Northbound`. Every
//! method builds one or two transactions; rows created in one transaction
//! are looked up again by name before a later transaction uses them.

use async_trait::async_trait;
use ovn_ovsdb::{
    datum, Condition, Endpoint, Mutation, OvsdbClient, RetryPolicy, Row, Subscription,
    Transaction,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, Result};

/// Northbound database name
pub const NB_DB: &str = "OVN_Northbound";

const LOGICAL_SWITCH: &str = "Logical_Switch";
const LOGICAL_SWITCH_PORT: &str = "Logical_Switch_Port";

/// Operations the driver needs from the northbound database
#[async_trait]
pub trait NorthboundClient: Send + Sync {
    async fn bridge_exists(&self, name: &str) -> Result<bool>;

    /// Create the logical switch unless it already exists
    async fn add_bridge(&self, name: &str, net_id: &str) -> Result<()>;

    /// Delete an empty logical switch; an absent switch counts as deleted
    async fn delete_bridge(&self, name: &str) -> Result<()>;

    async fn logical_port_exists(&self, name: &str) -> Result<bool>;

    async fn add_logical_port(&self, switch: &str, port: &str) -> Result<()>;

    async fn del_logical_port(&self, switch: &str, port: &str) -> Result<()>;

    /// Append `"<mac> <ip>"` to the port's addresses
    async fn set_logical_port_addr(&self, port: &str, ip: &str, mac: &str) -> Result<()>;

    /// Monitor every table, all columns
    async fn subscribe(&self) -> Result<Subscription>;
}

/// [`NorthboundClient`] over a live OVSDB connection
pub struct OvnNorthbound {
    client: Arc<OvsdbClient>,
}

impl OvnNorthbound {
    pub fn new(client: Arc<OvsdbClient>) -> Self {
        Self { client }
    }

    /// Connect to the northbound server, retrying per `retry`
    pub async fn connect(endpoint: &Endpoint, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = OvsdbClient::connect_with_retry(endpoint, retry, timeout).await?;
        Ok(Self::new(Arc::new(client)))
    }

    pub fn client(&self) -> &Arc<OvsdbClient> {
        &self.client
    }

    async fn select_one(&self, table: &str, name: &str, columns: &[&str]) -> Result<Option<Row>> {
        let mut txn = Transaction::new(NB_DB);
        txn.select(table, vec![Condition::equals("name", name)], Some(columns));
        let results = self.client.transact(txn).await?;
        Ok(results
            .into_iter()
            .next()
            .and_then(|r| r.rows.and_then(|rows| rows.into_iter().next())))
    }

    /// Insert `Logical_Switch{name}` and tag it with `external_ids:net-id`
    pub async fn create_logical_bridge(&self, name: &str, net_id: &str) -> Result<()> {
        let mut txn = Transaction::new(NB_DB);
        let switch = txn.named_uuid("switch");

        let mut row = Map::new();
        row.insert("name".to_string(), json!(name));
        txn.insert(LOGICAL_SWITCH, row, Some(&switch))?;

        txn.mutate(
            LOGICAL_SWITCH,
            vec![Condition::named(&switch)],
            vec![Mutation::insert(
                "external_ids",
                datum::map([("net-id", net_id)]),
            )],
        );

        self.client.transact(txn).await?;
        debug!("Inserted logical switch {} for network {}", name, net_id);
        Ok(())
    }
}

#[async_trait]
impl NorthboundClient for OvnNorthbound {
    async fn bridge_exists(&self, name: &str) -> Result<bool> {
        Ok(self.select_one(LOGICAL_SWITCH, name, &["_uuid"]).await?.is_some())
    }

    async fn add_bridge(&self, name: &str, net_id: &str) -> Result<()> {
        if self.bridge_exists(name).await? {
            info!("Logical switch {} already exists, skipping creation", name);
            return Ok(());
        }

        self.create_logical_bridge(name, net_id).await?;

        if self.bridge_exists(name).await? {
            info!("Logical switch {} created", name);
            Ok(())
        } else {
            Err(NetworkError::BridgeNotCreated(name.to_string()))
        }
    }

    async fn delete_bridge(&self, name: &str) -> Result<()> {
        let Some(row) = self.select_one(LOGICAL_SWITCH, name, &["_uuid", "ports"]).await? else {
            info!("Logical switch {} already absent", name);
            return Ok(());
        };

        let ports = row.get("ports").map(datum::set_items).map_or(0, |p| p.len());
        if ports > 0 {
            return Err(NetworkError::SwitchInUse {
                name: name.to_string(),
                ports,
            });
        }

        let uuid = row
            .get("_uuid")
            .and_then(datum::as_uuid)
            .ok_or_else(|| NetworkError::SwitchNotFound(name.to_string()))?;

        let mut txn = Transaction::new(NB_DB);
        txn.delete(LOGICAL_SWITCH, vec![Condition::uuid_is(uuid)]);
        self.client.transact(txn).await?;

        info!("Logical switch {} deleted", name);
        Ok(())
    }

    async fn logical_port_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .select_one(LOGICAL_SWITCH_PORT, name, &["_uuid"])
            .await?
            .is_some())
    }

    async fn add_logical_port(&self, switch: &str, port: &str) -> Result<()> {
        let mut txn = Transaction::new(NB_DB);
        let lsp = txn.named_uuid("port");

        let mut row = Map::new();
        row.insert("name".to_string(), json!(port));
        row.insert("type".to_string(), json!(""));
        row.insert("up".to_string(), json!(false));
        txn.insert(LOGICAL_SWITCH_PORT, row, Some(&lsp))?;

        let reference = txn.reference(&lsp)?;
        txn.mutate(
            LOGICAL_SWITCH,
            vec![Condition::equals("name", switch)],
            vec![Mutation::insert("ports", datum::set([reference]))],
        );

        let results = self.client.transact(txn).await?;
        if results.get(1).map_or(0, |r| r.count()) == 0 {
            return Err(NetworkError::SwitchNotFound(switch.to_string()));
        }

        info!("Logical port {} added to {}", port, switch);
        Ok(())
    }

    async fn del_logical_port(&self, switch: &str, port: &str) -> Result<()> {
        let uuid = self
            .select_one(LOGICAL_SWITCH_PORT, port, &["_uuid"])
            .await?
            .and_then(|row| row.get("_uuid").and_then(datum::as_uuid).map(str::to_string))
            .ok_or_else(|| NetworkError::PortNotFound(port.to_string()))?;

        let mut txn = Transaction::new(NB_DB);
        txn.mutate(
            LOGICAL_SWITCH,
            vec![Condition::equals("name", switch)],
            vec![Mutation::delete("ports", datum::set([datum::uuid(&uuid)]))],
        );

        let results = self.client.transact(txn).await?;
        if results.first().map_or(0, |r| r.count()) == 0 {
            warn!(
                "Logical switch {} not found while removing port {}",
                switch, port
            );
        }

        info!("Logical port {} removed from {}", port, switch);
        Ok(())
    }

    async fn set_logical_port_addr(&self, port: &str, ip: &str, mac: &str) -> Result<()> {
        let address = format!("{} {}", mac, ip);

        let mut txn = Transaction::new(NB_DB);
        txn.mutate(
            LOGICAL_SWITCH_PORT,
            vec![Condition::equals("name", port)],
            vec![Mutation::insert("addresses", datum::set([Value::from(address.as_str())]))],
        );

        let results = self.client.transact(txn).await?;
        if results.first().map_or(0, |r| r.count()) == 0 {
            return Err(NetworkError::PortNotFound(port.to_string()));
        }

        debug!("Logical port {} addresses += \"{}\"", port, address);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        Ok(self.client.monitor_all(NB_DB).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ops, scripted_client};
    use ovn_ovsdb::OvsdbError;

    fn found(uuid: &str) -> Value {
        json!([{"rows": [{"_uuid": ["uuid", uuid], "ports": ["set", []]}]}])
    }

    fn none() -> Value {
        json!([{"rows": []}])
    }

    #[tokio::test]
    async fn test_add_bridge_creates_and_verifies() {
        let (client, recorded) = scripted_client(vec![
            none(),
            json!([{"uuid": ["uuid", "s1"]}, {"count": 1}]),
            found("s1"),
        ]);
        let nb = OvnNorthbound::new(client);

        nb.add_bridge("ovnbr-abcde", "abcde12345").await.unwrap();

        let create = ops(&recorded, 1);
        assert_eq!(create.len(), 2);
        assert_eq!(create[0]["op"], "insert");
        assert_eq!(create[0]["table"], "Logical_Switch");
        assert_eq!(create[0]["row"]["name"], "ovnbr-abcde");
        let name = create[0]["uuid-name"].as_str().unwrap();
        assert_eq!(create[1]["where"][0], json!(["_uuid", "==", ["named-uuid", name]]));
        assert_eq!(
            create[1]["mutations"][0],
            json!(["external_ids", "insert", ["map", [["net-id", "abcde12345"]]]])
        );
    }

    #[tokio::test]
    async fn test_add_bridge_is_idempotent() {
        let (client, recorded) = scripted_client(vec![found("s1")]);
        let nb = OvnNorthbound::new(client);

        nb.add_bridge("ovnbr-abcde", "abcde12345").await.unwrap();
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_bridge_missing_after_creation() {
        let (client, _) = scripted_client(vec![
            none(),
            json!([{"uuid": ["uuid", "s1"]}, {"count": 1}]),
            none(),
        ]);
        let nb = OvnNorthbound::new(client);

        let err = nb.add_bridge("ovnbr-abcde", "abcde12345").await.unwrap_err();
        assert!(matches!(err, NetworkError::BridgeNotCreated(_)));
    }

    #[tokio::test]
    async fn test_delete_bridge_refuses_with_ports() {
        let (client, recorded) = scripted_client(vec![json!([{"rows": [
            {"_uuid": ["uuid", "s1"], "ports": ["set", [["uuid", "p1"], ["uuid", "p2"]]]}
        ]}])]);
        let nb = OvnNorthbound::new(client);

        let err = nb.delete_bridge("ovnbr-abcde").await.unwrap_err();
        assert!(matches!(err, NetworkError::SwitchInUse { ports: 2, .. }));
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_bridge_absent_and_empty() {
        let (client, _) = scripted_client(vec![none()]);
        OvnNorthbound::new(client)
            .delete_bridge("ovnbr-abcde")
            .await
            .unwrap();

        let (client, recorded) = scripted_client(vec![found("s1"), json!([{"count": 1}])]);
        OvnNorthbound::new(client)
            .delete_bridge("ovnbr-abcde")
            .await
            .unwrap();
        assert_eq!(
            ops(&recorded, 1)[0],
            json!({"op": "delete", "table": "Logical_Switch", "where": [["_uuid", "==", ["uuid", "s1"]]]})
        );
    }

    #[tokio::test]
    async fn test_add_logical_port_links_named_row() {
        let (client, recorded) =
            scripted_client(vec![json!([{"uuid": ["uuid", "p1"]}, {"count": 1}])]);
        let nb = OvnNorthbound::new(client);

        nb.add_logical_port("ovnbr-abcde", "brabcde-fghij").await.unwrap();

        let sent = ops(&recorded, 0);
        assert_eq!(sent[0]["row"], json!({"name": "brabcde-fghij", "type": "", "up": false}));
        let name = sent[0]["uuid-name"].as_str().unwrap();
        assert_eq!(
            sent[1]["mutations"][0],
            json!(["ports", "insert", ["set", [["named-uuid", name]]]])
        );
    }

    #[tokio::test]
    async fn test_add_logical_port_missing_switch() {
        let (client, _) = scripted_client(vec![json!([{"uuid": ["uuid", "p1"]}, {"count": 0}])]);
        let err = OvnNorthbound::new(client)
            .add_logical_port("ovnbr-abcde", "brabcde-fghij")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::SwitchNotFound(_)));
    }

    #[tokio::test]
    async fn test_add_logical_port_operation_error() {
        let (client, _) = scripted_client(vec![json!([
            {"error": "constraint violation", "details": "duplicate"},
            null
        ])]);
        let err = OvnNorthbound::new(client)
            .add_logical_port("ovnbr-abcde", "brabcde-fghij")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::Ovsdb(OvsdbError::OperationFailed { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_del_logical_port_uses_real_uuid() {
        let (client, recorded) = scripted_client(vec![found("9a1e"), json!([{"count": 1}])]);
        OvnNorthbound::new(client)
            .del_logical_port("ovnbr-abcde", "brabcde-fghij")
            .await
            .unwrap();

        assert_eq!(
            ops(&recorded, 1)[0]["mutations"][0],
            json!(["ports", "delete", ["set", [["uuid", "9a1e"]]]])
        );
    }

    #[tokio::test]
    async fn test_del_logical_port_not_found() {
        let (client, recorded) = scripted_client(vec![none()]);
        let err = OvnNorthbound::new(client)
            .del_logical_port("ovnbr-abcde", "brabcde-fghij")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::PortNotFound(_)));
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_logical_port_addr() {
        let (client, recorded) = scripted_client(vec![json!([{"count": 1}])]);
        OvnNorthbound::new(client)
            .set_logical_port_addr("brabcde-fghij", "10.0.0.5", "7a:42:0a:00:00:05")
            .await
            .unwrap();

        assert_eq!(
            ops(&recorded, 0)[0]["mutations"][0],
            json!(["addresses", "insert", ["set", ["7a:42:0a:00:00:05 10.0.0.5"]]])
        );
    }

    #[tokio::test]
    async fn test_short_reply_fails() {
        let (client, _) = scripted_client(vec![json!([])]);
        let err = OvnNorthbound::new(client)
            .bridge_exists("ovnbr-abcde")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Ovsdb(OvsdbError::ReplyCount { .. })));
    }
}
