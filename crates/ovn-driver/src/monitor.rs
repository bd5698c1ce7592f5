//! Northbound change monitor
//!
//! Keeps a row cache of `OVN_Northbound` and merges logical switches created
//! by other actors into the local state. It only ever inserts networks the
//! store does not already know.

use ovn_ovsdb::{datum, RowCache, Subscription, TableUpdates};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DriverError, Result};
use crate::state::{NetworkState, StateStore};
use ovn_network::NorthboundClient;

const LOGICAL_SWITCH: &str = "Logical_Switch";

/// Running monitor task and its cache
pub struct ChangeMonitor {
    cache: Arc<RwLock<RowCache>>,
    handle: JoinHandle<()>,
}

impl ChangeMonitor {
    /// Subscribe to the northbound database and start consuming updates
    pub async fn start(northbound: &dyn NorthboundClient, state: StateStore) -> Result<Self> {
        let subscription = northbound
            .subscribe()
            .await
            .map_err(|e| DriverError::transaction("failed to monitor the northbound database", e))?;
        Ok(Self::spawn(subscription, state))
    }

    /// Start from an existing subscription
    pub fn spawn(subscription: Subscription, state: StateStore) -> Self {
        let Subscription {
            initial,
            mut updates,
        } = subscription;

        let mut cache = RowCache::new();
        cache.apply(&initial);
        info!(
            "Northbound cache primed with {} logical switch(es)",
            cache.len(LOGICAL_SWITCH)
        );
        let cache = Arc::new(RwLock::new(cache));

        let task_cache = Arc::clone(&cache);
        let handle = tokio::spawn(async move {
            while let Some(batch) = updates.recv().await {
                task_cache.write().await.apply(&batch);
                merge_remote_switches(&batch, &state).await;
            }
            warn!("Northbound update stream closed, change monitor stopped");
        });

        Self { cache, handle }
    }

    pub fn cache(&self) -> &Arc<RwLock<RowCache>> {
        &self.cache
    }

    pub fn handle(&self) -> &JoinHandle<()> {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Insert a NetworkState for every newly inserted switch tagged with `net-id`
async fn merge_remote_switches(batch: &TableUpdates, state: &StateStore) {
    let Some(rows) = batch.get(LOGICAL_SWITCH) else {
        return;
    };

    for (uuid, update) in rows {
        if !update.is_insert() {
            continue;
        }
        let Some(row) = update.new.as_ref() else {
            continue;
        };

        let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
        let net_id = row
            .get("external_ids")
            .and_then(|ids| datum::map_get(ids, "net-id"))
            .and_then(Value::as_str);

        let Some(net_id) = net_id else {
            debug!("Logical switch {} ({}) has no net-id, ignoring", name, uuid);
            continue;
        };

        if state
            .insert_network_if_absent(NetworkState::synthesized(net_id, name))
            .await
        {
            info!("Merged remotely created network {} on {}", net_id, name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn updates(value: Value) -> TableUpdates {
        serde_json::from_value(value).unwrap()
    }

    async fn settle(store: &StateStore, networks: usize) {
        for _ in 0..100 {
            if store.network_count().await == networks {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_remote_switch_is_merged() {
        let store = StateStore::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = ChangeMonitor::spawn(
            Subscription {
                initial: TableUpdates::new(),
                updates: rx,
            },
            store.clone(),
        );

        tx.send(updates(json!({
            "Logical_Switch": {"u1": {"new": {
                "name": "ovnbr-remot",
                "external_ids": ["map", [["net-id", "remote12345"]]]
            }}}
        })))
        .unwrap();
        settle(&store, 1).await;

        let network = store.network("remote12345").await.unwrap();
        assert_eq!(network.bridge_name, "ovnbr-remot");
        assert_eq!(monitor.cache().read().await.len("Logical_Switch"), 1);
    }

    #[tokio::test]
    async fn test_existing_network_is_not_overwritten() {
        let store = StateStore::new();
        let mut local = NetworkState::synthesized("abcde12345", "ovnbr-abcde");
        local.gateway = "10.0.0.1".into();
        assert!(store.insert_network_if_absent(local).await);

        merge_remote_switches(
            &updates(json!({
                "Logical_Switch": {"u1": {"new": {
                    "name": "other-name",
                    "external_ids": ["map", [["net-id", "abcde12345"]]]
                }}}
            })),
            &store,
        )
        .await;

        let kept = store.network("abcde12345").await.unwrap();
        assert_eq!(kept.bridge_name, "ovnbr-abcde");
        assert_eq!(kept.gateway, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_modifications_and_untagged_rows_are_ignored() {
        let store = StateStore::new();
        merge_remote_switches(
            &updates(json!({
                "Logical_Switch": {
                    "u1": {"new": {"name": "plain", "external_ids": ["map", []]}},
                    "u2": {
                        "old": {"ports": ["set", []]},
                        "new": {"name": "modified", "external_ids": ["map", [["net-id", "zzz"]]]}
                    }
                }
            })),
            &store,
        )
        .await;
        assert_eq!(store.network_count().await, 0);
    }

    #[tokio::test]
    async fn test_monitor_stops_when_stream_closes() {
        let (tx, rx) = mpsc::unbounded_channel::<TableUpdates>();
        let monitor = ChangeMonitor::spawn(
            Subscription {
                initial: updates(json!({"Logical_Switch": {"u1": {"new": {"name": "a"}}}})),
                updates: rx,
            },
            StateStore::new(),
        );
        assert_eq!(monitor.cache().read().await.len("Logical_Switch"), 1);

        drop(tx);
        for _ in 0..100 {
            if !monitor.is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!monitor.is_running());
    }
}
