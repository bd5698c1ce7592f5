//! Container engine inventory used for startup reconciliation
//!
//! [`ContainerEngine`] abstracts the engine API so reconciliation can run
//! against [`BollardEngine`] in production and an in-memory engine in tests.

use async_trait::async_trait;
use bollard::network::{InspectNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Container engine unavailable: {0}")]
    Unavailable(String),
}

/// A container attached to a network
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineEndpoint {
    pub endpoint_id: String,
    /// IPv4 CIDR, e.g. `10.0.0.5/24`
    pub ipv4_address: String,
    pub mac_address: String,
}

/// A network owned by this driver, as recorded by the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineNetwork {
    pub id: String,
    pub name: String,
    pub options: HashMap<String, String>,
    pub endpoints: Vec<EngineEndpoint>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Networks whose driver is `driver`, with options and attachments
    async fn list_networks(&self, driver: &str) -> Result<Vec<EngineNetwork>, InventoryError>;
}

/// Engine inventory over the Docker API
#[derive(Clone)]
pub struct BollardEngine {
    docker: Arc<Docker>,
}

impl BollardEngine {
    /// Connect to the engine's unix socket
    pub fn connect_with_socket(socket_path: &Path) -> Result<Self, InventoryError> {
        let path = socket_path
            .to_str()
            .ok_or_else(|| InventoryError::Unavailable(format!("{}", socket_path.display())))?;
        let docker = Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn list_networks(&self, driver: &str) -> Result<Vec<EngineNetwork>, InventoryError> {
        let mut filters = HashMap::new();
        filters.insert("driver".to_string(), vec![driver.to_string()]);
        let summaries = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await?;

        let mut networks = Vec::new();
        for summary in summaries {
            if summary.driver.as_deref() != Some(driver) {
                continue;
            }
            let Some(id) = summary.id else { continue };

            let detail = self
                .docker
                .inspect_network(&id, None::<InspectNetworkOptions<String>>)
                .await?;
            debug!(
                "Existing network created by this driver: {}",
                detail.name.as_deref().unwrap_or(&id)
            );

            let endpoints = detail
                .containers
                .unwrap_or_default()
                .into_values()
                .filter_map(|c| {
                    Some(EngineEndpoint {
                        endpoint_id: c.endpoint_id?,
                        ipv4_address: c.ipv4_address.unwrap_or_default(),
                        mac_address: c.mac_address.unwrap_or_default(),
                    })
                })
                .collect();

            networks.push(EngineNetwork {
                id,
                name: detail.name.unwrap_or_default(),
                options: detail.options.unwrap_or_default(),
                endpoints,
            });
        }

        Ok(networks)
    }
}
