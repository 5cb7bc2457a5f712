//! Local development cluster (cluster_run style)

use crate::config::Topology;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// First admin port of a development cluster
const BASE_PORT: u16 = 9000;

/// Nodes of a development cluster share one endpoint on consecutive ports
pub struct DevProvider {
    endpoint: String,
    addresses: Mutex<HashMap<String, String>>,
}

impl DevProvider {
    pub fn new(endpoint: &str) -> Self {
        DevProvider {
            endpoint: endpoint.to_string(),
            addresses: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Provider for DevProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Dev
    }

    async fn provide_servers(&self, topology: &Topology) -> ProviderResult<()> {
        let mut addresses = self.addresses.lock();
        for (i, name) in topology.node_names().into_iter().enumerate() {
            let port = BASE_PORT as usize + i;
            addresses.insert(name, format!("{}:{}", self.endpoint, port));
        }
        Ok(())
    }

    async fn host_address(&self, name: &str) -> ProviderResult<String> {
        self.addresses
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownNode(name.to_string()))
    }

    async fn rest_url(&self, name: &str) -> ProviderResult<String> {
        self.host_address(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSpec;

    #[tokio::test]
    async fn test_consecutive_ports() {
        let provider = DevProvider::new("127.0.0.1");
        let topology = Topology {
            servers: vec![
                ServerSpec {
                    name: "a".to_string(),
                    count: 2,
                    ..Default::default()
                },
                ServerSpec {
                    name: "b".to_string(),
                    count: 1,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        provider.provide_servers(&topology).await.unwrap();

        assert_eq!(provider.rest_url("a1").await.unwrap(), "127.0.0.1:9000");
        assert_eq!(provider.rest_url("a2").await.unwrap(), "127.0.0.1:9001");
        assert_eq!(provider.rest_url("b1").await.unwrap(), "127.0.0.1:9002");
    }
}
