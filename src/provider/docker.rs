//! Cluster nodes provisioned as local containers

use crate::config::Topology;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{DynamicProvisioning, Provider, ProviderKind};
use crate::runtime::DockerCli;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Default location of the provider options
pub const OPTIONS_FILE: &str = "providers/docker/options.yml";

/// First published admin port
const BASE_PORT: u16 = 8091;

/// Settings read from the options file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerProviderOptions {
    /// Server build, e.g. `7.6.0`
    pub build: String,

    /// Image override; defaults to `couchbase/server:<build>`
    pub image: Option<String>,

    /// Host the published ports are reachable on
    pub host: String,
}

impl Default for DockerProviderOptions {
    fn default() -> Self {
        DockerProviderOptions {
            build: "latest".to_string(),
            image: None,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl DockerProviderOptions {
    pub fn image(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("couchbase/server:{}", self.build))
    }
}

#[derive(Debug, Clone)]
struct ActiveServer {
    id: String,
    port: u16,
}

/// Starts one container per node and publishes its admin port
pub struct DockerProvider {
    cli: DockerCli,
    options: DockerProviderOptions,
    active: Mutex<BTreeMap<String, ActiveServer>>,
}

impl DockerProvider {
    pub fn new(cli: DockerCli, options: DockerProviderOptions) -> Self {
        DockerProvider {
            cli,
            options,
            active: Mutex::new(BTreeMap::new()),
        }
    }

    /// Read options from `path`, falling back to defaults when absent
    pub fn from_options_file(path: &Path) -> Self {
        let options = match std::fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "invalid docker provider options, using defaults");
                DockerProviderOptions::default()
            }),
            Err(_) => DockerProviderOptions::default(),
        };
        Self::new(DockerCli::new(), options)
    }

    fn server(&self, name: &str) -> Option<ActiveServer> {
        self.active.lock().get(name).cloned()
    }
}

#[async_trait]
impl Provider for DockerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    async fn provide_servers(&self, topology: &Topology) -> ProviderResult<()> {
        let image = self.options.image();
        // new nodes are numbered after the ones already running
        let mut index = self.cli.count_servers().await?;

        for name in topology.node_names() {
            let port = BASE_PORT + index as u16;
            let id = self.cli.run_server(&name, &image, port).await?;
            info!(node = %name, port, "started server http://{}:{}", self.options.host, port);
            self.active.lock().insert(name, ActiveServer { id, port });
            index += 1;
        }
        Ok(())
    }

    async fn host_address(&self, name: &str) -> ProviderResult<String> {
        let target = self.server(name).map(|s| s.id).unwrap_or_else(|| name.to_string());
        Ok(self.cli.ip_address(&target).await?)
    }

    async fn rest_url(&self, name: &str) -> ProviderResult<String> {
        let server = self
            .server(name)
            .ok_or_else(|| ProviderError::UnknownNode(name.to_string()))?;
        Ok(format!("{}:{}", self.options.host, server.port))
    }

    fn dynamic(&self) -> Option<&dyn DynamicProvisioning> {
        Some(self)
    }
}

#[async_trait]
impl DynamicProvisioning for DockerProvider {
    fn link_pairs(&self) -> String {
        self.active.lock().keys().cloned().collect::<Vec<_>>().join(",")
    }

    async fn save_logs(&self, dir: &Path) -> ProviderResult<()> {
        let servers: Vec<(String, String)> = self
            .active
            .lock()
            .iter()
            .map(|(name, s)| (name.clone(), s.id.clone()))
            .collect();

        tokio::fs::create_dir_all(dir).await?;

        for (name, id) in servers {
            let logs = self.cli.logs(&id).await?;
            let path = dir.join(format!("{name}.log"));
            if let Err(e) = tokio::fs::write(&path, logs).await {
                warn!(path = %path.display(), error = %e, "could not write server log");
            }
        }
        Ok(())
    }

    async fn remove_servers(&self, soft: bool) -> ProviderResult<()> {
        self.cli.remove_servers(soft).await?;
        if !soft {
            self.active.lock().clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_image() {
        let options = DockerProviderOptions {
            build: "7.6.0".to_string(),
            ..Default::default()
        };
        assert_eq!(options.image(), "couchbase/server:7.6.0");

        let options = DockerProviderOptions {
            image: Some("local/cb:dev".to_string()),
            ..Default::default()
        };
        assert_eq!(options.image(), "local/cb:dev");
    }

    #[test]
    fn test_link_pairs_sorted() {
        let provider = DockerProvider::new(DockerCli::new(), DockerProviderOptions::default());
        {
            let mut active = provider.active.lock();
            active.insert("node2".to_string(), ActiveServer { id: "b".into(), port: 8092 });
            active.insert("node1".to_string(), ActiveServer { id: "a".into(), port: 8091 });
        }
        assert_eq!(provider.link_pairs(), "node1,node2");
    }

    #[tokio::test]
    async fn test_rest_url_unknown_node() {
        let provider = DockerProvider::new(DockerCli::new(), DockerProviderOptions::default());
        assert!(matches!(
            provider.rest_url("node9").await,
            Err(ProviderError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_missing_options_file_uses_defaults() {
        let provider = DockerProvider::from_options_file(Path::new("/nonexistent/options.yml"));
        assert_eq!(provider.options.image(), "couchbase/server:latest");
    }
}
