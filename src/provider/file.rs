//! Static hosts read from a file

use crate::config::Topology;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Directory host files are looked up in
const HOST_FILE_DIR: &str = "providers/file";

/// Assigns hosts from a host file to nodes in declaration order
///
/// The host file is a YAML string of space-separated addresses.
pub struct FileProvider {
    host_file: PathBuf,
    addresses: Mutex<HashMap<String, String>>,
}

impl FileProvider {
    /// Host file name relative to `providers/file`
    pub fn new(host_file: &str) -> Self {
        Self::with_path(PathBuf::from(HOST_FILE_DIR).join(host_file))
    }

    pub fn with_path(host_file: PathBuf) -> Self {
        FileProvider {
            host_file,
            addresses: Mutex::new(HashMap::new()),
        }
    }

    fn read_hosts(&self) -> ProviderResult<Vec<String>> {
        let host_error = |error: String| ProviderError::HostFile {
            path: self.host_file.clone(),
            error,
        };
        let contents = std::fs::read_to_string(&self.host_file).map_err(|e| host_error(e.to_string()))?;
        let hosts: String = serde_yaml::from_str(&contents).map_err(|e| host_error(e.to_string()))?;
        Ok(hosts.split_whitespace().map(str::to_string).collect())
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::File
    }

    async fn provide_servers(&self, topology: &Topology) -> ProviderResult<()> {
        let hosts = self.read_hosts()?;
        let mut addresses = self.addresses.lock();
        for (name, host) in topology.node_names().into_iter().zip(hosts) {
            addresses.insert(name, host);
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
        Ok(format!("{}:8091", self.host_address(name).await?))
    }
}
