//! Node address providers
//!
//! A provider turns the logical node names of a topology into reachable
//! addresses. Providers that create the nodes themselves expose the
//! [`DynamicProvisioning`] capability.

pub mod dev;
pub mod docker;
pub mod file;

use crate::config::Topology;
use crate::error::{ConfigError, ProviderResult};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use dev::DevProvider;
pub use docker::DockerProvider;
pub use file::FileProvider;

/// Provider variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    File,
    Dev,
    Docker,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::File => "file",
            ProviderKind::Dev => "dev",
            ProviderKind::Docker => "docker",
        })
    }
}

/// Resolves cluster node names to addresses
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Make the nodes of `topology` reachable and record their addresses
    async fn provide_servers(&self, topology: &Topology) -> ProviderResult<()>;

    async fn host_address(&self, name: &str) -> ProviderResult<String>;

    /// Admin REST endpoint (`host:port`) of a node
    async fn rest_url(&self, name: &str) -> ProviderResult<String>;

    /// Present only when the provider creates nodes on demand
    fn dynamic(&self) -> Option<&dyn DynamicProvisioning> {
        None
    }
}

/// Operations available only for providers that create their own nodes
#[async_trait]
pub trait DynamicProvisioning: Send + Sync {
    /// Comma-separated names of the running nodes, for container links
    fn link_pairs(&self) -> String;

    /// Persist node logs under `dir`
    async fn save_logs(&self, dir: &Path) -> ProviderResult<()>;

    /// Remove (or with `soft`, stop) the provisioned nodes
    async fn remove_servers(&self, soft: bool) -> ProviderResult<()>;
}

/// Build a provider from `docker`, `file[:hostfile]` or `dev[:endpoint]`
pub fn provider_from_spec(spec: &str) -> Result<Arc<dyn Provider>, ConfigError> {
    let (kind, arg) = match spec.split_once(':') {
        Some((kind, arg)) => (kind, Some(arg)),
        None => (spec, None),
    };

    match kind {
        "docker" => Ok(Arc::new(DockerProvider::from_options_file(Path::new(
            docker::OPTIONS_FILE,
        )))),
        "file" => Ok(Arc::new(FileProvider::new(arg.unwrap_or("default.yml")))),
        "dev" => Ok(Arc::new(DevProvider::new(arg.unwrap_or("127.0.0.1")))),
        _ => Err(ConfigError::UnknownProvider(spec.to_string())),
    }
}
