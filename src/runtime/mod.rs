//! Container runtime collaborator
//!
//! The engine never talks to a container daemon directly. Everything it needs
//! (launching a task, restarting or removing a container, asking for its
//! status) goes through [`ContainerRuntime`].

pub mod docker;
pub mod mock;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runner::Task;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc;

pub use docker::DockerCli;
pub use mock::MockRuntime;

/// One completion signal per launched container: `None` for a clean exit
pub type ErrorSignal = Option<RuntimeError>;

/// A launched task instance
#[derive(Debug)]
pub struct Launch {
    /// Handle of the first container; restarts and aliases refer to it
    pub handle: String,

    /// Every container created for this launch
    pub containers: Vec<String>,

    /// Receives one signal per container as it finishes
    pub errors: mpsc::Receiver<ErrorSignal>,
}

/// Container state as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Other(String),
}

impl ContainerStatus {
    pub fn parse(status: &str) -> Self {
        match status.trim() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle operations the scheduler performs against containers
///
/// Implementations must tolerate concurrent calls from many tasks.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch `max(concurrency, 1)` containers for a task
    ///
    /// Synchronous tasks return only after every container has exited.
    async fn run(&self, task: &Task) -> RuntimeResult<Launch>;

    async fn start_container(&self, handle: &str) -> RuntimeResult<()>;

    async fn kill_container(&self, handle: &str) -> RuntimeResult<()>;

    /// Force-remove a container
    async fn remove_container(&self, handle: &str) -> RuntimeResult<()>;

    async fn copy_from_container(&self, handle: &str, from: &Path, to: &Path)
        -> RuntimeResult<()>;

    /// Fails with [`RuntimeError::NotFound`] once the container is gone
    async fn status(&self, handle: &str) -> RuntimeResult<ContainerStatus>;

    /// Reclaim task containers; `soft` stops them without removing
    async fn remove_managed_containers(&self, soft: bool) -> RuntimeResult<()>;

    /// Purge every container this tool has ever created, servers included
    async fn remove_all_containers(&self) -> RuntimeResult<()>;
}
