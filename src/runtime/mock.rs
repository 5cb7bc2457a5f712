//! Scripted in-memory runtime
//!
//! Records every call and answers status lookups from per-handle scripts.
//! Used by the test suite and by `--dry-run`.

use crate::error::{RuntimeError, RuntimeResult};
use crate::runner::Task;
use crate::runtime::{ContainerRuntime, ContainerStatus, ErrorSignal, Launch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

/// A task launch seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub handle: String,
    pub describe: String,
    pub image: String,
    pub command: Vec<String>,
    pub links: Vec<String>,
    pub is_async: bool,
}

#[derive(Default)]
struct MockState {
    next_id: usize,
    launches: Vec<LaunchRecord>,
    statuses: HashMap<String, VecDeque<RuntimeResult<ContainerStatus>>>,
    signals: VecDeque<ErrorSignal>,
    live: HashSet<String>,
    starts: Vec<String>,
    kills: Vec<String>,
    removals: Vec<String>,
    copies: Vec<(String, PathBuf, PathBuf)>,
    status_calls: usize,
    managed_reclaims: Vec<bool>,
    purges: usize,
    fail_launches: bool,
}

/// Container runtime that never touches a daemon
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the n-th launched container (1-based) will receive
    pub fn handle_for(n: usize) -> String {
        format!("mock-{n}")
    }

    /// Queue status answers for a handle; once drained, live containers
    /// report `running` and removed ones are not found
    pub fn script_status(&self, handle: &str, script: Vec<RuntimeResult<ContainerStatus>>) {
        self.state
            .lock()
            .statuses
            .entry(handle.to_string())
            .or_default()
            .extend(script);
    }

    /// Queue the signals reported by the next launched containers
    pub fn script_signals(&self, signals: Vec<ErrorSignal>) {
        self.state.lock().signals.extend(signals);
    }

    /// Make every subsequent launch fail
    pub fn fail_launches(&self) {
        self.state.lock().fail_launches = true;
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    pub fn starts(&self) -> Vec<String> {
        self.state.lock().starts.clone()
    }

    pub fn kills(&self) -> Vec<String> {
        self.state.lock().kills.clone()
    }

    pub fn removals(&self) -> Vec<String> {
        self.state.lock().removals.clone()
    }

    pub fn copies(&self) -> Vec<(String, PathBuf, PathBuf)> {
        self.state.lock().copies.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    /// `soft` flag of every per-pass reclaim
    pub fn managed_reclaims(&self) -> Vec<bool> {
        self.state.lock().managed_reclaims.clone()
    }

    pub fn purges(&self) -> usize {
        self.state.lock().purges
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn run(&self, task: &Task) -> RuntimeResult<Launch> {
        let instances = task.concurrency.max(1);
        let (tx, rx) = mpsc::channel(instances);
        let mut state = self.state.lock();

        if state.fail_launches {
            return Err(RuntimeError::Command(format!(
                "mock launch refused for {}",
                task.image
            )));
        }

        let mut containers = Vec::with_capacity(instances);
        for _ in 0..instances {
            state.next_id += 1;
            let id = Self::handle_for(state.next_id);
            state.live.insert(id.clone());
            containers.push(id);

            let signal = state.signals.pop_front().flatten();
            // capacity equals the number of instances
            let _ = tx.try_send(signal);
        }

        let handle = containers[0].clone();
        info!(handle = %handle, image = %task.image, command = ?task.command, "launch");
        state.launches.push(LaunchRecord {
            handle: handle.clone(),
            describe: task.describe.clone(),
            image: task.image.clone(),
            command: task.command.clone(),
            links: task.links.clone(),
            is_async: task.is_async,
        });

        Ok(Launch {
            handle,
            containers,
            errors: rx,
        })
    }

    async fn start_container(&self, handle: &str) -> RuntimeResult<()> {
        self.state.lock().starts.push(handle.to_string());
        Ok(())
    }

    async fn kill_container(&self, handle: &str) -> RuntimeResult<()> {
        self.state.lock().kills.push(handle.to_string());
        Ok(())
    }

    async fn remove_container(&self, handle: &str) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        state.live.remove(handle);
        state.removals.push(handle.to_string());
        Ok(())
    }

    async fn copy_from_container(&self, handle: &str, from: &Path, to: &Path) -> RuntimeResult<()> {
        self.state
            .lock()
            .copies
            .push((handle.to_string(), from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    async fn status(&self, handle: &str) -> RuntimeResult<ContainerStatus> {
        let mut state = self.state.lock();
        state.status_calls += 1;

        if let Some(next) = state.statuses.get_mut(handle).and_then(|s| s.pop_front()) {
            return next;
        }
        if state.live.contains(handle) {
            Ok(ContainerStatus::Running)
        } else {
            Err(RuntimeError::NotFound(handle.to_string()))
        }
    }

    async fn remove_managed_containers(&self, soft: bool) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        state.managed_reclaims.push(soft);
        if !soft {
            state.live.clear();
        }
        Ok(())
    }

    async fn remove_all_containers(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        state.purges += 1;
        state.live.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_sends_one_signal_per_instance() {
        let runtime = MockRuntime::new();
        runtime.script_signals(vec![None, Some(RuntimeError::Command("boom".into()))]);

        let task = Task {
            image: "busybox".to_string(),
            concurrency: 3,
            ..Default::default()
        };
        let mut launch = runtime.run(&task).await.unwrap();
        assert_eq!(launch.handle, "mock-1");
        assert_eq!(launch.containers.len(), 3);

        assert_eq!(launch.errors.recv().await, Some(None));
        assert!(matches!(launch.errors.recv().await, Some(Some(_))));
        assert_eq!(launch.errors.recv().await, Some(None));
    }

    #[tokio::test]
    async fn test_status_script_then_fallback() {
        let runtime = MockRuntime::new();
        runtime
            .run(&Task::default())
            .await
            .unwrap();
        runtime.script_status("mock-1", vec![Ok(ContainerStatus::Exited)]);

        assert_eq!(runtime.status("mock-1").await, Ok(ContainerStatus::Exited));
        assert_eq!(runtime.status("mock-1").await, Ok(ContainerStatus::Running));

        runtime.remove_container("mock-1").await.unwrap();
        assert!(matches!(
            runtime.status("mock-1").await,
            Err(RuntimeError::NotFound(_))
        ));
        assert_eq!(runtime.status_calls(), 3);
    }
}
