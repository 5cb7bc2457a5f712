//! Common test utilities

#![allow(dead_code)]

use canopy::config::{Action, RunConfig, Timings, Topology};
use canopy::provider::DevProvider;
use canopy::report::Report;
use canopy::runner::{Engine, RecordingExit, Scope};
use canopy::runtime::MockRuntime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary directory with a canopy.yml file
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("canopy.yml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Create a test config with a nested subdirectory to search from
pub fn create_test_config_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("canopy.yml");
    let sub_dir = temp_dir.path().join("suites").join("smoke");

    fs::write(&config_path, content).unwrap();
    fs::create_dir_all(&sub_dir).unwrap();

    (temp_dir, config_path, sub_dir)
}

/// Write a document into `dir`
pub fn write_doc(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Run configuration with every phase but the test skipped and 1ms timings
pub fn fast_config() -> RunConfig {
    RunConfig {
        provider: "dev".to_string(),
        skip_setup: true,
        skip_teardown: true,
        skip_cleanup: true,
        timings: Timings::uniform(Duration::from_millis(1)),
        ..Default::default()
    }
}

/// Everything an engine run touches, backed by the mock runtime
pub struct Harness {
    pub engine: Engine,
    pub scope: Scope,
    pub runtime: Arc<MockRuntime>,
    pub report: Arc<Report>,
    pub exit: Arc<RecordingExit>,
}

pub fn harness(config: RunConfig, actions: Vec<Action>) -> Harness {
    harness_with_topology(config, actions, Topology::default())
}

pub fn harness_with_topology(config: RunConfig, actions: Vec<Action>, topology: Topology) -> Harness {
    let runtime = Arc::new(MockRuntime::new());
    let scope = Scope::new(
        topology,
        Arc::new(DevProvider::new("127.0.0.1")),
        runtime.clone(),
    );
    let report = Arc::new(Report::plain());
    let exit = Arc::new(RecordingExit::new());
    let engine = Engine::new(config, actions, report.clone(), exit.clone());

    Harness {
        engine,
        scope,
        runtime,
        report,
        exit,
    }
}

/// Give spawned completion drains a moment to record their results
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
