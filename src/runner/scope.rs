//! Runtime scope shared by the resolution pipeline and running tasks
//!
//! A scope binds the cluster topology, the node provider, the container
//! runtime, the expression evaluator and the variable store. Cloning a scope
//! shares all of them, so every task launched from it sees the same aliases.

use crate::config::Topology;
use crate::error::{ExecutionResult, ExpressionResult};
use crate::provider::Provider;
use crate::runner::{split_command, Evaluator};
use crate::runtime::ContainerRuntime;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Alias to container handle map, safe to share between tasks
///
/// The last write to an alias wins.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    /// Copy of every entry
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Cluster-level operations run around a scope
#[async_trait]
pub trait ClusterHooks: Send + Sync {
    async fn setup(&self, scope: &Scope) -> ExecutionResult<()>;

    async fn teardown(&self, scope: &Scope) -> ExecutionResult<()>;

    /// Make the node addresses usable from task commands
    async fn init_cli(&self, scope: &Scope) -> ExecutionResult<()>;
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl ClusterHooks for NoopHooks {
    async fn setup(&self, _scope: &Scope) -> ExecutionResult<()> {
        Ok(())
    }

    async fn teardown(&self, _scope: &Scope) -> ExecutionResult<()> {
        Ok(())
    }

    async fn init_cli(&self, _scope: &Scope) -> ExecutionResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Scope {
    topology: Arc<RwLock<Topology>>,
    pub provider: Arc<dyn Provider>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub evaluator: Arc<dyn Evaluator>,
    pub hooks: Arc<dyn ClusterHooks>,
    pub vars: VariableStore,
    loops: Arc<AtomicUsize>,
}

impl Scope {
    /// Scope with the interpolating evaluator and no cluster hooks
    pub fn new(
        topology: Topology,
        provider: Arc<dyn Provider>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Scope {
            topology: Arc::new(RwLock::new(topology)),
            provider,
            runtime,
            evaluator: Arc::new(crate::runner::InterpolatingEvaluator::new()),
            hooks: Arc::new(NoopHooks),
            vars: VariableStore::new(),
            loops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ClusterHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Copy of the current topology
    pub fn topology(&self) -> Topology {
        self.topology.read().clone()
    }

    pub fn replace_topology(&self, topology: Topology) {
        *self.topology.write() = topology;
    }

    /// Current pass of the run loop
    pub fn loops(&self) -> usize {
        self.loops.load(Ordering::SeqCst)
    }

    pub fn set_loops(&self, loops: usize) {
        self.loops.store(loops, Ordering::SeqCst);
    }

    pub fn set_alias(&self, key: &str, handle: &str) {
        self.vars.set(key, handle);
    }

    pub fn get_alias(&self, key: &str) -> Option<String> {
        self.vars.get(key)
    }

    pub async fn evaluate(&self, expression: &str) -> ExpressionResult<String> {
        self.evaluator.evaluate(self, expression).await
    }

    /// Evaluate a command template and split it into arguments
    pub async fn compile_command(&self, template: &str) -> ExpressionResult<Vec<String>> {
        let compiled = self.evaluate(template).await?;
        split_command(&compiled)
    }

    pub async fn setup(&self) -> ExecutionResult<()> {
        self.hooks.setup(self).await
    }

    pub async fn teardown(&self) -> ExecutionResult<()> {
        self.hooks.teardown(self).await
    }

    pub async fn init_cli(&self) -> ExecutionResult<()> {
        self.hooks.init_cli(self).await
    }
}
