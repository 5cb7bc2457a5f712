//! Task execution types and lifecycle
//!
//! A [`Task`] is the compiled form of a plain action. The [`TaskController`]
//! drives one task through its before gate, launch, error drain, repeat
//! controller and until watcher.

use crate::config::{Action, Timings};
use crate::error::{is_not_found, RuntimeError};
use crate::report::Report;
use crate::runner::{bind_self, check_condition, Scope};
use crate::runtime::{ContainerRuntime, ContainerStatus, ErrorSignal};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Container handles created for a task, shared by every clone of it
#[derive(Debug, Clone, Default)]
pub struct TrackedContainers(Arc<Mutex<Vec<String>>>);

impl TrackedContainers {
    pub fn track(&self, handles: &[String]) {
        self.0.lock().extend_from_slice(handles);
    }

    pub fn handles(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Runtime task representation
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// Container name prefix
    pub name: String,

    pub describe: String,

    pub image: String,

    /// Compiled command arguments
    pub command: Vec<String>,

    pub entrypoint: Option<String>,

    /// Launch without waiting for the containers to exit
    pub is_async: bool,

    /// Containers still running after this long are removed; zero is unbounded
    pub duration: Duration,

    pub concurrency: usize,

    pub log_level: u8,

    pub log_dir: PathBuf,

    /// Cluster nodes the task containers link to
    pub links: Vec<String>,

    pub containers: TrackedContainers,
}

/// Reaction to a task error: diagnostics collection, termination
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn task_failed(&self, scope: &Scope, describe: &str, error: &RuntimeError);
}

/// Six random alphanumeric characters
pub fn random_alias() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

/// Drives a single task from its before gate to its final removal
#[derive(Clone)]
pub struct TaskController {
    scope: Scope,
    report: Arc<Report>,
    timings: Timings,
    errors: Arc<dyn ErrorHandler>,
}

impl TaskController {
    pub fn new(
        scope: Scope,
        report: Arc<Report>,
        timings: Timings,
        errors: Arc<dyn ErrorHandler>,
    ) -> Self {
        TaskController {
            scope,
            report,
            timings,
            errors,
        }
    }

    pub async fn run(&self, task: Task, action: &Action) {
        let alias = if action.alias.is_empty() {
            random_alias()
        } else {
            action.alias.clone()
        };

        if !action.before.is_empty() {
            self.wait_for(&action.before).await;
        }

        if task.command.is_empty() {
            debug!(task = %task.describe, "empty command, nothing to launch");
            return;
        }

        let (launched_tx, until) = if action.until.is_empty() {
            (None, None)
        } else {
            let (launched_tx, launched_rx) = oneshot::channel();
            let (tx, rx) = oneshot::channel();
            let scope = self.scope.clone();
            let alias = alias.clone();
            let condition = action.until.clone();
            let interval = self.timings.until_poll;
            let watcher = tokio::spawn(async move {
                until_watcher(scope, alias, condition, launched_rx, interval).await;
                let _ = tx.send(());
            });
            (Some(launched_tx), Some((watcher, rx)))
        };

        let launch = match self.scope.runtime.run(&task).await {
            Ok(launch) => launch,
            Err(e) => {
                warn!(task = %task.describe, error = %e, "launch failed");
                if let Some((watcher, _)) = until {
                    watcher.abort();
                }
                self.report.not_ok(&task.describe, e.to_string());
                self.errors.task_failed(&self.scope, &task.describe, &e).await;
                return;
            }
        };

        task.containers.track(&launch.containers);
        self.scope.set_alias(&alias, &launch.handle);
        if let Some(launched) = launched_tx {
            let _ = launched.send(launch.handle.clone());
        }
        info!(alias = %alias, handle = %launch.handle, "{}", task.describe);

        tokio::spawn(drain_errors(
            launch.errors,
            task.concurrency.max(1),
            task.describe.clone(),
            self.scope.clone(),
            self.report.clone(),
            self.errors.clone(),
        ));

        let repeat_done = if action.repeat != 0 {
            let (tx, rx) = oneshot::channel();
            let runtime = self.scope.runtime.clone();
            let handle = launch.handle.clone();
            let repeat = action.repeat;
            let interval = self.timings.repeat_poll;
            tokio::spawn(async move {
                repeat_controller(runtime, handle, repeat, interval).await;
                let _ = tx.send(());
            });
            Some(rx)
        } else {
            None
        };

        if action.repeat > 0 {
            if let Some(done) = repeat_done {
                let _ = done.await;
            }
            self.remove_tracked(&task).await;
        }

        if let Some((_, done)) = until {
            let _ = done.await;
            self.remove_tracked(&task).await;
        }
    }

    /// Poll a before condition until it holds
    async fn wait_for(&self, condition: &str) {
        loop {
            if check_condition(&self.scope, condition).await {
                return;
            }
            debug!(condition = %condition, "waiting for before condition");
            tokio::time::sleep(self.timings.before_poll).await;
        }
    }

    async fn remove_tracked(&self, task: &Task) {
        for handle in task.containers.handles() {
            if let Err(e) = self.scope.runtime.remove_container(&handle).await {
                debug!(handle = %handle, error = %e, "container already gone");
            }
        }
    }
}

/// Receive the completion signals of a launch
///
/// Waits for `expected` signals, recording each in the report and handing
/// failures to `handler`, then closes the channel. Returns the number of
/// signals received.
pub async fn drain_errors(
    mut errors: mpsc::Receiver<ErrorSignal>,
    expected: usize,
    describe: String,
    scope: Scope,
    report: Arc<Report>,
    handler: Arc<dyn ErrorHandler>,
) -> usize {
    let mut received = 0;

    while received < expected {
        match errors.recv().await {
            Some(None) => report.ok(&describe),
            Some(Some(error)) => {
                warn!(task = %describe, error = %error, "task reported an error");
                report.not_ok(&describe, error.to_string());
                handler.task_failed(&scope, &describe, &error).await;
            }
            None => {
                debug!(task = %describe, received, expected, "error channel closed early");
                break;
            }
        }
        received += 1;
    }

    errors.close();
    received
}

/// Restart a container each time it exits
///
/// A positive `repeat` counts restarts down to zero; `-1` restarts until
/// the container disappears. Returns the number of restarts issued.
pub async fn repeat_controller(
    runtime: Arc<dyn ContainerRuntime>,
    handle: String,
    mut repeat: i64,
    interval: Duration,
) -> usize {
    let mut restarts = 0;

    while repeat != 0 {
        match runtime.status(&handle).await {
            Ok(ContainerStatus::Exited) => {
                match runtime.start_container(&handle).await {
                    Ok(()) => restarts += 1,
                    Err(e) => warn!(handle = %handle, error = %e, "restart failed"),
                }
                if repeat > 0 {
                    repeat -= 1;
                    if repeat == 0 {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                if is_not_found(&e) {
                    debug!(handle = %handle, "container removed, stopping repeats");
                } else {
                    warn!(handle = %handle, error = %e, "status lookup failed, stopping repeats");
                }
                break;
            }
        }
        tokio::time::sleep(interval).await;
    }

    restarts
}

/// Wait until `condition` holds for the container launched by this task
///
/// The watcher idles until `launched` delivers the task's handle, so a
/// handle left under `alias` by an earlier task is never polled. It also
/// completes when the container is gone or the launch never happened.
/// Returns the number of condition evaluations.
pub async fn until_watcher(
    scope: Scope,
    alias: String,
    condition: String,
    launched: oneshot::Receiver<String>,
    interval: Duration,
) -> usize {
    let condition = bind_self(&condition, &alias);
    let mut evaluations = 0;

    let Ok(handle) = launched.await else {
        debug!(alias = %alias, "task never launched, until watcher done");
        return evaluations;
    };

    loop {
        if let Err(e) = scope.runtime.status(&handle).await {
            if !is_not_found(&e) {
                warn!(alias = %alias, error = %e, "status lookup failed");
            }
            debug!(alias = %alias, "container gone, until watcher done");
            break;
        }

        evaluations += 1;
        if check_condition(&scope, &condition).await {
            debug!(alias = %alias, condition = %condition, "until condition met");
            break;
        }
        tokio::time::sleep(interval).await;
    }

    evaluations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Topology;
    use crate::error::{ExpressionResult, RuntimeResult};
    use crate::provider::DevProvider;
    use crate::runner::scope::tests::mock_scope;
    use crate::runner::Evaluator;
    use crate::runtime::{Launch, MockRuntime};
    use std::path::Path;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(1);

    #[derive(Default)]
    struct CountingHandler {
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ErrorHandler for CountingHandler {
        async fn task_failed(&self, _scope: &Scope, _describe: &str, _error: &RuntimeError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Answers from a script, then `true`
    #[derive(Default)]
    struct ScriptedEvaluator {
        answers: Mutex<VecDeque<&'static str>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Evaluator for ScriptedEvaluator {
        async fn evaluate(&self, _scope: &Scope, _expression: &str) -> ExpressionResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers.lock().pop_front().unwrap_or("true").to_string())
        }
    }

    fn task(command: &str) -> Task {
        Task {
            name: "canopy".to_string(),
            describe: format!("start busybox: {command}"),
            image: "busybox".to_string(),
            command: command.split_whitespace().map(String::from).collect(),
            is_async: true,
            ..Default::default()
        }
    }

    fn controller(scope: Scope, handler: Arc<CountingHandler>) -> (TaskController, Arc<Report>) {
        let report = Arc::new(Report::plain());
        let controller =
            TaskController::new(scope, report.clone(), Timings::uniform(TICK), handler);
        (controller, report)
    }

    #[tokio::test]
    async fn test_repeat_restarts_exactly_twice() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_status(
            "mock-1",
            vec![
                Ok(ContainerStatus::Running),
                Ok(ContainerStatus::Exited),
                Ok(ContainerStatus::Running),
                Ok(ContainerStatus::Exited),
                Ok(ContainerStatus::Running),
            ],
        );

        let restarts = repeat_controller(runtime.clone(), "mock-1".to_string(), 2, TICK).await;

        assert_eq!(restarts, 2);
        assert_eq!(runtime.starts(), vec!["mock-1", "mock-1"]);
        // completes on the second restart, before polling again
        assert_eq!(runtime.status_calls(), 4);
    }

    #[tokio::test]
    async fn test_repeat_stops_when_container_removed() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_status(
            "mock-1",
            vec![
                Ok(ContainerStatus::Running),
                Err(RuntimeError::NotFound("mock-1".to_string())),
                Ok(ContainerStatus::Exited),
            ],
        );

        let restarts = repeat_controller(runtime.clone(), "mock-1".to_string(), -1, TICK).await;

        assert_eq!(restarts, 0);
        assert!(runtime.starts().is_empty());
        assert_eq!(runtime.status_calls(), 2);
    }

    #[tokio::test]
    async fn test_until_evaluates_until_true() {
        let (scope, runtime) = mock_scope();
        let evaluator = Arc::new(ScriptedEvaluator::default());
        evaluator
            .answers
            .lock()
            .extend(["false", "false", "false", "true"]);
        let scope = scope.with_evaluator(evaluator.clone());

        let launch = runtime.run(&task("sleep 60")).await.unwrap();
        scope.set_alias("loader", &launch.handle);
        let (tx, rx) = oneshot::channel();
        tx.send(launch.handle.clone()).unwrap();

        let evaluations = until_watcher(
            scope,
            "loader".to_string(),
            "${status:__self__} == exited".to_string(),
            rx,
            TICK,
        )
        .await;

        assert_eq!(evaluations, 4);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_until_waits_for_launch_then_stops_when_gone() {
        let (scope, _) = mock_scope();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            // never launched, so the status lookup fails
            let _ = tx.send("mock-42".to_string());
        });

        let evaluations =
            until_watcher(scope, "late".to_string(), "false".to_string(), rx, TICK).await;
        assert_eq!(evaluations, 0);
    }

    #[tokio::test]
    async fn test_until_ends_when_launch_never_happens() {
        let (scope, _) = mock_scope();
        let (tx, rx) = oneshot::channel::<String>();
        drop(tx);

        let evaluations =
            until_watcher(scope, "lost".to_string(), "false".to_string(), rx, TICK).await;
        assert_eq!(evaluations, 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_every_instance() {
        let (scope, _) = mock_scope();
        let handler = Arc::new(CountingHandler::default());
        let report = Arc::new(Report::plain());
        let (tx, rx) = mpsc::channel(3);

        tx.send(None).await.unwrap();
        tx.send(Some(RuntimeError::Command("boom".to_string())))
            .await
            .unwrap();
        let drain = tokio::spawn(drain_errors(
            rx,
            3,
            "load".to_string(),
            scope,
            report.clone(),
            handler.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!drain.is_finished());

        tx.send(None).await.unwrap();
        assert_eq!(drain.await.unwrap(), 3);
        assert_eq!(handler.failures.load(Ordering::SeqCst), 1);
        assert_eq!(report.len(), 3);
        assert_eq!(report.failed(), 1);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_run_records_alias_and_drains() {
        let (scope, runtime) = mock_scope();
        let handler = Arc::new(CountingHandler::default());
        let (controller, report) = controller(scope.clone(), handler);

        let action = Action {
            alias: "loader".to_string(),
            ..Default::default()
        };
        controller.run(task("echo hi"), &action).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(scope.get_alias("loader"), Some("mock-1".to_string()));
        assert_eq!(runtime.launches()[0].command, vec!["echo", "hi"]);
        assert_eq!(report.len(), 1);
    }

    #[tokio::test]
    async fn test_run_generates_random_alias() {
        let (scope, _) = mock_scope();
        let (controller, _) = controller(scope.clone(), Arc::default());

        controller.run(task("echo hi"), &Action::default()).await;

        let vars = scope.vars.snapshot();
        assert_eq!(vars.len(), 1);
        let alias = vars.keys().next().unwrap();
        assert_eq!(alias.len(), 6);
        assert!(alias.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_empty_command_is_noop() {
        let (scope, runtime) = mock_scope();
        let (controller, _) = controller(scope.clone(), Arc::default());

        let action = Action {
            before: "true".to_string(),
            alias: "noop".to_string(),
            ..Default::default()
        };
        controller.run(task(""), &action).await;

        assert!(runtime.launches().is_empty());
        assert!(scope.get_alias("noop").is_none());
    }

    #[tokio::test]
    async fn test_before_gate_polls_until_true() {
        let (scope, runtime) = mock_scope();
        let evaluator = Arc::new(ScriptedEvaluator::default());
        evaluator.answers.lock().extend(["false", "false"]);
        let scope = scope.with_evaluator(evaluator.clone());
        let (controller, _) = controller(scope, Arc::default());

        let action = Action {
            before: "${ready}".to_string(),
            ..Default::default()
        };
        controller.run(task("echo go"), &action).await;

        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(runtime.launches().len(), 1);
    }

    #[tokio::test]
    async fn test_finite_repeat_removes_containers() {
        let (scope, runtime) = mock_scope();
        runtime.script_status("mock-1", vec![Ok(ContainerStatus::Exited)]);
        let (controller, _) = controller(scope, Arc::default());

        let action = Action {
            repeat: 1,
            ..Default::default()
        };
        let mut task = task("echo again");
        task.concurrency = 2;
        controller.run(task, &action).await;

        assert_eq!(runtime.starts(), vec!["mock-1"]);
        assert_eq!(runtime.removals(), vec!["mock-1", "mock-2"]);
    }

    #[tokio::test]
    async fn test_until_removes_containers() {
        let (scope, runtime) = mock_scope();
        let (controller, _) = controller(scope, Arc::default());

        let action = Action {
            alias: "watched".to_string(),
            until: "${watched} == mock-1".to_string(),
            ..Default::default()
        };
        controller.run(task("sleep 60"), &action).await;

        assert_eq!(runtime.removals(), vec!["mock-1"]);
    }

    /// Mock runtime whose launches take a while, like `docker run`
    struct SlowLaunch(Arc<MockRuntime>);

    #[async_trait]
    impl ContainerRuntime for SlowLaunch {
        async fn run(&self, task: &Task) -> RuntimeResult<Launch> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.run(task).await
        }

        async fn start_container(&self, handle: &str) -> RuntimeResult<()> {
            self.0.start_container(handle).await
        }

        async fn kill_container(&self, handle: &str) -> RuntimeResult<()> {
            self.0.kill_container(handle).await
        }

        async fn remove_container(&self, handle: &str) -> RuntimeResult<()> {
            self.0.remove_container(handle).await
        }

        async fn copy_from_container(
            &self,
            handle: &str,
            from: &Path,
            to: &Path,
        ) -> RuntimeResult<()> {
            self.0.copy_from_container(handle, from, to).await
        }

        async fn status(&self, handle: &str) -> RuntimeResult<ContainerStatus> {
            self.0.status(handle).await
        }

        async fn remove_managed_containers(&self, soft: bool) -> RuntimeResult<()> {
            self.0.remove_managed_containers(soft).await
        }

        async fn remove_all_containers(&self) -> RuntimeResult<()> {
            self.0.remove_all_containers().await
        }
    }

    #[tokio::test]
    async fn test_until_ignores_stale_alias_from_earlier_pass() {
        let runtime = Arc::new(MockRuntime::new());
        let scope = Scope::new(
            Topology::default(),
            Arc::new(DevProvider::new("127.0.0.1")),
            Arc::new(SlowLaunch(runtime.clone())),
        );
        // handle from a previous pass, already reclaimed
        scope.set_alias("watched", "mock-0");
        let (controller, _) = controller(scope, Arc::default());

        let action = Action {
            alias: "watched".to_string(),
            until: "false".to_string(),
            ..Default::default()
        };
        let run = tokio::time::timeout(
            Duration::from_millis(300),
            controller.run(task("sleep 60"), &action),
        )
        .await;

        assert!(run.is_err(), "until watcher finished on the stale handle");
        assert!(runtime.removals().is_empty());
        assert_eq!(runtime.launches().len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let (scope, runtime) = mock_scope();
        runtime.fail_launches();
        let handler = Arc::new(CountingHandler::default());
        let (controller, report) = controller(scope.clone(), handler.clone());

        let action = Action {
            alias: "broken".to_string(),
            until: "false".to_string(),
            ..Default::default()
        };
        controller.run(task("echo hi"), &action).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(handler.failures.load(Ordering::SeqCst), 1);
        assert!(scope.get_alias("broken").is_none());
    }
}
