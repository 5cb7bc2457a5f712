//! Docker CLI runtime
//!
//! Drives containers through the `docker` binary. Every container created
//! here carries the managed label so it can be reclaimed later; task
//! containers and cluster servers carry an additional role label.

use crate::error::{RuntimeError, RuntimeResult};
use crate::runner::Task;
use crate::runtime::{ContainerRuntime, ContainerStatus, ErrorSignal, Launch};
use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const MANAGED_LABEL: &str = "canopy.managed";
const TASK_LABEL: &str = "canopy.task";
const SERVER_LABEL: &str = "canopy.server";

/// Container runtime backed by the docker command line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        DockerCli {
            binary: binary.into(),
        }
    }

    /// Run a docker subcommand and return its trimmed stdout
    async fn docker<I, S>(&self, args: I) -> RuntimeResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::Command(format!("failed to invoke docker: {e}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("No such container") || stderr.contains("No such object") {
            Err(RuntimeError::NotFound(stderr))
        } else {
            Err(RuntimeError::Command(stderr))
        }
    }

    /// IDs of containers carrying `label`
    async fn list_labeled(&self, label: &str) -> RuntimeResult<Vec<String>> {
        let out = self
            .docker(["ps", "-aq", "--filter", &format!("label={label}=true")])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Start a cluster server container publishing its admin port
    pub async fn run_server(&self, name: &str, image: &str, host_port: u16) -> RuntimeResult<String> {
        self.docker([
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{MANAGED_LABEL}=true"),
            "--label".to_string(),
            format!("{SERVER_LABEL}=true"),
            "-p".to_string(),
            format!("{host_port}:8091"),
            image.to_string(),
        ])
        .await
    }

    /// Number of server containers, running or not
    pub async fn count_servers(&self) -> RuntimeResult<usize> {
        Ok(self.list_labeled(SERVER_LABEL).await?.len())
    }

    /// Remove (or with `soft`, stop) every server container
    pub async fn remove_servers(&self, soft: bool) -> RuntimeResult<()> {
        let ids = self.list_labeled(SERVER_LABEL).await?;
        self.reclaim(ids, soft).await
    }

    /// Bridge network address of a container
    pub async fn ip_address(&self, container: &str) -> RuntimeResult<String> {
        self.docker([
            "inspect",
            "-f",
            "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
            container,
        ])
        .await
    }

    /// Combined stdout/stderr log of a container
    pub async fn logs(&self, container: &str) -> RuntimeResult<String> {
        let output = Command::new(&self.binary)
            .args(["logs", container])
            .output()
            .await
            .map_err(|e| RuntimeError::Command(format!("failed to invoke docker: {e}")))?;

        let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn reclaim(&self, ids: Vec<String>, soft: bool) -> RuntimeResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let verb = if soft { vec!["kill"] } else { vec!["rm", "-f"] };
        let args: Vec<String> = verb
            .into_iter()
            .map(str::to_string)
            .chain(ids)
            .collect();

        match self.docker(args).await {
            Ok(_) => Ok(()),
            // killing an already stopped container is not a failure
            Err(RuntimeError::Command(msg)) if soft && msg.contains("is not running") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn run_args(task: &Task) -> Vec<String> {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            format!("{}-{}", task.name, suffix.to_lowercase()),
            "--label".to_string(),
            format!("{MANAGED_LABEL}=true"),
            "--label".to_string(),
            format!("{TASK_LABEL}=true"),
        ];
        for link in &task.links {
            args.push("--link".to_string());
            args.push(link.clone());
        }
        if let Some(entrypoint) = &task.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }
        args.push(task.image.clone());
        args.extend(task.command.iter().cloned());
        args
    }

    /// Wait for one container and translate its exit into a signal
    async fn watch_container(&self, task: &Task, id: &str) -> ErrorSignal {
        let wait = self.docker(["wait", id]);

        let result = if task.duration.is_zero() {
            wait.await
        } else {
            tokio::select! {
                res = wait => res,
                _ = tokio::time::sleep(task.duration) => {
                    debug!(container = %short(id), "duration elapsed, removing");
                    if task.log_level > 0 {
                        self.save_task_log(task, id).await;
                    }
                    return self.remove_container(id).await.err();
                }
            }
        };

        if task.log_level > 0 {
            self.save_task_log(task, id).await;
        }

        match result {
            Ok(code) => match code.trim().parse::<i32>() {
                Ok(0) => None,
                Ok(code) => Some(RuntimeError::Exited {
                    handle: id.to_string(),
                    code,
                }),
                Err(_) => Some(RuntimeError::Command(format!(
                    "unexpected wait output for {}: {code}",
                    short(id)
                ))),
            },
            Err(e) => Some(e),
        }
    }

    async fn save_task_log(&self, task: &Task, id: &str) {
        let logs = match self.logs(id).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(container = %short(id), error = %e, "could not read container logs");
                return;
            }
        };
        let path = task.log_dir.join(format!("{}-{}.log", task.name, short(id)));
        if let Err(e) = tokio::fs::create_dir_all(&task.log_dir).await {
            warn!(dir = %task.log_dir.display(), error = %e, "could not create log dir");
            return;
        }
        if let Err(e) = tokio::fs::write(&path, logs).await {
            warn!(path = %path.display(), error = %e, "could not write container log");
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// First 12 characters of a container id
pub fn short(id: &str) -> &str {
    &id[..id.len().min(12)]
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, task: &Task) -> RuntimeResult<Launch> {
        let instances = task.concurrency.max(1);
        let (tx, rx) = mpsc::channel(instances);
        let mut containers = Vec::with_capacity(instances);

        for _ in 0..instances {
            match self.docker(Self::run_args(task)).await {
                Ok(id) => {
                    debug!(container = %short(&id), image = %task.image, "started task container");
                    containers.push(id);
                }
                Err(e) => {
                    // instances already started are not tracked by anyone
                    for id in &containers {
                        if let Err(rm) = self.remove_container(id).await {
                            warn!(container = %short(id), error = %rm, "could not remove partial launch");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut waiters = Vec::with_capacity(instances);
        for id in containers.clone() {
            let runtime = self.clone();
            let task = task.clone();
            let tx = tx.clone();
            waiters.push(tokio::spawn(async move {
                let signal = runtime.watch_container(&task, &id).await;
                let _ = tx.send(signal).await;
            }));
        }

        if !task.is_async {
            for waiter in waiters {
                let _ = waiter.await;
            }
        }

        Ok(Launch {
            handle: containers[0].clone(),
            containers,
            errors: rx,
        })
    }

    async fn start_container(&self, handle: &str) -> RuntimeResult<()> {
        self.docker(["start", handle]).await.map(|_| ())
    }

    async fn kill_container(&self, handle: &str) -> RuntimeResult<()> {
        self.docker(["kill", handle]).await.map(|_| ())
    }

    async fn remove_container(&self, handle: &str) -> RuntimeResult<()> {
        self.docker(["rm", "-f", handle]).await.map(|_| ())
    }

    async fn copy_from_container(&self, handle: &str, from: &Path, to: &Path) -> RuntimeResult<()> {
        let source = format!("{}:{}", handle, from.display());
        self.docker(["cp".to_string(), source, to.display().to_string()])
            .await
            .map(|_| ())
    }

    async fn status(&self, handle: &str) -> RuntimeResult<ContainerStatus> {
        let status = self.docker(["inspect", "-f", "{{.State.Status}}", handle]).await?;
        Ok(ContainerStatus::parse(&status))
    }

    async fn remove_managed_containers(&self, soft: bool) -> RuntimeResult<()> {
        let ids = self.list_labeled(TASK_LABEL).await?;
        self.reclaim(ids, soft).await
    }

    async fn remove_all_containers(&self) -> RuntimeResult<()> {
        let ids = self.list_labeled(MANAGED_LABEL).await?;
        self.reclaim(ids, false).await
    }
}
