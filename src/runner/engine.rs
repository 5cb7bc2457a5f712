//! Run loop
//!
//! SETUP, then the repeat loop over the action list, then the report,
//! TEARDOWN and CLEANUP. A duration budget arms a watchdog that emits the
//! report and exits while the loop is still running.

use crate::config::{actions_from_args, actions_from_file, Action, Mode, RunConfig};
use crate::error::{ConfigError, Result, RuntimeError};
use crate::report::Report;
use crate::runner::{ErrorHandler, Scope, TemplateCache};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ends the process
pub trait ExitHandler: Send + Sync {
    fn exit(&self, code: i32);
}

/// Exits the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl ExitHandler for ProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Records exit requests instead of exiting
#[derive(Debug, Default)]
pub struct RecordingExit {
    codes: Mutex<Vec<i32>>,
}

impl RecordingExit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().clone()
    }
}

impl ExitHandler for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes.lock().push(code);
    }
}

/// Emits the report and exits, at most once per run
struct Terminator {
    report: Arc<Report>,
    exit: Arc<dyn ExitHandler>,
    fired: AtomicBool,
}

impl Terminator {
    fn terminate(&self, code: i32) {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!(code, "already terminating");
            return;
        }
        self.report.emit();
        self.exit.exit(code);
    }
}

/// Which phases a run goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub setup: bool,
    pub test: bool,
    pub teardown: bool,
    pub cleanup: bool,
    pub report: bool,
    /// Arm the duration watchdog
    pub watchdog: bool,
    /// -1 forever, 0 once, N for N+1 passes
    pub repeat: i64,
}

impl Phases {
    pub fn from_config(config: &RunConfig) -> Self {
        Phases {
            setup: !config.skip_setup,
            test: !config.skip_test,
            teardown: !config.skip_teardown,
            cleanup: !config.skip_cleanup,
            report: true,
            watchdog: true,
            repeat: config.repeat,
        }
    }

    /// A nested test: its own passes and report, the parent owns setup,
    /// teardown, cleanup and the watchdog
    ///
    /// With `repeat: -1` the nested document never hands control back.
    pub fn nested(config: &RunConfig) -> Self {
        Phases {
            setup: false,
            test: true,
            teardown: false,
            cleanup: false,
            report: true,
            watchdog: false,
            repeat: config.repeat,
        }
    }
}

/// Action list for a run configuration
pub fn load_actions(config: &RunConfig) -> Result<Vec<Action>> {
    match config.mode {
        Mode::Image => {
            let image = config.image.as_ref().ok_or(ConfigError::MissingImage)?;
            Ok(actions_from_args(&image.name, &image.command, image.wait))
        }
        Mode::Default => {
            let test = config
                .test
                .as_ref()
                .ok_or_else(|| ConfigError::Invalid("no test file configured".to_string()))?;
            actions_from_file(test)
        }
    }
}

/// Owns the run state shared by every task of a run
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: Arc<RunConfig>,
    actions: Arc<Vec<Action>>,
    pub(crate) templates: TemplateCache,
    pub(crate) report: Arc<Report>,
    terminator: Arc<Terminator>,
    collecting: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        config: RunConfig,
        actions: Vec<Action>,
        report: Arc<Report>,
        exit: Arc<dyn ExitHandler>,
    ) -> Self {
        Engine {
            config: Arc::new(config),
            actions: Arc::new(actions),
            templates: TemplateCache::new(),
            terminator: Arc::new(Terminator {
                report: report.clone(),
                exit,
                fired: AtomicBool::new(false),
            }),
            report,
            collecting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub async fn run(&self, scope: &Scope) -> Result<()> {
        let actions = self.actions.clone();
        self.run_phases(scope, &actions, Phases::from_config(&self.config))
            .await
    }

    pub(crate) async fn run_phases(
        &self,
        scope: &Scope,
        actions: &[Action],
        phases: Phases,
    ) -> Result<()> {
        if phases.setup {
            if self.config.mode == Mode::Default {
                scope.runtime.remove_all_containers().await?;
            }
            scope.provider.provide_servers(&scope.topology()).await?;
            scope.setup().await?;
        } else if scope.provider.dynamic().is_none() {
            // static addresses must be known before any command runs
            scope.provider.provide_servers(&scope.topology()).await?;
            scope.init_cli().await?;
        } else {
            scope.init_cli().await?;
        }

        if !phases.test {
            info!("skipping test");
            return Ok(());
        }

        let mut repeat = phases.repeat;
        if phases.watchdog && self.config.duration > 0 {
            self.spawn_watchdog(Duration::from_secs(self.config.duration));
            if repeat == 0 {
                repeat = -1;
            }
        }

        let mut pass = 0usize;
        while repeat < 0 || (pass as i64) <= repeat {
            debug!(pass, "starting pass");
            self.resolve_actions(scope, pass, actions).await;
            if let Err(e) = scope
                .runtime
                .remove_managed_containers(self.config.soft_cleanup)
                .await
            {
                warn!(pass, error = %e, "could not reclaim task containers");
            }
            pass += 1;
        }

        if phases.report {
            self.report.emit();
        }

        if phases.teardown {
            if let Err(e) = scope.teardown().await {
                warn!(error = %e, "teardown failed");
            }
        }

        if phases.cleanup {
            self.cleanup(scope).await;
        }

        Ok(())
    }

    fn spawn_watchdog(&self, budget: Duration) {
        let terminator = self.terminator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            info!(seconds = budget.as_secs(), "duration elapsed, stopping");
            terminator.terminate(0);
        });
    }

    async fn cleanup(&self, scope: &Scope) {
        let soft = self.config.soft_cleanup;
        if let Err(e) = scope.runtime.remove_managed_containers(soft).await {
            warn!(error = %e, "could not remove task containers");
        }

        if let Some(dynamic) = scope.provider.dynamic() {
            if self.config.log_level > 0 {
                if let Err(e) = dynamic.save_logs(&self.config.log_dir).await {
                    warn!(dir = %self.config.log_dir.display(), error = %e, "could not save server logs");
                }
            }
            if let Err(e) = dynamic.remove_servers(soft).await {
                warn!(error = %e, "could not remove servers");
            }
        }
    }

    /// Run the configured diagnostic collection template
    ///
    /// Errors raised while collecting do not trigger another collection.
    pub async fn collect_diagnostics(&self, scope: &Scope) {
        let Some(collect) = self.config.collect.as_ref() else {
            debug!("no diagnostic collection configured");
            return;
        };
        if self.collecting.swap(true, Ordering::SeqCst) {
            debug!("diagnostic collection already running");
            return;
        }

        info!(template = %collect.template, "collecting diagnostics");
        let actions = vec![
            Action {
                include: collect.include.clone(),
                ..Default::default()
            },
            Action {
                template: collect.template.clone(),
                wait: true,
                ..Default::default()
            },
        ];
        let pass = scope.loops();
        self.resolve_actions(scope, pass, &actions).await;

        self.collecting.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ErrorHandler for Engine {
    async fn task_failed(&self, scope: &Scope, describe: &str, error: &RuntimeError) {
        error!(task = %describe, error = %error, "task failed");
        if self.config.collect_on_error {
            self.collect_diagnostics(scope).await;
        }
        if self.config.stop_on_error {
            self.terminator.terminate(1);
        }
    }
}
