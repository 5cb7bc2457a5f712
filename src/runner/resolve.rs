//! Action resolution
//!
//! Turns each action of a list into concrete work: client operations, scope
//! changes, nested tests, template includes, loops, template references and
//! finally plain tasks handed to the [`TaskController`].

use crate::config::{
    actions_from_file, actions_from_str, include_paths, templates_from_file, topology_from_file,
    Action, ClientOp,
};
use crate::runner::{
    evaluate_condition, expand_template, parse_duration, parse_int, split_args, Engine, Phases,
    Scope, Task, TaskController,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a single action asks for, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive<'a> {
    Client(&'a ClientOp),
    ScopeChange(&'a str),
    NestedTest(&'a str),
    Include(&'a str),
    ForEach(&'a str),
    Template(&'a str),
    Plain,
}

impl<'a> Directive<'a> {
    pub fn classify(action: &'a Action) -> Self {
        if !action.client.is_empty() {
            Directive::Client(&action.client)
        } else if !action.scope.is_empty() {
            Directive::ScopeChange(&action.scope)
        } else if !action.test.is_empty() {
            Directive::NestedTest(&action.test)
        } else if !action.include.is_empty() {
            Directive::Include(&action.include)
        } else if !action.foreach.is_empty() {
            Directive::ForEach(&action.foreach)
        } else if !action.template.is_empty() {
            Directive::Template(&action.template)
        } else {
            Directive::Plain
        }
    }
}

/// Reuse the previous plain action's settings when this one names no image
pub fn carry_forward(previous: Option<&Action>, mut action: Action) -> Action {
    let Some(previous) = previous else {
        return action;
    };
    if action.image.is_empty() {
        action.image = previous.image.clone();
        if action.requires.is_empty() {
            action.requires = previous.requires.clone();
        }
        if action.duration.is_empty() {
            action.duration = previous.duration.clone();
        }
        if action.concurrency.is_empty() {
            action.concurrency = previous.concurrency.clone();
        }
    }
    action
}

/// Loop body for a foreach action: the action itself with the loop removed
pub fn foreach_template(action: &Action) -> Result<String, serde_yaml::Error> {
    let body = Action {
        foreach: String::new(),
        ..action.clone()
    };
    let yaml = serde_yaml::to_string(&vec![body])?;
    Ok(format!("{}{}{{{{end}}}}", action.foreach, yaml))
}

type Resolution<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

impl Engine {
    /// Resolve and run an action list for pass `pass`
    pub fn resolve_actions<'a>(
        &'a self,
        scope: &'a Scope,
        pass: usize,
        actions: &'a [Action],
    ) -> Resolution<'a> {
        Box::pin(async move {
            scope.set_loops(pass);
            let mut last: Option<Action> = None;

            for action in actions {
                match Directive::classify(action) {
                    Directive::Client(op) => self.client_op(scope, op).await,
                    Directive::ScopeChange(spec) => self.change_scope(scope, spec).await,
                    Directive::NestedTest(path) => self.nested_test(scope, path).await,
                    Directive::Include(files) => self.include(files),
                    Directive::ForEach(_) => {
                        if let Some(expanded) = self.expand_foreach(scope, action).await {
                            self.resolve_actions(scope, pass, &expanded).await;
                        }
                    }
                    Directive::Template(_) => {
                        if let Some(expanded) = self.expand_reference(scope, action).await {
                            self.resolve_actions(scope, pass, &expanded).await;
                        }
                    }
                    Directive::Plain => {
                        let action = carry_forward(last.as_ref(), action.clone());
                        self.dispatch(scope, &action).await;
                        last = Some(action);
                    }
                }
            }
        })
    }

    async fn client_op(&self, scope: &Scope, op: &ClientOp) {
        let Some(handle) = scope.get_alias(&op.container) else {
            warn!(alias = %op.container, "no such container alias");
            return;
        };

        let result = match op.op.as_str() {
            "kill" => {
                info!(alias = %op.container, "kill {}", op.container);
                scope.runtime.kill_container(&handle).await
            }
            "rm" | "remove" => {
                info!(alias = %op.container, "remove {}", op.container);
                scope.runtime.remove_container(&handle).await
            }
            "cp" | "copy" => {
                let from = if op.filename.is_empty() {
                    PathBuf::from(&op.frompath)
                } else {
                    Path::new(&op.frompath).join(&op.filename)
                };
                info!(
                    alias = %op.container,
                    "copying files from {}:{} to {}",
                    handle,
                    from.display(),
                    op.topath
                );
                scope
                    .runtime
                    .copy_from_container(&handle, &from, Path::new(&op.topath))
                    .await
            }
            other => {
                warn!(op = %other, "unknown client op");
                return;
            }
        };

        if let Err(e) = result {
            warn!(op = %op.op, alias = %op.container, error = %e, "client op failed");
        }
    }

    async fn change_scope(&self, scope: &Scope, spec: &str) {
        let path = match scope.evaluate(spec).await {
            Ok(path) => path.trim().to_string(),
            Err(e) => {
                warn!(scope = %spec, error = %e, "could not evaluate scope path");
                spec.to_string()
            }
        };
        let topology = match topology_from_file(Path::new(&path)) {
            Ok(topology) => topology,
            Err(e) => {
                warn!(scope = %path, error = %e, "could not load scope, skipping");
                return;
            }
        };

        if let Err(e) = scope.teardown().await {
            warn!(error = %e, "teardown before scope change failed");
        }

        let provision = match scope.provider.dynamic() {
            Some(_) => topology.provisioning_delta(&scope.topology()),
            None => topology.clone(),
        };
        if let Err(e) = scope.provider.provide_servers(&provision).await {
            error!(scope = %path, error = %e, "could not provide servers for new scope");
        }
        scope.replace_topology(topology);
        info!(scope = %path, nodes = ?scope.topology().node_names(), "scope changed");

        if let Err(e) = scope.setup().await {
            warn!(error = %e, "setup after scope change failed");
        }
    }

    async fn nested_test(&self, scope: &Scope, path: &str) {
        let actions = match actions_from_file(Path::new(path)) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(test = %path, error = %e, "could not load nested test, skipping");
                return;
            }
        };

        info!(test = %path, actions = actions.len(), "running nested test");
        let pass = scope.loops();
        if let Err(e) = self.run_phases(scope, &actions, Phases::nested(&self.config)).await {
            warn!(test = %path, error = %e, "nested test failed");
        }
        scope.set_loops(pass);
    }

    fn include(&self, files: &str) {
        for path in include_paths(files) {
            match templates_from_file(&path) {
                Ok(templates) => {
                    debug!(file = %path.display(), count = templates.len(), "included templates");
                    self.templates.insert_all(templates);
                }
                Err(e) => warn!(file = %path.display(), error = %e, "could not include templates"),
            }
        }
    }

    async fn expand_foreach(&self, scope: &Scope, action: &Action) -> Option<Vec<Action>> {
        let template = match foreach_template(action) {
            Ok(template) => template,
            Err(e) => {
                warn!(error = %e, "could not serialize foreach body");
                return None;
            }
        };
        let compiled = match scope.evaluate(&template).await {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(foreach = %action.foreach, error = %e, "could not evaluate foreach");
                return None;
            }
        };
        match actions_from_str(&compiled) {
            Ok(actions) => Some(actions),
            Err(e) => {
                warn!(foreach = %action.foreach, error = %e, "foreach produced invalid actions");
                None
            }
        }
    }

    async fn expand_reference(&self, scope: &Scope, action: &Action) -> Option<Vec<Action>> {
        let Some(body) = self.templates.get(&action.template) else {
            warn!(template = %action.template, "template not found");
            return None;
        };

        let evaluated = match scope.evaluate(&action.args).await {
            Ok(args) => args,
            Err(e) => {
                warn!(args = %action.args, error = %e, "could not evaluate template args");
                action.args.clone()
            }
        };
        Some(expand_template(&body, action, &split_args(&evaluated)))
    }

    /// Compile a plain action into a task and launch it
    async fn dispatch(&self, scope: &Scope, action: &Action) {
        if !action.requires.is_empty() {
            match evaluate_condition(scope, &action.requires).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("skipping due to requirements: {}", action.requires);
                    return;
                }
                Err(e) => {
                    warn!(requires = %action.requires, error = %e, "unreadable requirement");
                    info!("skipping due to requirements: {}", action.requires);
                    return;
                }
            }
        }

        let command = match scope.compile_command(&action.command).await {
            Ok(command) => command,
            Err(e) => {
                warn!(command = %action.command, error = %e, "could not compile command, skipping");
                return;
            }
        };

        let duration = if action.duration.is_empty() {
            Default::default()
        } else {
            match scope.evaluate(&action.duration).await {
                Ok(value) => parse_duration(&value).unwrap_or_else(|e| {
                    warn!(duration = %action.duration, error = %e, "invalid duration");
                    Default::default()
                }),
                Err(e) => {
                    warn!(duration = %action.duration, error = %e, "invalid duration");
                    Default::default()
                }
            }
        };

        let concurrency = if action.concurrency.is_empty() {
            0
        } else {
            let value = match scope.evaluate(&action.concurrency).await {
                Ok(value) => parse_int(&value),
                Err(e) => Err(e),
            };
            value.map(|n| n.max(0) as usize).unwrap_or_else(|e| {
                warn!(concurrency = %action.concurrency, error = %e, "invalid concurrency");
                0
            })
        };

        let describe = if action.describe.is_empty() {
            format!("start {}: {}", action.image, command.join(" "))
        } else {
            action.describe.clone()
        };

        let links = scope
            .provider
            .dynamic()
            .map(|dynamic| {
                dynamic
                    .link_pairs()
                    .split(',')
                    .filter(|link| !link.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let task = Task {
            name: self.config.container_name.clone(),
            describe,
            image: action.image.clone(),
            command,
            entrypoint: (!action.entrypoint.is_empty()).then(|| action.entrypoint.clone()),
            is_async: !action.wait,
            duration,
            concurrency,
            log_level: self.config.log_level,
            log_dir: self.config.log_dir.clone(),
            links,
            containers: Default::default(),
        };

        let controller = TaskController::new(
            scope.clone(),
            self.report.clone(),
            self.config.timings,
            Arc::new(self.clone()),
        );

        if action.wait {
            controller.run(task, action).await;
        } else {
            let action = action.clone();
            tokio::spawn(async move { controller.run(task, &action).await });
        }

        tokio::time::sleep(self.config.timings.settle).await;
    }
}
