//! Shell command handling
//!
//! Splits compiled task commands into argument vectors and runs the shell
//! hooks configured for scope setup and teardown.

use crate::config::HookConfig;
use crate::error::{ExecutionError, ExecutionResult, ExpressionError, ExpressionResult};
use crate::runner::{ClusterHooks, Scope};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Split a command line into arguments
///
/// Whitespace separates arguments except inside single or double quotes.
/// Quotes are removed; a backslash escapes the next character outside
/// single quotes.
pub fn split_command(input: &str) -> ExpressionResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' {
                    match chars.next() {
                        Some(next) if next == q || next == '\\' => current.push(next),
                        Some(next) => {
                            current.push('\\');
                            current.push(next);
                        }
                        None => current.push('\\'),
                    }
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(ExpressionError::InvalidSyntax(format!(
            "unterminated quote in '{}'",
            input
        )));
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Runs configured shell commands for scope setup, teardown and cli init
#[derive(Debug, Clone, Default)]
pub struct ShellHooks {
    config: HookConfig,
    interpreter: Vec<String>,
}

impl ShellHooks {
    pub fn new(config: HookConfig) -> Self {
        ShellHooks {
            config,
            interpreter: vec!["sh".to_string(), "-c".to_string()],
        }
    }

    /// Set the interpreter (e.g., `["bash", "-c"]`)
    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.interpreter = interpreter;
        self
    }

    async fn run_hook(&self, name: &str, command: Option<&str>, scope: &Scope) -> ExecutionResult<()> {
        let Some(command) = command else {
            debug!(hook = name, "no hook configured");
            return Ok(());
        };

        let exec_str = scope
            .evaluate(command)
            .await
            .map_err(|e| ExecutionError::Hook {
                name: name.to_string(),
                error: e.to_string(),
            })?;
        info!(hook = name, command = %exec_str, "running hook");

        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| ExecutionError::Hook {
                name: name.to_string(),
                error: "empty interpreter".to_string(),
            })?;

        let status = Command::new(program)
            .args(args)
            .arg(&exec_str)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| ExecutionError::Hook {
                name: name.to_string(),
                error: e.to_string(),
            })?;

        if !status.success() {
            return Err(ExecutionError::CommandFailed(status.code()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterHooks for ShellHooks {
    async fn setup(&self, scope: &Scope) -> ExecutionResult<()> {
        self.run_hook("setup", self.config.setup.as_deref(), scope).await
    }

    async fn teardown(&self, scope: &Scope) -> ExecutionResult<()> {
        self.run_hook("teardown", self.config.teardown.as_deref(), scope)
            .await
    }

    async fn init_cli(&self, scope: &Scope) -> ExecutionResult<()> {
        self.run_hook("init_cli", self.config.init_cli.as_deref(), scope)
            .await
    }
}
