//! Default expression evaluator
//!
//! Supports:
//! - `${alias}` - handle recorded under an alias
//! - `${loop}` - current pass of the run loop
//! - `${status:alias}` - container status of an aliased handle
//! - `${host:node}` / `${rest:node}` - provider addresses
//! - `${nodes}` - comma-separated node names of the topology
//! - `${env:NAME}` and, as a fallback, any environment variable
//! - `{{range 3}}...{{end}}`, `{{range 1..4}}`, `{{range a,b}}` with `{{.}}`
//!   standing for the iteration value
//!
//! Unknown variables are left untouched.

use crate::error::{ExpressionError, ExpressionResult};
use crate::runner::{Evaluator, Scope};
use async_trait::async_trait;
use regex::Regex;
use std::env;
use std::sync::OnceLock;
use tracing::debug;

/// Maximum passes over nested interpolations
const MAX_PASSES: usize = 16;

/// Placeholder for the current iteration value inside a range body
pub const RANGE_VALUE: &str = "{{.}}";

fn variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid variable regex"))
}

fn range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\{\{\s*range\s+([^}]*)\}\}(.*?)\{\{\s*end\s*\}\}").expect("valid range regex")
    })
}

/// Evaluator used when no other expression engine is configured
#[derive(Debug, Default, Clone)]
pub struct InterpolatingEvaluator;

impl InterpolatingEvaluator {
    pub fn new() -> Self {
        InterpolatingEvaluator
    }

    async fn lookup(&self, scope: &Scope, name: &str) -> Option<String> {
        if name == "loop" {
            return Some(scope.loops().to_string());
        }
        if name == "nodes" {
            return Some(scope.topology().node_names().join(","));
        }

        if let Some((func, arg)) = name.split_once(':') {
            let arg = arg.trim();
            return match func.trim() {
                "status" => {
                    let handle = scope.vars.get(arg).unwrap_or_else(|| arg.to_string());
                    Some(match scope.runtime.status(&handle).await {
                        Ok(status) => status.to_string(),
                        Err(_) => "missing".to_string(),
                    })
                }
                "host" => scope.provider.host_address(arg).await.ok(),
                "rest" => scope.provider.rest_url(arg).await.ok(),
                "env" => env::var(arg).ok(),
                _ => None,
            };
        }

        scope.vars.get(name).or_else(|| env::var(name).ok())
    }

    /// Replace every resolvable `${...}` token, repeating for nested values
    async fn interpolate(&self, scope: &Scope, input: &str) -> ExpressionResult<String> {
        let mut result = input.to_string();

        for _ in 0..MAX_PASSES {
            let names: Vec<String> = variable_regex()
                .captures_iter(&result)
                .map(|caps| caps[1].to_string())
                .collect();

            let mut changed = false;
            for name in names {
                if let Some(value) = self.lookup(scope, &name).await {
                    let token = format!("${{{}}}", name);
                    if value != token {
                        result = result.replace(&token, &value);
                        changed = true;
                    }
                } else {
                    debug!(variable = %name, "unresolved variable left as-is");
                }
            }

            if !changed {
                return Ok(result);
            }
        }

        Err(ExpressionError::RecursiveInterpolation)
    }
}

/// Values a range header iterates over
pub fn range_values(header: &str) -> ExpressionResult<Vec<String>> {
    let header = header.trim();
    let invalid = || ExpressionError::InvalidSyntax(format!("range {}", header));

    if let Some((start, end)) = header.split_once("..") {
        let start: i64 = start.trim().parse().map_err(|_| invalid())?;
        let end: i64 = end.trim().parse().map_err(|_| invalid())?;
        return Ok((start..end).map(|i| i.to_string()).collect());
    }
    if header.contains(',') {
        return Ok(header.split(',').map(|v| v.trim().to_string()).collect());
    }
    if let Ok(count) = header.parse::<i64>() {
        return Ok((0..count).map(|i| i.to_string()).collect());
    }
    if header.is_empty() {
        return Err(invalid());
    }
    Ok(vec![header.to_string()])
}

/// Expand every `{{range ...}}body{{end}}` block
pub fn expand_ranges(input: &str) -> ExpressionResult<String> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for caps in range_regex().captures_iter(input) {
        let whole = caps.get(0).expect("match has group 0");
        output.push_str(&input[last..whole.start()]);

        let body = &caps[2];
        for value in range_values(&caps[1])? {
            output.push_str(&body.replace(RANGE_VALUE, &value));
        }
        last = whole.end();
    }
    output.push_str(&input[last..]);

    Ok(output)
}

#[async_trait]
impl Evaluator for InterpolatingEvaluator {
    async fn evaluate(&self, scope: &Scope, expression: &str) -> ExpressionResult<String> {
        let expanded = expand_ranges(expression)?;
        self.interpolate(scope, &expanded).await
    }
}
