//! Condition evaluation
//!
//! `before`, `requires` and `until` strings are evaluated against the scope
//! and read as booleans. A single-line `left == right` or `left != right`
//! is compared after interpolation.

use crate::error::ExpressionResult;
use crate::runner::{parse_bool, Scope};
use tracing::warn;

/// Token in an until condition that stands for the task's own alias
pub const SELF_TOKEN: &str = "__self__";

/// Evaluate a condition strictly
pub async fn evaluate_condition(scope: &Scope, condition: &str) -> ExpressionResult<bool> {
    let value = scope.evaluate(condition).await?;
    parse_bool(&compare(&value))
}

/// Collapse a single-line `a == b` / `a != b` into `true` or `false`
fn compare(input: &str) -> String {
    if input.contains('\n') {
        return input.to_string();
    }
    if let Some((left, right)) = input.split_once("!=") {
        return (left.trim() != right.trim()).to_string();
    }
    if let Some((left, right)) = input.split_once("==") {
        return (left.trim() == right.trim()).to_string();
    }
    input.to_string()
}

/// Evaluate a condition, treating any error as `false`
pub async fn check_condition(scope: &Scope, condition: &str) -> bool {
    match evaluate_condition(scope, condition).await {
        Ok(value) => value,
        Err(e) => {
            warn!(condition = %condition, error = %e, "condition did not evaluate to a boolean");
            false
        }
    }
}

/// Point self references in a condition at `alias`
pub fn bind_self(condition: &str, alias: &str) -> String {
    condition.replace(SELF_TOKEN, alias)
}
