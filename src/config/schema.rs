//! Configuration validation
//!
//! Structural checks on action documents and the run configuration. Checks
//! here reject documents that cannot mean anything; everything that depends
//! on runtime state is handled leniently by the resolver.

use crate::config::types::{Action, Mode, RunConfig};
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashMap;

/// Validate an action list
pub fn validate_actions(actions: &[Action]) -> ConfigResult<()> {
    for (index, action) in actions.iter().enumerate() {
        validate_action(index, action)?;
    }
    Ok(())
}

/// Validate a single action
pub fn validate_action(index: usize, action: &Action) -> ConfigResult<()> {
    if action.repeat < -1 {
        return Err(ConfigError::InvalidRepeat {
            index,
            repeat: action.repeat,
        });
    }

    if !action.client.is_empty() && action.client.container.trim().is_empty() {
        return Err(ConfigError::MissingClientContainer {
            index,
            op: action.client.op.clone(),
        });
    }

    Ok(())
}

/// Validate the run configuration
pub fn validate_config(config: &RunConfig) -> ConfigResult<()> {
    if config.repeat < -1 {
        return Err(ConfigError::Invalid(format!(
            "repeat must be -1 or greater, got {}",
            config.repeat
        )));
    }

    if config.mode == Mode::Image {
        match &config.image {
            Some(image) if !image.name.is_empty() => {}
            _ => return Err(ConfigError::MissingImage),
        }
    } else if config.test.is_none() {
        return Err(ConfigError::Invalid(
            "no test document given (set `test` or pass --test)".to_string(),
        ));
    }

    Ok(())
}

/// Aliases shared by more than one asynchronous action
///
/// Concurrent tasks sharing an alias overwrite each other's store entry;
/// this is allowed but worth a warning before the run starts.
pub fn shared_async_aliases(actions: &[Action]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for action in actions.iter().filter(|a| !a.wait && !a.alias.is_empty()) {
        *counts.entry(action.alias.as_str()).or_default() += 1;
    }

    let mut shared: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(alias, _)| alias.to_string())
        .collect();
    shared.sort();
    shared
}
