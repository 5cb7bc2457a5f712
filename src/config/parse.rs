//! Document parsing and configuration discovery

use crate::config::types::{Action, RunConfig, TemplateSpec, Topology};
use crate::error::{CanopyError, ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["canopy.yml", "canopy.yaml"];

/// Find the configuration file by searching current and parent directories
pub fn find_config_file() -> ConfigResult<PathBuf> {
    let start = env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?;

    find_config_file_from(start).or_else(|err| user_config_file().ok_or(err))
}

/// Find the configuration file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Per-user fallback, e.g. ~/.config/canopy/canopy.yml
fn user_config_file() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "canopy")?;
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dirs.config_dir().join(name))
        .find(|path| path.is_file())
}

/// Read and deserialize a YAML document
fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, CanopyError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    Ok(serde_yaml::from_str(&contents)?)
}

/// Parse the run configuration from a file
pub fn parse_config_file(path: &Path) -> Result<RunConfig, CanopyError> {
    read_yaml(path)
}

/// Parse the run configuration from a string
pub fn parse_config(yaml: &str) -> Result<RunConfig, CanopyError> {
    if yaml.trim().is_empty() {
        return Ok(RunConfig::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load the action list of a test document
pub fn actions_from_file(path: &Path) -> Result<Vec<Action>, CanopyError> {
    read_yaml(path)
}

/// Parse an action list from YAML text
pub fn actions_from_str(yaml: &str) -> Result<Vec<Action>, CanopyError> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// Action list for single-image mode
pub fn actions_from_args(image: &str, command: &str, wait: bool) -> Vec<Action> {
    vec![Action::image(image, command, wait)]
}

/// Load the templates defined in a template document
pub fn templates_from_file(path: &Path) -> Result<Vec<TemplateSpec>, CanopyError> {
    read_yaml(path)
}

/// Load a topology document
pub fn topology_from_file(path: &Path) -> Result<Topology, CanopyError> {
    read_yaml(path)
}

/// Split an include directive into the files it names
///
/// Entries are comma-separated; an entry containing glob metacharacters
/// expands to every matching file in sorted order.
pub fn include_paths(include: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    for entry in include.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if !entry.contains(['*', '?', '[']) {
            paths.push(PathBuf::from(entry));
            continue;
        }

        match glob::glob(entry) {
            Ok(matches) => {
                let mut found: Vec<PathBuf> = matches.filter_map(|m| m.ok()).collect();
                found.sort();
                paths.extend(found);
            }
            Err(e) => {
                tracing::warn!(pattern = entry, error = %e, "invalid include pattern");
            }
        }
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_in_current_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("canopy.yml");
        fs::write(&config_path, "repeat: 1\n").unwrap();

        let found = find_config_file_from(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("canopy.yaml");
        let sub_dir = temp_dir.path().join("subdir");

        fs::create_dir(&sub_dir).unwrap();
        fs::write(&config_path, "repeat: 1\n").unwrap();

        let found = find_config_file_from(sub_dir).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_parse_config_overrides_defaults() {
        let config = parse_config(
            r#"
provider: "file:hosts.yml"
repeat: -1
duration: 60
stop_on_error: true
"#,
        )
        .unwrap();
        assert_eq!(config.provider, "file:hosts.yml");
        assert_eq!(config.repeat, -1);
        assert_eq!(config.duration, 60);
        assert!(config.stop_on_error);
        assert!(!config.collect_on_error);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = parse_config("").unwrap();
        assert_eq!(config.repeat, 0);
    }

    #[test]
    fn test_actions_from_str() {
        let actions = actions_from_str(
            r#"
- include: tests/templates/rebalance.yml
- template: rebalance_in
  args: "node4, (a,b)"
"#,
        )
        .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].template, "rebalance_in");
    }

    #[test]
    fn test_actions_from_args() {
        let actions = actions_from_args("busybox", "sleep 1", true);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].image, "busybox");
        assert!(actions[0].wait);
    }

    #[test]
    fn test_templates_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("util.yml");
        fs::write(
            &path,
            r#"
- name: start
  actions:
    - command: "echo $0"
- name: stop
  actions: []
"#,
        )
        .unwrap();

        let templates = templates_from_file(&path).unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].name, "start");
        assert_eq!(templates[0].actions[0].command, "echo $0");
    }

    #[test]
    fn test_missing_document_is_read_error() {
        let result = actions_from_file(Path::new("/nonexistent/test.yml"));
        assert!(matches!(
            result,
            Err(CanopyError::Config(ConfigError::ReadFile { .. }))
        ));
    }

    #[test]
    fn test_include_paths_split_and_glob() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.yml"), "[]").unwrap();
        fs::write(temp_dir.path().join("a.yml"), "[]").unwrap();

        let pattern = format!("{}/*.yml", temp_dir.path().display());
        let paths = include_paths(&format!("first.yml, {}", pattern));
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], PathBuf::from("first.yml"));
        assert!(paths[1].ends_with("a.yml"));
        assert!(paths[2].ends_with("b.yml"));
    }
}
