//! Core configuration types
//!
//! This module defines the data structures that represent action documents,
//! template documents, cluster topologies and the run configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A declarative unit of test work
///
/// Unset text fields are empty strings, an unset `wait` is `false` and an
/// unset `repeat` is `0`. Template inheritance relies on these zero values,
/// so an explicit `wait: false` cannot be told apart from an omitted one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Action {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub describe: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,

    /// Run synchronously, blocking resolution until the task finishes
    #[serde(skip_serializing_if = "is_false")]
    pub wait: bool,

    /// Condition that must hold before the task launches
    #[serde(skip_serializing_if = "String::is_empty")]
    pub before: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub entrypoint: String,

    /// Condition that must hold or the task is skipped
    #[serde(skip_serializing_if = "String::is_empty")]
    pub requires: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub concurrency: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub duration: String,

    /// Name under which the launched handle is recorded
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias: String,

    /// Restart count; -1 restarts forever
    #[serde(skip_serializing_if = "is_zero")]
    pub repeat: i64,

    /// Condition that ends the task once it holds
    #[serde(skip_serializing_if = "String::is_empty")]
    pub until: String,

    /// Comma-separated template documents to load
    #[serde(skip_serializing_if = "String::is_empty")]
    pub include: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub template: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub args: String,

    /// Nested action document to run as a sub-invocation
    #[serde(skip_serializing_if = "String::is_empty")]
    pub test: String,

    /// Topology document replacing the current scope
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub foreach: String,

    #[serde(skip_serializing_if = "ClientOp::is_empty")]
    pub client: ClientOp,
}

impl Action {
    /// Single-image action used by image mode
    pub fn image(image: impl Into<String>, command: impl Into<String>, wait: bool) -> Self {
        Action {
            image: image.into(),
            command: command.into(),
            wait,
            ..Default::default()
        }
    }

    /// Label used in log lines
    pub fn label(&self) -> &str {
        if !self.describe.is_empty() {
            &self.describe
        } else if !self.command.is_empty() {
            &self.command
        } else {
            &self.image
        }
    }
}

/// A client operation against an aliased container
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientOp {
    /// `kill`, `rm`/`remove` or `cp`/`copy`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub op: String,

    /// Alias of the target container
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub filename: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub frompath: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub topath: String,
}

impl ClientOp {
    pub fn is_empty(&self) -> bool {
        self.op.is_empty()
    }
}

/// A named, reusable list of actions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateSpec {
    pub name: String,

    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Cluster topology a scope runs against
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Topology {
    #[serde(default)]
    pub servers: Vec<ServerSpec>,

    /// Settings consumed by cluster hooks (buckets, users, ...)
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// One group of cluster nodes
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServerSpec {
    /// Node name pattern; the node index is inserted before the first dot
    pub name: String,

    #[serde(default = "default_count")]
    pub count: i64,

    #[serde(default)]
    pub init_nodes: i64,

    /// Nodes already running before this group was provisioned
    #[serde(skip)]
    pub count_offset: i64,
}

fn default_count() -> i64 {
    1
}

impl ServerSpec {
    /// Node names for this group, numbered after `count_offset`
    pub fn expand_names(&self) -> Vec<String> {
        let start = self.count_offset + 1;
        (start..start + self.count.max(0))
            .map(|i| match self.name.split_once('.') {
                Some((host, domain)) => format!("{}{}.{}", host, i, domain),
                None => format!("{}{}", self.name, i),
            })
            .collect()
    }
}

impl Topology {
    /// All node names in declaration order
    pub fn node_names(&self) -> Vec<String> {
        self.servers.iter().flat_map(|s| s.expand_names()).collect()
    }

    /// Nodes that must be added to move from `current` to `self`
    ///
    /// Groups present in both keep only the positive difference in `count`
    /// and `init_nodes`; the offset records how many nodes of the group
    /// already exist so new ones are numbered after them.
    pub fn provisioning_delta(&self, current: &Topology) -> Topology {
        let mut delta = self.clone();
        for (i, server) in delta.servers.iter_mut().enumerate() {
            if let Some(existing) = current.servers.get(i) {
                let count = (server.count - existing.count).max(0);
                let init_nodes = (server.init_nodes - existing.init_nodes).max(0);
                server.count_offset = server.count - count;
                server.count = count;
                server.init_nodes = init_nodes;
            }
        }
        delta
    }
}

/// How the run obtains its actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Actions come from the test document
    #[default]
    Default,
    /// A single ad hoc image
    Image,
}

/// Run configuration, read from canopy.yml and overridden by CLI flags
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: Mode,

    /// Action document
    pub test: Option<PathBuf>,

    /// Initial topology document
    pub scope: Option<PathBuf>,

    /// `docker`, `file[:hostfile]` or `dev[:endpoint]`
    pub provider: String,

    /// -1 runs forever, 0 once, N runs N+1 times
    pub repeat: i64,

    /// Wall-clock budget in seconds; 0 is unbounded
    pub duration: u64,

    pub skip_setup: bool,
    pub skip_test: bool,
    pub skip_teardown: bool,
    pub skip_cleanup: bool,
    pub soft_cleanup: bool,

    pub collect_on_error: bool,
    pub stop_on_error: bool,

    pub log_level: u8,
    pub log_dir: PathBuf,

    /// Prefix for managed container names
    pub container_name: String,

    /// Image mode settings
    pub image: Option<ImageSpec>,

    pub hooks: HookConfig,

    /// Diagnostic collection run on task errors
    pub collect: Option<CollectSpec>,

    pub timings: Timings,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: Mode::Default,
            test: None,
            scope: None,
            provider: "docker".to_string(),
            repeat: 0,
            duration: 0,
            skip_setup: false,
            skip_test: false,
            skip_teardown: false,
            skip_cleanup: false,
            soft_cleanup: false,
            collect_on_error: false,
            stop_on_error: false,
            log_level: 0,
            log_dir: PathBuf::from("logs"),
            container_name: "canopy".to_string(),
            image: None,
            hooks: HookConfig::default(),
            collect: None,
            timings: Timings::default(),
        }
    }
}

/// Image mode action
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageSpec {
    pub name: String,
    pub command: String,
    pub wait: bool,
}

/// Shell commands run for scope setup and teardown
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HookConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_cli: Option<String>,
}

/// Template run when a task reports an error and collection is enabled
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectSpec {
    pub include: String,
    pub template: String,
}

/// Polling intervals and pauses used by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timings {
    #[serde(with = "millis")]
    pub before_poll: Duration,

    #[serde(with = "millis")]
    pub until_poll: Duration,

    #[serde(with = "millis")]
    pub repeat_poll: Duration,

    /// Pause after every dispatch
    #[serde(with = "millis")]
    pub settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            before_poll: Duration::from_secs(5),
            until_poll: Duration::from_secs(1),
            repeat_poll: Duration::from_secs(1),
            settle: Duration::from_secs(5),
        }
    }
}

impl Timings {
    /// Uniform interval for every poll and pause
    pub fn uniform(interval: Duration) -> Self {
        Timings {
            before_poll: interval,
            until_poll: interval,
            repeat_poll: interval,
            settle: interval,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_action_list() {
        let yaml = r#"
- image: sequoiatools/pillowfight
  command: "-U ${host:node1} -I 100"
  wait: true
- client:
    op: kill
    container: loader
"#;
        let actions: Vec<Action> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions[0].wait);
        assert_eq!(actions[0].repeat, 0);
        assert_eq!(actions[1].client.op, "kill");
        assert_eq!(actions[1].client.container, "loader");
    }

    #[test]
    fn test_serialize_skips_unset_fields() {
        let action = Action::image("busybox", "echo hi", false);
        let yaml = serde_yaml::to_string(&action).unwrap();
        assert!(yaml.contains("image: busybox"));
        assert!(!yaml.contains("wait"));
        assert!(!yaml.contains("client"));
    }

    #[test]
    fn test_expand_names_with_domain() {
        let server = ServerSpec {
            name: "local.st.couchbase.com".to_string(),
            count: 2,
            ..Default::default()
        };
        assert_eq!(
            server.expand_names(),
            vec!["local1.st.couchbase.com", "local2.st.couchbase.com"]
        );
    }

    #[test]
    fn test_expand_names_after_offset() {
        let server = ServerSpec {
            name: "node".to_string(),
            count: 2,
            count_offset: 3,
            ..Default::default()
        };
        assert_eq!(server.expand_names(), vec!["node4", "node5"]);
    }

    #[test]
    fn test_provisioning_delta() {
        let current = Topology {
            servers: vec![ServerSpec {
                name: "node".to_string(),
                count: 3,
                init_nodes: 3,
                count_offset: 0,
            }],
            ..Default::default()
        };
        let grown = Topology {
            servers: vec![
                ServerSpec {
                    name: "node".to_string(),
                    count: 5,
                    init_nodes: 2,
                    count_offset: 0,
                },
                ServerSpec {
                    name: "extra".to_string(),
                    count: 1,
                    init_nodes: 1,
                    count_offset: 0,
                },
            ],
            ..Default::default()
        };

        let delta = grown.provisioning_delta(&current);
        assert_eq!(delta.servers[0].count, 2);
        assert_eq!(delta.servers[0].init_nodes, 0);
        assert_eq!(delta.servers[0].count_offset, 3);
        assert_eq!(delta.servers[0].expand_names(), vec!["node4", "node5"]);
        // new groups are provisioned in full
        assert_eq!(delta.servers[1].count, 1);
        assert_eq!(delta.servers[1].count_offset, 0);
    }

    #[test]
    fn test_provisioning_delta_clamps_shrink() {
        let current = Topology {
            servers: vec![ServerSpec {
                name: "node".to_string(),
                count: 4,
                ..Default::default()
            }],
            ..Default::default()
        };
        let shrunk = Topology {
            servers: vec![ServerSpec {
                name: "node".to_string(),
                count: 2,
                ..Default::default()
            }],
            ..Default::default()
        };
        let delta = shrunk.provisioning_delta(&current);
        assert_eq!(delta.servers[0].count, 0);
        assert_eq!(delta.servers[0].count_offset, 2);
        assert!(delta.node_names().is_empty());
    }

    #[test]
    fn test_run_config_defaults() {
        let config: RunConfig = serde_yaml::from_str("repeat: 2").unwrap();
        assert_eq!(config.repeat, 2);
        assert_eq!(config.provider, "docker");
        assert_eq!(config.timings, Timings::default());
        assert_eq!(config.mode, Mode::Default);
    }

    #[test]
    fn test_timings_in_millis() {
        let config: RunConfig = serde_yaml::from_str("timings:\n  settle: 250\n").unwrap();
        assert_eq!(config.timings.settle, Duration::from_millis(250));
        assert_eq!(config.timings.until_poll, Duration::from_secs(1));
    }
}
