//! Main CLI application

use crate::config::{
    find_config_file, parse_config_file, shared_async_aliases, topology_from_file,
    validate_actions, validate_config, ImageSpec, Mode, RunConfig, Topology,
};
use crate::error::CanopyError;
use crate::provider::{provider_from_spec, DevProvider, Provider, ProviderKind};
use crate::report::Report;
use crate::runner::{load_actions, ClusterHooks, Engine, NoopHooks, ProcessExit, Scope, ShellHooks};
use crate::runtime::{ContainerRuntime, DockerCli, MockRuntime};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Console verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Default tracing filter when `RUST_LOG` is not set
    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// CLI application
pub struct App {
    config: RunConfig,
    config_path: Option<PathBuf>,
    verbosity: Verbosity,
    dry_run: bool,
}

impl App {
    /// Parse arguments, load the configuration file and apply overrides
    pub fn from_args<I, T>(args: I) -> Result<Self, CanopyError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = build_command().get_matches_from(args);

        let config_path = matches
            .get_one::<PathBuf>("file")
            .cloned()
            .or_else(|| find_config_file().ok());
        let mut config = match &config_path {
            Some(path) => parse_config_file(path)?,
            None => RunConfig::default(),
        };

        apply_overrides(&mut config, &matches);
        validate_config(&config)?;

        Ok(App {
            config,
            config_path,
            verbosity: get_verbosity(&matches),
            dry_run: matches.get_flag("dry-run"),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run the configured test to completion
    pub async fn run(self) -> Result<(), CanopyError> {
        let actions = load_actions(&self.config)?;
        validate_actions(&actions)?;
        for alias in shared_async_aliases(&actions) {
            warn!(alias = %alias, "alias shared by concurrent actions, the last launch wins");
        }

        let topology = match &self.config.scope {
            Some(path) => topology_from_file(path)?,
            None => Topology::default(),
        };

        let mut provider = provider_from_spec(&self.config.provider)?;
        let runtime: Arc<dyn ContainerRuntime>;
        let hooks: Arc<dyn ClusterHooks>;
        if self.dry_run {
            info!("dry run, no containers will be created");
            runtime = Arc::new(MockRuntime::new());
            hooks = Arc::new(NoopHooks);
            if provider.kind() == ProviderKind::Docker {
                provider = Arc::new(DevProvider::new("127.0.0.1")) as Arc<dyn Provider>;
            }
        } else {
            runtime = Arc::new(DockerCli::new());
            hooks = Arc::new(ShellHooks::new(self.config.hooks.clone()));
        }

        let scope = Scope::new(topology, provider, runtime).with_hooks(hooks);
        let report = Arc::new(Report::new());
        let engine = Engine::new(self.config, actions, report.clone(), Arc::new(ProcessExit));

        if let Err(e) = engine.run(&scope).await {
            report.emit();
            return Err(e);
        }
        Ok(())
    }
}

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("canopy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declarative container workload orchestration for cluster testing")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to canopy.yml config file"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Action document to run"),
        )
        .arg(
            Arg::new("scope")
                .short('s')
                .long("scope")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Initial cluster topology"),
        )
        .arg(
            Arg::new("provider")
                .short('p')
                .long("provider")
                .value_name("SPEC")
                .help("docker, file[:hostfile] or dev[:endpoint]"),
        )
        .arg(
            Arg::new("repeat")
                .long("repeat")
                .value_name("N")
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64))
                .help("Extra passes over the actions; -1 repeats forever"),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("Stop the run after this many seconds"),
        )
        .arg(flag("skip-setup", "Skip cluster setup"))
        .arg(flag("skip-test", "Stop after setup"))
        .arg(flag("skip-teardown", "Skip cluster teardown"))
        .arg(flag("skip-cleanup", "Leave containers in place after the run"))
        .arg(flag("soft-cleanup", "Stop containers instead of removing them"))
        .arg(flag("collect-on-error", "Collect diagnostics when a task fails"))
        .arg(flag("stop-on-error", "Exit as soon as a task fails"))
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(value_parser!(u8))
                .help("Save container logs when greater than zero"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory for saved logs"),
        )
        .arg(
            Arg::new("container-name")
                .long("container-name")
                .value_name("PREFIX")
                .help("Name prefix of task containers"),
        )
        .arg(
            Arg::new("image")
                .long("image")
                .value_name("IMAGE")
                .help("Run a single image instead of a test document"),
        )
        .arg(
            Arg::new("command")
                .long("command")
                .value_name("COMMAND")
                .requires("image")
                .help("Command for --image"),
        )
        .arg(
            Arg::new("wait")
                .long("wait")
                .action(ArgAction::SetTrue)
                .requires("image")
                .help("Wait for the --image container to exit"),
        )
        .arg(flag("dry-run", "Resolve and report actions without a container runtime"))
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Only print warnings and the report"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Print debug output"),
        )
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Command line values take precedence over the configuration file
pub fn apply_overrides(config: &mut RunConfig, matches: &ArgMatches) {
    if let Some(test) = matches.get_one::<PathBuf>("test") {
        config.test = Some(test.clone());
    }
    if let Some(scope) = matches.get_one::<PathBuf>("scope") {
        config.scope = Some(scope.clone());
    }
    if let Some(provider) = matches.get_one::<String>("provider") {
        config.provider = provider.clone();
    }
    if let Some(repeat) = matches.get_one::<i64>("repeat") {
        config.repeat = *repeat;
    }
    if let Some(duration) = matches.get_one::<u64>("duration") {
        config.duration = *duration;
    }
    if let Some(level) = matches.get_one::<u8>("log-level") {
        config.log_level = *level;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("log-dir") {
        config.log_dir = dir.clone();
    }
    if let Some(name) = matches.get_one::<String>("container-name") {
        config.container_name = name.clone();
    }

    config.skip_setup |= matches.get_flag("skip-setup");
    config.skip_test |= matches.get_flag("skip-test");
    config.skip_teardown |= matches.get_flag("skip-teardown");
    config.skip_cleanup |= matches.get_flag("skip-cleanup");
    config.soft_cleanup |= matches.get_flag("soft-cleanup");
    config.collect_on_error |= matches.get_flag("collect-on-error");
    config.stop_on_error |= matches.get_flag("stop-on-error");

    if let Some(image) = matches.get_one::<String>("image") {
        config.mode = Mode::Image;
        config.image = Some(ImageSpec {
            name: image.clone(),
            command: matches
                .get_one::<String>("command")
                .cloned()
                .unwrap_or_default(),
            wait: matches.get_flag("wait"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches {
        build_command().get_matches_from(std::iter::once("canopy").chain(args.iter().copied()))
    }

    #[test]
    fn test_get_verbosity() {
        assert_eq!(get_verbosity(&matches(&[])), Verbosity::Normal);
        assert_eq!(get_verbosity(&matches(&["-q"])), Verbosity::Quiet);
        assert_eq!(get_verbosity(&matches(&["--verbose"])), Verbosity::Verbose);
        assert_eq!(Verbosity::Verbose.filter(), "debug");
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = RunConfig {
            repeat: 3,
            provider: "file:hosts.yml".to_string(),
            ..Default::default()
        };
        let m = matches(&[
            "--repeat",
            "-1",
            "--duration",
            "60",
            "--test",
            "tests/simple.yml",
            "--stop-on-error",
            "--skip-setup",
        ]);
        apply_overrides(&mut config, &m);

        assert_eq!(config.repeat, -1);
        assert_eq!(config.duration, 60);
        assert_eq!(config.test, Some(PathBuf::from("tests/simple.yml")));
        assert!(config.stop_on_error);
        assert!(config.skip_setup);
        assert!(!config.skip_teardown);
        // untouched values keep the file setting
        assert_eq!(config.provider, "file:hosts.yml");
    }

    #[test]
    fn test_image_flags_switch_mode() {
        let mut config = RunConfig::default();
        let m = matches(&["--image", "busybox", "--command", "echo hi", "--wait"]);
        apply_overrides(&mut config, &m);

        assert_eq!(config.mode, Mode::Image);
        let image = config.image.unwrap();
        assert_eq!(image.name, "busybox");
        assert_eq!(image.command, "echo hi");
        assert!(image.wait);
    }

    #[test]
    fn test_command_requires_image() {
        let result = build_command().try_get_matches_from(["canopy", "--command", "echo"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_args_with_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("canopy.yml");
        std::fs::write(&path, "test: tests/simple.yml\nrepeat: 2\n").unwrap();

        let app = App::from_args([
            "canopy",
            "-f",
            path.to_str().unwrap(),
            "--dry-run",
            "--repeat",
            "0",
        ])
        .unwrap();

        assert!(app.is_dry_run());
        assert_eq!(app.config().repeat, 0);
        assert_eq!(app.config_path(), Some(&path));
    }
}
