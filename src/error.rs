//! Error types for Canopy

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Canopy operations
pub type Result<T> = std::result::Result<T, CanopyError>;

/// Main error type for Canopy
#[derive(Error, Debug)]
pub enum CanopyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Expression evaluation errors
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Container runtime errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    #[error("Action {index}: repeat must be -1 or greater, got {repeat}")]
    InvalidRepeat { index: usize, repeat: i64 },

    #[error("Action {index}: client op '{op}' names no container alias")]
    MissingClientContainer { index: usize, op: String },

    #[error("Unknown provider '{0}' (expected docker, file[:hosts] or dev[:endpoint])")]
    UnknownProvider(String),

    #[error("Image mode requires an image name")]
    MissingImage,
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command failed with exit code {0:?}")]
    CommandFailed(Option<i32>),

    #[error("Hook '{name}' failed: {error}")]
    Hook { name: String, error: String },

    #[error("Failed to launch task '{task}': {error}")]
    Launch { task: String, error: String },
}

/// Expression evaluation errors
#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("Invalid expression syntax: {0}")]
    InvalidSyntax(String),

    #[error("Cannot interpret '{value}' as {expected}")]
    Coercion { value: String, expected: &'static str },

    #[error("Recursive interpolation detected")]
    RecursiveInterpolation,
}

/// Container runtime errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// The handle no longer refers to a container
    #[error("No such container: {0}")]
    NotFound(String),

    #[error("Container {handle} exited with code {code}")]
    Exited { handle: String, code: i32 },

    #[error("Runtime command failed: {0}")]
    Command(String),
}

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to read host file '{path}': {error}")]
    HostFile { path: PathBuf, error: String },

    #[error("No address known for node '{0}'")]
    UnknownNode(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for expression evaluation
pub type ExpressionResult<T> = std::result::Result<T, ExpressionError>;

/// Specialized result type for container runtime calls
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Specialized result type for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A status lookup that failed because the container is gone, rather than
/// because the runtime could not be reached
pub fn is_not_found(err: &RuntimeError) -> bool {
    matches!(err, RuntimeError::NotFound(_))
}
