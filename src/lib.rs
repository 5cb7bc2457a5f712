//! Canopy - declarative container workload orchestration
//!
//! Canopy reads YAML action documents and drives container workloads
//! against a database cluster: it provisions node addresses, launches task
//! containers, restarts or stops them on conditions, and reports a
//! pass/fail line per task.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod provider;
pub mod report;
pub mod runner;
pub mod runtime;

// Re-export commonly used types
pub use error::{CanopyError, Result};

/// Current version of Canopy
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
