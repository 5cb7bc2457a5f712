//! CLI interface and argument parsing
//!
//! This module builds the command line, loads the configuration it points
//! at and wires the engine to a container runtime.

pub mod app;

// Re-export main types
pub use app::*;
