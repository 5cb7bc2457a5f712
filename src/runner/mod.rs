//! Orchestration engine
//!
//! This module resolves action lists into running tasks, drives each task
//! through its lifecycle and runs the setup, repeat, report, teardown and
//! cleanup phases.

pub mod command;
pub mod engine;
pub mod expr;
pub mod interpolate;
pub mod resolve;
pub mod scope;
pub mod task;
pub mod templates;
pub mod when;

// Re-export main types
pub use command::*;
pub use engine::*;
pub use expr::*;
pub use interpolate::*;
pub use resolve::*;
pub use scope::*;
pub use task::*;
pub use templates::*;
pub use when::*;
