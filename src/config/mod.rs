//! Document parsing and validation
//!
//! This module handles the action, template and topology documents and the
//! canopy.yml run configuration.

pub mod parse;
pub mod schema;
pub mod types;

// Re-export main types
pub use parse::*;
pub use schema::*;
pub use types::*;
