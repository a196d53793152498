//! Parsing and validation of `kiln.toml` engine configuration and the
//! environment-level controls consumed at the engine boundary.
//!
//! This crate produces a strongly-typed [`EngineConfig`] (source selection,
//! cache location, base compile options) and [`EnvControls`] (job-count and
//! I/O pool overrides, CI persistence policy, forced cache invalidation).

#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod loader;
pub mod types;

pub use env::EnvControls;
pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
