//! Configuration module
//!
//! Handles loading and validating configuration from TOML files and environment variables,
//! and assembling a permission backend from it.

pub mod engine;
pub mod loader;
pub mod types;

pub use loader::{load_config, load_config_from_str};
pub use types::*;
