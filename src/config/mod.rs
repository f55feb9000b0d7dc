//! Configuration
//!
//! Two surfaces:
//! - the task configuration (`crabConfig.toml`), sectioned and validated
//!   against the parameter registry
//! - the client settings, layered from built-in defaults, the user config
//!   file and command-line flags

mod client;
mod task;

pub use client::{deep_merge, default_user_config_path, ClientConfig, ClientConfigError};
pub use task::{ConfigValue, TaskConfigError, TaskConfiguration, DEFAULT_CONFIG_FILE};
