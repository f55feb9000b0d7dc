//! Layered client settings.
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (`~/.config/crab/client.toml`)
//! 3. Command-line flags
//!
//! Tables deep-merge by key; arrays and scalars from a later layer replace
//! earlier ones.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credential::MismatchPolicy;
use crate::failure::{Classify, FailureKind};
use crate::transport::RetryPolicy;

/// Client config errors
#[derive(Debug, thiserror::Error)]
pub enum ClientConfigError {
    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    #[error("cannot parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid client setting: {0}")]
    Invalid(String),
}

impl Classify for ClientConfigError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Configuration
    }
}

/// Effective client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Server instance used when the task configuration names none.
    pub instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_instance: Option<String>,
    /// Configured retry count; at least two retries always happen.
    pub retries: u32,
    /// Base of the linear retry backoff, in seconds.
    pub retry_base_seconds: u64,
    /// Maximum jitter added to or removed from each backoff, in seconds.
    pub retry_jitter_seconds: u64,
    pub request_timeout_seconds: u64,
    pub proxy_validity_hours: u32,
    pub proxy_min_time_left_seconds: u64,
    pub mismatch_policy: MismatchPolicy,
    pub myproxy_server: String,
    pub myproxy_validity_days: u32,
    pub myproxy_renew_threshold_days: u32,
    pub sandbox_max_bytes: u64,
    pub wait_poll_seconds: u64,
    pub wait_max_polls: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance: "prod".to_string(),
            rest_host: None,
            db_instance: None,
            retries: 2,
            retry_base_seconds: 20,
            retry_jitter_seconds: 10,
            request_timeout_seconds: 600,
            proxy_validity_hours: 172,
            proxy_min_time_left_seconds: 720,
            mismatch_policy: MismatchPolicy::Fail,
            myproxy_server: "myproxy.cern.ch".to_string(),
            myproxy_validity_days: 30,
            myproxy_renew_threshold_days: 15,
            sandbox_max_bytes: 120 * 1024 * 1024,
            wait_poll_seconds: 30,
            wait_max_polls: 120,
        }
    }
}

impl ClientConfig {
    /// Build from the default user config file plus command-line overrides.
    pub fn load(overrides: Option<toml::Table>) -> Result<Self, ClientConfigError> {
        Self::build(default_user_config_path().as_deref(), overrides)
    }

    /// Merge the layers and deserialize the result.
    pub fn build(
        user_config: Option<&Path>,
        overrides: Option<toml::Table>,
    ) -> Result<Self, ClientConfigError> {
        let mut layers = vec![builtin_layer()?];

        if let Some(path) = user_config {
            if path.exists() {
                layers.push(read_layer(path)?);
            }
        }
        if let Some(cli) = overrides {
            layers.push(toml::Value::Table(cli));
        }

        let merged = layers
            .into_iter()
            .reduce(deep_merge)
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
        let config: ClientConfig = merged
            .try_into()
            .map_err(|e: toml::de::Error| ClientConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ClientConfigError> {
        if self.proxy_validity_hours == 0 {
            return Err(ClientConfigError::Invalid(
                "proxy_validity_hours must be positive".into(),
            ));
        }
        if self.proxy_min_time_left_seconds >= u64::from(self.proxy_validity_hours) * 3600 {
            return Err(ClientConfigError::Invalid(
                "proxy_min_time_left_seconds must be below the proxy validity".into(),
            ));
        }
        if self.myproxy_renew_threshold_days > self.myproxy_validity_days {
            return Err(ClientConfigError::Invalid(
                "myproxy_renew_threshold_days must not exceed myproxy_validity_days".into(),
            ));
        }
        if self.wait_poll_seconds == 0 {
            return Err(ClientConfigError::Invalid(
                "wait_poll_seconds must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            base: Duration::from_secs(self.retry_base_seconds),
            jitter: Duration::from_secs(self.retry_jitter_seconds),
        }
    }

    /// Requested lifetime of a delegated credential, in minutes.
    pub fn myproxy_validity_minutes(&self) -> u64 {
        u64::from(self.myproxy_validity_days) * 24 * 60
    }
}

/// `~/.config/crab/client.toml`, when a config directory exists.
pub fn default_user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crab").join("client.toml"))
}

fn builtin_layer() -> Result<toml::Value, ClientConfigError> {
    toml::Value::try_from(ClientConfig::default())
        .map_err(|e| ClientConfigError::Invalid(e.to_string()))
}

fn read_layer(path: &Path) -> Result<toml::Value, ClientConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ClientConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    text.parse::<toml::Table>()
        .map(toml::Value::Table)
        .map_err(|e| ClientConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Deep merge two TOML values; `overlay` wins for scalars and arrays.
pub fn deep_merge(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}
