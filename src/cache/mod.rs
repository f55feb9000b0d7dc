//! Task cache record
//!
//! One JSON file per task directory, written when the server accepts a
//! submission and read back by every later command on that directory.
//! Only a resubmission rewrites it, and the task name never changes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crab_protocol::{InstanceError, ServerInstance};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::{TaskConfigError, TaskConfiguration};
use crate::failure::{Classify, FailureKind};

/// File name of the record inside a task directory.
pub const CACHE_FILE_NAME: &str = ".requestcache";

/// Errors for task cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("{} is not a task directory (no {} found)", .0.display(), CACHE_FILE_NAME)]
    Missing(PathBuf),

    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("task cache {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("task cache names an unusable server: {0}")]
    Instance(#[from] InstanceError),

    #[error("task cache holds an unreadable configuration: {0}")]
    Config(#[from] TaskConfigError),
}

impl Classify for CacheError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            CacheError::Io { .. } => FailureKind::Unexpected,
            _ => FailureKind::Configuration,
        }
    }
}

/// Persisted description of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCacheRecord {
    /// REST host the task was submitted to
    #[serde(rename = "Server")]
    pub server: String,

    /// Port as text; empty when the default HTTPS port is used
    #[serde(rename = "Port", default)]
    pub port: String,

    /// Unique task name assigned by the server
    #[serde(rename = "RequestName")]
    pub request_name: String,

    #[serde(rename = "voRole", default, with = "empty_as_none")]
    pub vo_role: Option<String>,

    #[serde(rename = "voGroup", default)]
    pub vo_group: String,

    #[serde(rename = "instance")]
    pub instance: String,

    #[serde(rename = "dbInstance", default)]
    pub db_instance: Option<String>,

    /// Resolved task configuration as TOML
    #[serde(rename = "OriginalConfig")]
    pub original_config: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resubmitted_at: Option<DateTime<Utc>>,
}

mod empty_as_none {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<String>::deserialize(d)?;
        Ok(value.filter(|v| !v.is_empty()))
    }
}

impl TaskCacheRecord {
    pub fn new(
        instance: &ServerInstance,
        request_name: impl Into<String>,
        vo_group: impl Into<String>,
        vo_role: Option<String>,
        original_config: impl Into<String>,
    ) -> Self {
        Self {
            server: instance.rest_host.clone(),
            port: instance.port.map(|p| p.to_string()).unwrap_or_default(),
            request_name: request_name.into(),
            vo_role: vo_role.filter(|r| !r.is_empty()),
            vo_group: vo_group.into(),
            instance: instance.name.clone(),
            db_instance: Some(instance.db_instance.clone()),
            original_config: original_config.into(),
            created_at: Utc::now(),
            resubmitted_at: None,
        }
    }

    pub fn path(task_dir: &Path) -> PathBuf {
        task_dir.join(CACHE_FILE_NAME)
    }

    /// Read the record of `task_dir`.
    pub fn load(task_dir: &Path) -> Result<Self, CacheError> {
        let path = Self::path(task_dir);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::Missing(task_dir.to_path_buf()));
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| CacheError::Corrupt { path, source })
    }

    /// Write into `task_dir` (write-then-rename).
    pub fn save(&self, task_dir: &Path) -> Result<PathBuf, CacheError> {
        let path = Self::path(task_dir);
        let io_error = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;

        fs::create_dir_all(task_dir).map_err(io_error)?;
        let temp_path = task_dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&temp_path, json).map_err(io_error)?;
        fs::rename(&temp_path, &path).map_err(io_error)?;
        Ok(path)
    }

    /// Server the task lives on.
    pub fn server_instance(&self) -> Result<ServerInstance, CacheError> {
        let authority = if self.port.is_empty() {
            self.server.clone()
        } else {
            format!("{}:{}", self.server, self.port)
        };
        Ok(ServerInstance::resolve(
            &self.instance,
            Some(&authority),
            self.db_instance.as_deref(),
        )?)
    }

    pub fn original_configuration(&self) -> Result<TaskConfiguration, CacheError> {
        Ok(TaskConfiguration::from_toml_str(&self.original_config)?)
    }

    pub fn mark_resubmitted(&mut self) {
        self.resubmitted_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> TaskCacheRecord {
        let instance = ServerInstance::resolve("prod", None, None).unwrap();
        TaskCacheRecord::new(
            &instance,
            "demo_unique_001",
            "",
            None,
            "[General]\nrequestName = \"demo\"\n",
        )
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let task_dir = dir.path().join("crab_demo");
        let saved = record();
        let path = saved.save(&task_dir).unwrap();
        assert!(path.ends_with(CACHE_FILE_NAME));

        let loaded = TaskCacheRecord::load(&task_dir).unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.request_name, "demo_unique_001");

        let leftovers: Vec<_> = fs::read_dir(&task_dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_field_names_on_disk() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["Server"], "cmsweb.cern.ch");
        assert_eq!(value["Port"], "");
        assert_eq!(value["RequestName"], "demo_unique_001");
        assert_eq!(value["voRole"], "");
        assert_eq!(value["instance"], "prod");
        assert!(value.get("resubmitted_at").is_none());
    }

    #[test]
    fn test_tolerates_missing_port_and_empty_role() {
        let json = r#"{
            "Server": "crab.example.org",
            "RequestName": "x_1",
            "voRole": "",
            "voGroup": "",
            "instance": "other",
            "dbInstance": "dev",
            "OriginalConfig": "",
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let record: TaskCacheRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.port, "");
        assert_eq!(record.vo_role, None);

        let instance = record.server_instance().unwrap();
        assert_eq!(instance.rest_host, "crab.example.org");
        assert_eq!(instance.db_instance, "dev");
    }

    #[test]
    fn test_port_round_trips_into_instance() {
        let instance = ServerInstance::resolve("other", Some("crab.example.org:8443"), Some("dev"))
            .unwrap();
        let record = TaskCacheRecord::new(&instance, "t", "", Some("production".into()), "");
        assert_eq!(record.port, "8443");
        assert_eq!(record.server_instance().unwrap(), instance);
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = TaskCacheRecord::load(dir.path()).unwrap_err();
        assert!(matches!(err, CacheError::Missing(_)));
        assert_eq!(err.failure_kind(), FailureKind::Configuration);
    }

    #[test]
    fn test_original_configuration() {
        let config = record().original_configuration().unwrap();
        assert_eq!(config.get_str("General.requestName"), Some("demo"));
    }
}
