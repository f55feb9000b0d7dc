//! Commands on an existing task directory
//!
//! `status`, `kill` and `resubmit` load the directory's task cache record
//! to find the server and the task name, then talk to the workflow
//! resource.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crab_protocol::endpoint::{resource, subresource};
use crab_protocol::{EnvelopeError, RequestParams, TaskStatus, WireValue};
use tracing::{debug, info, warn};

use crate::cache::{CacheError, TaskCacheRecord};
use crate::config::ClientConfig;
use crate::environment::ClientEnvironment;
use crate::failure::{Classify, FailureKind};
use crate::transport::{
    connect_client, Connector, RestClient, RestError, TlsSettings, TransportError,
};

/// Errors for task commands
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("cannot connect to the server: {0}")]
    Connect(#[from] TransportError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("unexpected server answer: {0}")]
    Decode(#[from] EnvelopeError),

    #[error("invalid --{option}: {message}")]
    InvalidOption {
        option: &'static str,
        message: String,
    },

    #[error("task {name} is {status}{}", .message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    TaskFailed {
        name: String,
        status: String,
        message: Option<String>,
    },
}

impl Classify for TaskError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            TaskError::Cache(e) => e.failure_kind(),
            TaskError::Connect(e) => e.failure_kind(),
            TaskError::Rest(e) => e.failure_kind(),
            TaskError::Decode(_) => FailureKind::RestCommunication,
            TaskError::InvalidOption { .. } => FailureKind::Configuration,
            TaskError::TaskFailed { .. } => FailureKind::CommandFailed,
        }
    }
}

/// GET the status of task `name`.
pub fn fetch_status(client: &RestClient, name: &str) -> Result<TaskStatus, TaskError> {
    let params = RequestParams::new().with("workflow", name);
    let response = client.get(resource::WORKFLOW, &params)?;
    let status: TaskStatus = response.first()?;
    debug!(task = name, status = %status.status, "task status");
    Ok(status)
}

/// Poll the status of `name` until `done` holds or `max_polls` polls were
/// made, returning the last status seen. Polls `poll` apart.
pub fn wait_for<F>(
    client: &RestClient,
    name: &str,
    poll: Duration,
    max_polls: u32,
    done: F,
) -> Result<TaskStatus, TaskError>
where
    F: Fn(&TaskStatus) -> bool,
{
    let mut polls = 1;
    loop {
        let status = fetch_status(client, name)?;
        if status.is_failed() {
            return Err(TaskError::TaskFailed {
                name: name.to_string(),
                status: status.status,
                message: status.failure_message,
            });
        }
        if done(&status) || polls >= max_polls.max(1) {
            return Ok(status);
        }
        info!("task is {}, checking again in {}s", status.status, poll.as_secs());
        thread::sleep(poll);
        polls += 1;
    }
}

/// What `resubmit` changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResubmitOptions {
    /// Job ids and ranges such as `1,4-6`; all failed jobs when absent
    pub jobids: Option<String>,
    pub max_memory_mb: Option<u64>,
    pub max_job_runtime_min: Option<u64>,
    pub num_cores: Option<u64>,
    pub priority: Option<i64>,
    pub site_whitelist: Vec<String>,
    pub site_blacklist: Vec<String>,
}

impl ResubmitOptions {
    /// Resubmission parameters for task `name`.
    pub fn to_params(&self, name: &str) -> Result<RequestParams, TaskError> {
        let mut params = RequestParams::new()
            .with("workflow", name)
            .with("subresource", subresource::RESUBMIT);

        if let Some(ids) = &self.jobids {
            params.insert("jobids", WireValue::List(expand_job_ids(ids)?));
        }
        if let Some(memory) = self.max_memory_mb {
            params.insert("maxmemory", positive("maxmemory", memory)?);
        }
        if let Some(runtime) = self.max_job_runtime_min {
            params.insert("maxjobruntime", positive("maxjobruntime", runtime)?);
        }
        if let Some(cores) = self.num_cores {
            params.insert("numcores", positive("numcores", cores)?);
        }
        if let Some(priority) = self.priority {
            params.insert("priority", priority);
        }
        if !self.site_whitelist.is_empty() {
            params.insert("sitewhitelist", WireValue::List(self.site_whitelist.clone()));
        }
        if !self.site_blacklist.is_empty() {
            params.insert("siteblacklist", WireValue::List(self.site_blacklist.clone()));
        }
        Ok(params)
    }
}

fn positive(option: &'static str, value: u64) -> Result<i64, TaskError> {
    match i64::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(TaskError::InvalidOption {
            option,
            message: format!("{} is not a positive number", value),
        }),
    }
}

/// Most job ids one resubmission may name; a task never has more jobs.
pub const MAX_JOB_IDS: u64 = 10_000;

/// `1,4-6` → `["1", "4", "5", "6"]`
pub fn expand_job_ids(spec: &str) -> Result<Vec<String>, TaskError> {
    let invalid = |message: String| TaskError::InvalidOption {
        option: "jobids",
        message,
    };
    let parse = |text: &str| -> Result<u64, TaskError> {
        text.trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| invalid(format!("'{}' is not a job id", text.trim())))
    };

    let mut ids = Vec::new();
    for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
        match part.split_once('-') {
            Some((first, last)) => {
                let (first, last) = (parse(first)?, parse(last)?);
                if first > last {
                    return Err(invalid(format!("range '{}' is reversed", part.trim())));
                }
                if ids.len() as u64 + (last - first + 1) > MAX_JOB_IDS {
                    return Err(invalid(format!(
                        "range '{}' names more than {} jobs",
                        part.trim(),
                        MAX_JOB_IDS
                    )));
                }
                ids.extend((first..=last).map(|id| id.to_string()));
            }
            None => ids.push(parse(part)?.to_string()),
        }
    }
    if ids.is_empty() {
        return Err(invalid("no job ids given".to_string()));
    }
    ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(0));
    ids.dedup();
    Ok(ids)
}

/// A task directory with a live connection to its server.
pub struct TaskSession {
    task_dir: PathBuf,
    record: TaskCacheRecord,
    client: RestClient,
}

impl TaskSession {
    /// Load the record of `task_dir` and connect to the server it names.
    pub fn open(
        task_dir: &Path,
        connector: &dyn Connector,
        env: &ClientEnvironment,
        client_config: &ClientConfig,
    ) -> Result<Self, TaskError> {
        let record = TaskCacheRecord::load(task_dir)?;
        let instance = record.server_instance()?;
        let tls = TlsSettings::for_environment(env, client_config.request_timeout());
        let client = connect_client(connector, &tls, instance, client_config.retry_policy())?;
        Ok(Self {
            task_dir: task_dir.to_path_buf(),
            record,
            client,
        })
    }

    pub fn record(&self) -> &TaskCacheRecord {
        &self.record
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    pub fn client(&self) -> &RestClient {
        &self.client
    }

    pub fn status(&self) -> Result<TaskStatus, TaskError> {
        fetch_status(&self.client, &self.record.request_name)
    }

    /// Ask the server to kill every job of the task.
    pub fn kill(&self) -> Result<(), TaskError> {
        let params = RequestParams::new().with("workflow", self.record.request_name.as_str());
        self.client.delete(resource::WORKFLOW, &params)?;
        info!("kill request for {} sent", self.record.request_name);
        Ok(())
    }

    /// Resubmit jobs, then stamp the record.
    pub fn resubmit(&mut self, options: &ResubmitOptions) -> Result<(), TaskError> {
        let params = options.to_params(&self.record.request_name)?;
        self.client.post(resource::WORKFLOW, &params)?;
        info!("resubmit request for {} sent", self.record.request_name);

        self.record.mark_resubmitted();
        if let Err(e) = self.record.save(&self.task_dir) {
            warn!("resubmitted, but the task cache could not be updated: {}", e);
        }
        Ok(())
    }
}
