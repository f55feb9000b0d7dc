//! Submission orchestrator
//!
//! Runs one submission from a loaded configuration to a task cache record:
//! validate, make credentials ready, build and upload the sandbox, send the
//! request and record the result. See [`state`] for the step order.

pub mod state;

pub use state::{InvalidTransition, StateTracker, SubmitState};

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use crab_protocol::endpoint::{resource, subresource};
use crab_protocol::workflow::state as task_state;
use crab_protocol::{
    BackendUrls, DelegateDnInfo, EnvelopeError, InstanceError, RequestParams, ServerErrorHeaders,
    ServerInstance, ServerVersion, SubmitResult, TaskStatus, CLIENT_VERSION,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, TaskCacheRecord};
use crate::config::{ClientConfig, TaskConfigError, TaskConfiguration};
use crate::credential::{CommandRunner, CredentialError, CredentialManager, CredentialRecord};
use crate::environment::ClientEnvironment;
use crate::failure::{Classify, FailureKind};
use crate::jobtype::{self, JobTypeContext, JobTypeError};
use crate::logging::LogContext;
use crate::mapping::{self, ValidationReport};
use crate::sandbox::{self, SandboxBuilder, SandboxError, SandboxUpload};
use crate::task::{self, TaskError};
use crate::transport::{connect_client, Connector, RestClient, RestError, TlsSettings, TransportError};

/// Work area used when `General.workArea` is not set.
pub const DEFAULT_WORK_AREA: &str = "crab_projects";

/// Errors for the submission pipeline
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Config(#[from] TaskConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationReport),

    #[error("task directory {} already exists; choose another General.requestName or General.workArea", .0.display())]
    TaskDirExists(PathBuf),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("cannot connect to the server: {0}")]
    Connect(#[from] TransportError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("unexpected server answer from {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: EnvelopeError,
    },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    JobType(#[from] JobTypeError),

    #[error("the server rejected the task: {}", rejection_text(.source, .headers))]
    Rejected {
        #[source]
        source: RestError,
        /// Server error headers with configuration names added
        headers: ServerErrorHeaders,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    State(#[from] InvalidTransition),
}

fn rejection_text(source: &RestError, headers: &ServerErrorHeaders) -> String {
    match headers.summary() {
        Some(summary) => summary,
        None => source.to_string(),
    }
}

impl Classify for SubmitError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            SubmitError::Config(e) => e.failure_kind(),
            SubmitError::Validation(e) => e.failure_kind(),
            SubmitError::TaskDirExists(_) | SubmitError::Instance(_) => FailureKind::Configuration,
            SubmitError::Credential(e) => e.failure_kind(),
            SubmitError::Connect(e) => e.failure_kind(),
            SubmitError::Rest(e) => e.failure_kind(),
            SubmitError::Decode { .. } => FailureKind::RestCommunication,
            SubmitError::Sandbox(e) => e.failure_kind(),
            SubmitError::JobType(e) => e.failure_kind(),
            SubmitError::Rejected { source, .. } => source.failure_kind(),
            SubmitError::Cache(e) => e.failure_kind(),
            SubmitError::Task(e) => e.failure_kind(),
            SubmitError::State(_) => FailureKind::Unexpected,
        }
    }
}

/// `submit` flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Stop once the server has accepted the task; no jobs run.
    pub dry_run: bool,
    /// With `dry_run`, do not wait for the task to be uploaded.
    pub skip_estimates: bool,
    /// Poll until the task leaves the submission states.
    pub wait: bool,
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub request_name: String,
    pub task_dir: PathBuf,
    pub record: TaskCacheRecord,
    pub sandbox: SandboxUpload,
    pub states: Vec<SubmitState>,
    /// Last status seen when waiting
    pub status: Option<TaskStatus>,
}

/// Default name for a task without `General.requestName`.
pub fn default_request_name() -> String {
    format!("crab_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// `<base_dir>/<General.workArea>/crab_<requestName>`.
pub fn task_directory(config: &TaskConfiguration, base_dir: &Path, request_name: &str) -> PathBuf {
    let work_area = config
        .get_str("General.workArea")
        .unwrap_or(DEFAULT_WORK_AREA);
    base_dir
        .join(work_area)
        .join(format!("crab_{}", request_name))
}

/// Server instance named by the task configuration, falling back to the
/// client configuration.
pub fn resolve_instance(
    config: &TaskConfiguration,
    client_config: &ClientConfig,
) -> Result<ServerInstance, InstanceError> {
    ServerInstance::resolve(
        config
            .get_str("General.instance")
            .unwrap_or(&client_config.instance),
        config
            .get_str("General.restHost")
            .or(client_config.rest_host.as_deref()),
        config
            .get_str("General.dbInstance")
            .or(client_config.db_instance.as_deref()),
    )
}

/// Drives one submission.
pub struct Submitter<'a> {
    client_config: &'a ClientConfig,
    env: &'a ClientEnvironment,
    runner: &'a dyn CommandRunner,
    connector: &'a dyn Connector,
    log: Option<&'a LogContext>,
}

impl<'a> Submitter<'a> {
    pub fn new(
        client_config: &'a ClientConfig,
        env: &'a ClientEnvironment,
        runner: &'a dyn CommandRunner,
        connector: &'a dyn Connector,
    ) -> Self {
        Self {
            client_config,
            env,
            runner,
            connector,
            log: None,
        }
    }

    /// Move the log into the task directory once it exists.
    pub fn with_log(mut self, log: &'a LogContext) -> Self {
        self.log = Some(log);
        self
    }

    /// Submit `config`. Relative file names resolve against `base_dir`,
    /// which also holds the work area.
    pub fn submit(
        &self,
        mut config: TaskConfiguration,
        base_dir: &Path,
        options: SubmitOptions,
    ) -> Result<SubmitOutcome, SubmitError> {
        let mut tracker = StateTracker::new();

        if !config.contains("General.requestName") {
            let name = default_request_name();
            info!("General.requestName not set, using {}", name);
            config.set("General.requestName", name)?;
        }

        mapping::validate(&config, base_dir).into_result()?;
        tracker.advance(SubmitState::Validated)?;

        let request_name = config
            .get_str("General.requestName")
            .unwrap_or_default()
            .to_string();
        let task_dir = task_directory(&config, base_dir, &request_name);
        if task_dir.exists() {
            return Err(SubmitError::TaskDirExists(task_dir));
        }
        let instance = resolve_instance(&config, self.client_config)?;

        let group = config.get_str("User.voGroup").unwrap_or_default().to_string();
        let role = config.get_str("User.voRole").unwrap_or_default().to_string();
        let credentials = CredentialManager::new(self.runner, self.env)
            .with_proxy_validity_hours(self.client_config.proxy_validity_hours);
        let proxy = credentials.ensure_local_proxy(
            self.client_config.proxy_min_time_left_seconds,
            &group,
            &role,
            self.client_config.mismatch_policy,
        )?;

        let tls = TlsSettings::for_environment(self.env, self.client_config.request_timeout());
        let client = connect_client(
            self.connector,
            &tls,
            instance.clone(),
            self.client_config.retry_policy(),
        )?;

        self.delegate(&credentials, &client, &proxy)?;
        tracker.advance(SubmitState::CredentialReady)?;

        self.check_version(&client);
        let backend: BackendUrls = fetch_info(&client, subresource::BACKEND_URLS)?;

        let archive = SandboxBuilder::from_config(&config, self.env, base_dir)?
            .with_max_bytes(self.client_config.sandbox_max_bytes)
            .build()?;
        let uploaded = sandbox::upload(
            &client,
            &backend.cache_ssl,
            &archive,
            self.client_config.sandbox_max_bytes,
        )?;
        tracker.advance(SubmitState::SandboxUploaded)?;

        let request = self.build_request(&config, base_dir, &uploaded, &archive.cache_file_name(), options)?;
        debug!(parameters = request.len(), "submission request ready");

        tracker.advance(SubmitState::RequestSent)?;
        let response = match client.put(resource::WORKFLOW, &request) {
            Ok(response) => response,
            Err(source) => {
                tracker.advance(SubmitState::Rejected)?;
                let headers = source
                    .server_headers()
                    .map(mapping::annotate_server_headers)
                    .unwrap_or_default();
                return Err(SubmitError::Rejected { source, headers });
            }
        };
        let accepted: SubmitResult = response.first().map_err(|source| SubmitError::Decode {
            what: "workflow",
            source,
        })?;
        tracker.advance(SubmitState::Accepted)?;
        info!("task {} accepted by the server", accepted.request_name);

        let record = TaskCacheRecord::new(
            &instance,
            accepted.request_name.as_str(),
            group,
            Some(role),
            config.to_toml_string()?,
        );
        record.save(&task_dir)?;
        if let Some(log) = self.log {
            if let Err(e) = log.relocate(&task_dir) {
                warn!("cannot move the log into {}: {}", task_dir.display(), e);
            }
        }

        let status = self.wait_if_asked(&client, &accepted.request_name, options)?;

        Ok(SubmitOutcome {
            request_name: accepted.request_name,
            task_dir,
            record,
            sandbox: uploaded,
            states: tracker.history().to_vec(),
            status,
        })
    }

    fn delegate(
        &self,
        credentials: &CredentialManager<'_>,
        client: &RestClient,
        proxy: &CredentialRecord,
    ) -> Result<(), SubmitError> {
        let dns: DelegateDnInfo = fetch_info(client, subresource::DELEGATE_DN)?;
        let delegation = credentials.delegate_to_remote_store(
            proxy,
            &self.client_config.myproxy_server,
            &dns.retriever_pattern(),
            self.client_config.myproxy_validity_minutes(),
            self.client_config.myproxy_renew_threshold_days,
        )?;
        debug!(
            name = %delegation.name,
            time_left = delegation.time_left,
            renewed = delegation.renewed,
            "delegated credential ready"
        );
        Ok(())
    }

    /// Warn when the server does not list this client version. Failing to
    /// ask is not fatal.
    fn check_version(&self, client: &RestClient) {
        match fetch_info::<ServerVersion>(client, subresource::VERSION) {
            Ok(version) if !version.is_compatible(CLIENT_VERSION) => warn!(
                "client {} is not in the server's compatible versions ({})",
                CLIENT_VERSION,
                version.compatible_version.join(", ")
            ),
            Ok(_) => {}
            Err(e) => warn!("cannot check server compatibility: {}", e),
        }
    }

    fn build_request(
        &self,
        config: &TaskConfiguration,
        base_dir: &Path,
        uploaded: &SandboxUpload,
        cache_file_name: &str,
        options: SubmitOptions,
    ) -> Result<RequestParams, SubmitError> {
        let mut request = mapping::translate(config);

        let plugin_name = config.get_str("JobType.pluginName").unwrap_or_default();
        let plugin =
            jobtype::create(plugin_name).ok_or_else(|| JobTypeError::Unknown(plugin_name.to_string()))?;
        let ctx = JobTypeContext {
            config,
            env: self.env,
            base_dir,
        };
        plugin.prepare(&ctx, &mut request)?;

        request.insert("cacheurl", uploaded.cache_url.as_str());
        request.insert("cachefilename", cache_file_name);
        if options.dry_run {
            request.insert("dryrun", 1);
        }
        Ok(request)
    }

    fn wait_if_asked(
        &self,
        client: &RestClient,
        name: &str,
        options: SubmitOptions,
    ) -> Result<Option<TaskStatus>, SubmitError> {
        let poll = Duration::from_secs(self.client_config.wait_poll_seconds);
        let max_polls = self.client_config.wait_max_polls;

        if options.dry_run && !options.skip_estimates {
            info!("waiting for the dry run of {} to be uploaded", name);
            let status = task::wait_for(client, name, poll, max_polls, |s| {
                s.status == task_state::UPLOADED
            })?;
            return Ok(Some(status));
        }
        if options.wait {
            info!("waiting for {} to leave the submission states", name);
            let status = task::wait_for(client, name, poll, max_polls, |s| !s.is_pending())?;
            if status.is_pending() {
                warn!("task {} is still {} after {} polls", name, status.status, max_polls);
            }
            return Ok(Some(status));
        }
        Ok(None)
    }
}

fn fetch_info<T: DeserializeOwned>(
    client: &RestClient,
    what: &'static str,
) -> Result<T, SubmitError> {
    let params = RequestParams::new().with("subresource", what);
    let response = client.get(resource::INFO, &params)?;
    response
        .first()
        .map_err(|source| SubmitError::Decode { what, source })
}
